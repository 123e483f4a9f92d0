//! # Listener coordinator
//!
//! Module dedicated to clients blocked on the newest entry of a log.
//! The [`ListenerCoordinator`] registers waiters, wakes them up when
//! a successor is appended, and collects log entries nobody needs
//! anymore.
//!
//! Waiters of one entry are woken up in FIFO order, one per append:
//! the first registered client receives the successor, the others
//! keep waiting until the next append or until their timeout.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::oneshot, time};
use tracing::{debug, trace};

use super::log::{EventLog, EventLogEntry, Waiter};

/// The outcome of a wait.
#[derive(Debug)]
pub enum Wakeup {
    /// A successor has been appended after the listened entry.
    Advanced(Arc<EventLogEntry>),
    /// The timeout elapsed before any successor.
    Expired,
    /// The log has been deleted while waiting.
    Closed,
}

/// A client registered on one log entry.
///
/// Dropping a listener unregisters it, so that an abandoned wait
/// never consumes a wakeup.
#[derive(Debug)]
pub struct Listener {
    id: u64,
    entry: Arc<EventLogEntry>,
    rx: oneshot::Receiver<Arc<EventLogEntry>>,
}

impl Listener {
    /// Return the entry this listener waits on.
    pub fn entry(&self) -> &Arc<EventLogEntry> {
        &self.entry
    }

    fn unregister(&self) -> bool {
        let mut waiters = self.entry.waiters();
        match waiters.iter().position(|waiter| waiter.id == self.id) {
            Some(pos) => {
                waiters.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[derive(Debug, Default)]
pub struct ListenerCoordinator {
    next_id: AtomicU64,
}

impl ListenerCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new waiter on the given entry.
    ///
    /// Must be called while holding the lock of the log owning the
    /// entry, otherwise an append could slip between the check and
    /// the registration.
    pub fn listen(&self, entry: &Arc<EventLogEntry>) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        entry.waiters().push_back(Waiter { id, tx });
        trace!(listener = id, entry = %entry.id(), "listener registered");

        Listener {
            id,
            entry: entry.clone(),
            rx,
        }
    }

    /// Block until a successor is appended, the log is deleted or
    /// the timeout elapses.
    pub async fn wait(&self, mut listener: Listener, timeout: Duration) -> Wakeup {
        match time::timeout(timeout, &mut listener.rx).await {
            Ok(Ok(next)) => Wakeup::Advanced(next),
            Ok(Err(_)) => Wakeup::Closed,
            Err(_) => {
                if listener.unregister() {
                    trace!(listener = listener.id, "listener expired");
                    return Wakeup::Expired;
                }

                // an append popped the waiter right after the timeout
                // fired: the successor is already in the channel
                match listener.rx.try_recv() {
                    Ok(next) => Wakeup::Advanced(next),
                    Err(_) => Wakeup::Closed,
                }
            }
        }
    }

    /// Hand the given successor to the earliest live waiter of the
    /// given entry.
    ///
    /// Returns `true` if a waiter has been woken up.
    pub fn advance(&self, entry: &EventLogEntry, next: &Arc<EventLogEntry>) -> bool {
        let mut waiters = entry.waiters();

        while let Some(waiter) = waiters.pop_front() {
            if waiter.tx.send(next.clone()).is_ok() {
                trace!(listener = waiter.id, entry = %next.id(), "listener woken up");
                return true;
            }
        }

        false
    }

    /// Trim the head of the given log.
    ///
    /// Entries are removed from the oldest one and as long as they
    /// are older than the given retention, have no waiter and are not
    /// the newest entry. Collection stops at the first entry not
    /// matching these conditions, so the log stays contiguous.
    pub fn collect(&self, log: &mut EventLog, retention: Duration) -> usize {
        let candidates = log.len().saturating_sub(1);
        let count = log
            .iter()
            .take(candidates)
            .take_while(|entry| !entry.is_listened() && entry.age() >= retention)
            .count();

        let count = log.trim(count);
        if count > 0 {
            debug!(user = %log.user(), count, "collected event log entries");
        }

        count
    }
}
