//! # Event log
//!
//! Module dedicated to the per-user ordered sequence of events. The
//! log is append-only, except for its head which is trimmed by the
//! [garbage collector](super::listener::ListenerCoordinator::collect).
//!
//! A log always contains at least one entry: a sentinel empty event
//! is inserted at creation, so that the last event of a user is
//! always defined.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::oneshot, time::Instant};
use tracing::debug;

use super::{Event, EventId};
use crate::user::UserId;

/// A client blocked on a log entry, waiting for its successor.
#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) id: u64,
    pub(crate) tx: oneshot::Sender<Arc<EventLogEntry>>,
}

/// The event log entry.
///
/// Pairs one event with the FIFO queue of clients currently waiting
/// for the next entry.
#[derive(Debug)]
pub struct EventLogEntry {
    event: Event,
    created_at: Instant,
    waiters: Mutex<VecDeque<Waiter>>,
}

impl EventLogEntry {
    fn new(event: Event) -> Self {
        Self {
            event,
            created_at: Instant::now(),
            waiters: Mutex::default(),
        }
    }

    pub fn id(&self) -> &EventId {
        &self.event.id
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Return the time elapsed since the entry was appended.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Return `true` if at least one client waits on this entry.
    pub fn is_listened(&self) -> bool {
        !self.waiters().is_empty()
    }

    // A poisoned queue is still consistent: waiters are only pushed
    // or popped, never partially updated.
    pub(crate) fn waiters(&self) -> MutexGuard<'_, VecDeque<Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The event log of one user.
#[derive(Debug)]
pub struct EventLog {
    user: UserId,
    entries: VecDeque<Arc<EventLogEntry>>,
    last_gc: Instant,
}

impl EventLog {
    /// Create a new log containing only the sentinel entry.
    pub fn new(user: UserId) -> Self {
        let sentinel = Event::empty(EventId::generate());
        debug!(%user, id = %sentinel.id, "creating event log");

        Self {
            user,
            entries: VecDeque::from([Arc::new(EventLogEntry::new(sentinel))]),
            last_gc: Instant::now(),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the newest entry of the log.
    pub fn last(&self) -> &Arc<EventLogEntry> {
        // the sentinel guarantees at least one entry, and trimming
        // never removes the newest one
        &self.entries[self.entries.len() - 1]
    }

    /// Find the position of the entry matching the given identifier.
    pub fn position(&self, id: &EventId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EventLogEntry>> {
        self.entries.iter()
    }

    /// Iterate over every entry strictly after the given position.
    pub fn iter_after(&self, pos: usize) -> impl Iterator<Item = &Arc<EventLogEntry>> {
        self.entries.iter().skip(pos + 1)
    }

    /// Append the given event with a brand new identifier.
    ///
    /// Whatever identifier the event had is replaced.
    pub fn push(&mut self, mut event: Event) -> Arc<EventLogEntry> {
        event.id = EventId::generate();
        let entry = Arc::new(EventLogEntry::new(event));
        self.entries.push_back(entry.clone());
        entry
    }

    /// Remove the given number of entries from the head of the log.
    ///
    /// The newest entry is always kept.
    pub(crate) fn trim(&mut self, count: usize) -> usize {
        let count = count.min(self.entries.len() - 1);
        self.entries.drain(..count);
        self.last_gc = Instant::now();
        count
    }

    /// Return the time elapsed since the last garbage collection.
    pub fn since_last_gc(&self) -> Duration {
        self.last_gc.elapsed()
    }

    /// Drop every waiter of every entry.
    ///
    /// Blocked clients are woken up without any successor.
    pub(crate) fn close(&mut self) {
        for entry in &self.entries {
            entry.waiters().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::event::{Event, EventId};

    use super::EventLog;

    #[test]
    fn sentinel() {
        let log = EventLog::new("user".into());

        assert_eq!(log.len(), 1);
        assert!(log.last().event().is_empty());
        assert_eq!(log.position(log.last().id()), Some(0));
    }

    #[test]
    fn push_assigns_new_ids() {
        let mut log = EventLog::new("user".into());

        let first = log.push(Event::empty(EventId::from("given")));
        let second = log.push(Event::default());

        assert_ne!(first.id(), &EventId::from("given"));
        assert_ne!(first.id(), second.id());
        assert_eq!(log.position(second.id()), Some(2));
        assert_eq!(log.iter_after(0).count(), 2);
    }

    #[test]
    fn trim_keeps_newest() {
        let mut log = EventLog::new("user".into());
        let last = log.push(Event::default());

        assert_eq!(log.trim(10), 1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().id(), last.id());
    }
}
