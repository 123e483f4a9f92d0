//! # Event store
//!
//! Module dedicated to the public event API. The [`EventStore`] owns
//! one [`EventLog`] per user, created lazily on first access.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    listener::{ListenerCoordinator, Wakeup},
    log::EventLog,
    Error, Event, EventId, Result,
};
use crate::{config::SyncConfig, user::UserId};

/// The event store.
///
/// Logs of different users are independent: each one is protected by
/// its own lock, the registry lock is only held to find or create a
/// log.
#[derive(Debug, Default)]
pub struct EventStore {
    config: SyncConfig,
    logs: Mutex<HashMap<UserId, Arc<Mutex<EventLog>>>>,
    listeners: ListenerCoordinator,
}

impl EventStore {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            logs: Mutex::default(),
            listeners: ListenerCoordinator::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn log(&self, user: &UserId) -> Arc<Mutex<EventLog>> {
        let mut logs = self.logs.lock().await;
        logs.entry(user.clone())
            .or_insert_with(|| Arc::new(Mutex::new(EventLog::new(user.clone()))))
            .clone()
    }

    /// Append the given event to the log of the given user.
    ///
    /// The event receives a new identifier, which is returned. The
    /// earliest client waiting on the previous newest entry is woken
    /// up with the appended event.
    pub async fn insert_event(&self, user: &UserId, event: Event) -> EventId {
        let log = self.log(user).await;
        let mut log = log.lock().await;

        let prev = log.last().clone();
        let entry = log.push(event);
        let woken = self.listeners.advance(&prev, &entry);
        debug!(%user, id = %entry.id(), woken, "event appended");

        if log.since_last_gc() >= self.config.find_gc_interval() {
            let retention = self.config.find_event_retention();
            self.listeners.collect(&mut log, retention);
        }

        entry.id().clone()
    }

    /// Return the newest event of the given user.
    ///
    /// A user without any event gets the sentinel empty event, whose
    /// identifier stays stable until the next append.
    pub async fn get_last_event(&self, user: &UserId) -> Event {
        let log = self.log(user).await;
        let log = log.lock().await;
        log.last().event().clone()
    }

    /// Return everything that happened after the given event.
    ///
    /// If newer events exist, they are merged into a single event
    /// tagged with the identifier of the newest one. If the given
    /// event is the newest one, blocks until a successor is appended
    /// (returned as is) or the sync timeout elapses (an empty event
    /// with the same identifier is returned).
    ///
    /// An unknown or collected identifier fails with
    /// [`Error::EventNotFoundError`]: the client should resync from
    /// the last event.
    pub async fn get_events_after(&self, user: &UserId, id: &EventId) -> Result<Event> {
        let log = self.log(user).await;

        let listener = {
            let log = log.lock().await;

            let pos = log
                .position(id)
                .ok_or_else(|| Error::EventNotFoundError(user.clone(), id.clone()))?;

            if pos + 1 < log.len() {
                let newest = log.last().id().clone();
                let events = log.iter_after(pos).map(|entry| entry.event());
                return Ok(Event::merge_all(newest, events));
            }

            self.listeners.listen(log.last())
        };

        debug!(%user, %id, "waiting for next event");

        match self.listeners.wait(listener, self.config.find_sync_timeout()).await {
            Wakeup::Advanced(entry) => Ok(entry.event().clone()),
            Wakeup::Expired => Ok(Event::empty(id.clone())),
            Wakeup::Closed => Err(Error::LogDeletedError(user.clone(), id.clone())),
        }
    }

    /// Delete the whole log of the given user.
    ///
    /// Clients blocked on it are released with
    /// [`Error::LogDeletedError`]. The next access recreates a fresh
    /// log with a new sentinel. Returns `false` if the user had no
    /// log.
    pub async fn delete_all_events(&self, user: &UserId) -> bool {
        let log = self.logs.lock().await.remove(user);

        match log {
            Some(log) => {
                log.lock().await.close();
                info!(%user, "event log deleted");
                true
            }
            None => false,
        }
    }

    /// Run the garbage collector over every log.
    ///
    /// Returns the total number of collected entries.
    pub async fn collect_garbage(&self) -> usize {
        let logs: Vec<_> = self.logs.lock().await.values().cloned().collect();
        let retention = self.config.find_event_retention();

        let mut count = 0;
        for log in logs {
            let mut log = log.lock().await;
            count += self.listeners.collect(&mut log, retention);
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time;

    use crate::{
        config::SyncConfig,
        entity::Message,
        event::{Delta, Error, Event, EventId},
        user::UserId,
    };

    use super::EventStore;

    fn config() -> SyncConfig {
        SyncConfig {
            sync_timeout: Some(2),
            event_retention: Some(10),
            gc_interval: Some(5),
        }
    }

    fn create(id: &str) -> Event {
        Event {
            messages: vec![Delta::create(Message {
                id: id.into(),
                ..Default::default()
            })],
            ..Default::default()
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn last_event_is_stable() {
        let store = EventStore::new(config());
        let user = UserId::from("user");

        let first = store.get_last_event(&user).await;
        let second = store.get_last_event(&user).await;
        assert_eq!(first.id, second.id);
        assert!(first.is_empty());

        let id = store.insert_event(&user, create("1")).await;
        assert_eq!(store.get_last_event(&user).await.id, id);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn unknown_event() {
        let store = EventStore::new(config());
        let user = UserId::from("user");

        let err = store
            .get_events_after(&user, &EventId::from("unknown"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EventNotFoundError(..)));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn timeout_returns_same_id() {
        let store = EventStore::new(config());
        let user = UserId::from("user");
        let last = store.get_last_event(&user).await;

        let event = store.get_events_after(&user, &last.id).await.unwrap();

        assert_eq!(event.id, last.id);
        assert!(event.is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn merge_newer_events() {
        let store = EventStore::new(config());
        let user = UserId::from("user");
        let last = store.get_last_event(&user).await;

        store.insert_event(&user, create("1")).await;
        let newest = store.insert_event(&user, create("2")).await;

        let event = store.get_events_after(&user, &last.id).await.unwrap();
        assert_eq!(event.id, newest);
        let ids: Vec<_> = event.messages.iter().map(|delta| delta.id()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn waiter_receives_next_event() {
        let store = Arc::new(EventStore::new(config()));
        let user = UserId::from("user");
        let last = store.get_last_event(&user).await;

        let wait = tokio::spawn({
            let store = store.clone();
            let user = user.clone();
            async move { store.get_events_after(&user, &last.id).await }
        });

        time::sleep(Duration::from_millis(500)).await;
        let id = store.insert_event(&user, create("1")).await;

        let event = wait.await.unwrap().unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.messages.len(), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn delete_releases_waiters() {
        let store = Arc::new(EventStore::new(config()));
        let user = UserId::from("user");
        let last = store.get_last_event(&user).await;

        let wait = tokio::spawn({
            let store = store.clone();
            let user = user.clone();
            let id = last.id.clone();
            async move { store.get_events_after(&user, &id).await }
        });

        time::sleep(Duration::from_millis(500)).await;
        assert!(store.delete_all_events(&user).await);
        assert!(!store.delete_all_events(&user).await);

        let err = wait.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::LogDeletedError(..)));

        // a fresh log is created with a new sentinel
        let fresh = store.get_last_event(&user).await;
        assert_ne!(fresh.id, last.id);
        let err = store.get_events_after(&user, &last.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn collect_old_entries() {
        let store = EventStore::new(config());
        let user = UserId::from("user");
        let first = store.insert_event(&user, create("1")).await;

        time::advance(Duration::from_secs(11)).await;
        let last = store.insert_event(&user, create("2")).await;

        // sentinel and first event are old enough and not listened
        assert_eq!(store.get_last_event(&user).await.id, last);
        let err = store.get_events_after(&user, &first).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.collect_garbage().await, 0);
    }
}
