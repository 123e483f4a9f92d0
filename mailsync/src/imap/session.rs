//! # IMAP session
//!
//! Module dedicated to one user's IMAP connection. The connection is
//! shared between user-driven operations ([`ImapSession::exec`]) and
//! the idle mode (see [`watch`](super::watch)): exactly one of them
//! owns it at a time, through the session lock.
//!
//! A user-driven operation always wins: it signals the idle mode to
//! stop before waiting for the lock, and the idle mode only resumes
//! after a new quiescence window.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex, PoisonError,
    },
};

use futures::future::BoxFuture;
use tokio::{
    sync::{Mutex, MutexGuard, Notify},
    time::Instant,
};
use tracing::{debug, info, warn};

use super::{Credentials, Error, ImapClient, ImapConnector, MailboxStatus, Result};
use crate::user::UserId;

/// The state guarded by the session lock.
pub(crate) struct SessionState {
    pub(crate) client: Option<ImapClient>,
    /// `true` while the connection is in idle mode.
    pub(crate) idling: bool,
    /// The highest UID already pushed, or present in the mailbox
    /// when the session was opened.
    pub(crate) last_pushed: u32,
    /// The UIDs appended by user-driven operations and not pushed
    /// yet.
    ///
    /// Their insertion already emitted an event: the idle mode skips
    /// them.
    pub(crate) appended: HashSet<u32>,
    /// `true` after a reconnection, until the idle worker notified
    /// clients that push notices may have been missed.
    pub(crate) stale: bool,
}

impl SessionState {
    /// Return the connected client, leaving the idle mode first if
    /// needed.
    pub(crate) async fn ready(&mut self) -> Result<&mut ImapClient> {
        let client = self.client.as_mut().ok_or(Error::ConnectionClosedError)?;

        if self.idling {
            debug!("leaving idle mode");
            self.idling = false;
            client.done().await?;
        }

        Ok(client)
    }
}

/// Find the UID of the last message of the selected mailbox.
///
/// Servers may omit UIDNEXT, in which case the UID of the last
/// message is fetched.
async fn last_uid(client: &mut ImapClient, status: &MailboxStatus) -> Result<u32> {
    match status.uid_next {
        Some(uid_next) => Ok(uid_next.saturating_sub(1)),
        None if status.exists == 0 => Ok(0),
        None => client.fetch_uid(status.exists).await,
    }
}

/// The IMAP session of one user.
pub struct ImapSession {
    user: UserId,
    mailbox: String,
    credentials: Credentials,
    connector: Arc<dyn ImapConnector>,
    state: Mutex<SessionState>,
    pending: AtomicUsize,
    cancel: Notify,
    last_activity: StdMutex<Instant>,
}

impl ImapSession {
    /// Open a new session for the given user, and select the given
    /// mailbox.
    pub async fn connect(
        user: UserId,
        credentials: Credentials,
        mailbox: impl ToString,
        connector: Arc<dyn ImapConnector>,
    ) -> Result<Self> {
        let mailbox = mailbox.to_string();

        let mut client = connector.connect(&credentials).await?;
        let status = client.select(&mailbox).await?;
        let last_uid = last_uid(&mut client, &status).await?;
        info!(%user, mailbox, exists = status.exists, last_uid, "IMAP session opened");

        let state = SessionState {
            client: Some(client),
            idling: false,
            last_pushed: last_uid,
            appended: HashSet::new(),
            stale: false,
        };

        Ok(Self {
            user,
            mailbox,
            credentials,
            connector,
            state: Mutex::new(state),
            pending: AtomicUsize::new(0),
            cancel: Notify::new(),
            last_activity: StdMutex::new(Instant::now()),
        })
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Execute the given operation on the connection.
    ///
    /// Any idle mode is cancelled first. If the connection turns out
    /// to be closed, the session reconnects with the stored
    /// credentials and the operation is retried once. When the retry
    /// fails too, the original error is returned.
    pub async fn exec<T, F>(&self, op: F) -> Result<T>
    where
        T: Send,
        F: for<'a> Fn(&'a mut ImapClient) -> BoxFuture<'a, Result<T>> + Send + Sync,
    {
        self.run(op, |_, _| ()).await
    }

    /// Same as [`ImapSession::exec`], for operations appending a
    /// message and returning its UID along with its snapshot.
    ///
    /// The UID is registered only once the whole operation
    /// succeeded, while still holding the connection: the push
    /// notice of the appended message is then skipped by the idle
    /// mode. When the operation fails after the append, the message
    /// is pushed like any external one.
    pub async fn exec_append<T, F>(&self, op: F) -> Result<(u32, T)>
    where
        T: Send,
        F: for<'a> Fn(&'a mut ImapClient) -> BoxFuture<'a, Result<(u32, T)>> + Send + Sync,
    {
        self.run(op, |state, (uid, _)| {
            if *uid > state.last_pushed {
                state.appended.insert(*uid);
            }
        })
        .await
    }

    async fn run<T, F, H>(&self, op: F, on_success: H) -> Result<T>
    where
        T: Send,
        F: for<'a> Fn(&'a mut ImapClient) -> BoxFuture<'a, Result<T>> + Send + Sync,
        H: FnOnce(&mut SessionState, &T) + Send,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.cancel.notify_waiters();

        let res = {
            let mut state = self.state.lock().await;
            let res = self.exec_locked(&mut state, &op).await;
            if let Ok(output) = &res {
                on_success(&mut state, output);
            }
            res
        };

        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.touch();

        res
    }

    async fn exec_locked<T, F>(&self, state: &mut SessionState, op: &F) -> Result<T>
    where
        F: for<'a> Fn(&'a mut ImapClient) -> BoxFuture<'a, Result<T>>,
    {
        let res = match state.ready().await {
            Ok(client) => op(client).await,
            Err(err) => Err(err),
        };

        let err = match res {
            Err(err) if err.is_connection_closed() => err,
            res => return res,
        };

        warn!(user = %self.user, "IMAP connection closed, reconnecting: {err}");

        let client = match self.reconnect(state).await {
            Ok(client) => client,
            Err(reconnect_err) => {
                debug!(user = %self.user, "cannot reconnect: {reconnect_err}");
                return Err(err);
            }
        };

        match op(client).await {
            Ok(output) => Ok(output),
            Err(retry_err) => {
                debug!(user = %self.user, "cannot retry IMAP operation: {retry_err}");
                Err(err)
            }
        }
    }

    /// Replace the connection by a new one, opened with the stored
    /// credentials.
    pub(crate) async fn reconnect<'a>(
        &self,
        state: &'a mut SessionState,
    ) -> Result<&'a mut ImapClient> {
        state.client = None;
        state.idling = false;

        let mut client = self.connector.connect(&self.credentials).await?;
        client.select(&self.mailbox).await?;
        info!(user = %self.user, "IMAP session reconnected");

        state.stale = true;
        Ok(state.client.insert(client))
    }

    /// Close the connection.
    ///
    /// Errors are logged and discarded, the session cannot be used
    /// anymore anyway.
    pub async fn logout(&self) {
        let mut state = self.state.lock().await;

        if let Ok(client) = state.ready().await {
            if let Err(err) = client.logout().await {
                debug!(user = %self.user, "cannot logout IMAP session: {err}");
            }
        }

        state.client = None;
        info!(user = %self.user, "IMAP session closed");
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Return the number of user-driven operations waiting for or
    /// holding the connection.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel(&self) -> &Notify {
        &self.cancel
    }

    pub(crate) fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}
