//! # IMAP bridge
//!
//! Module dedicated to the pool of IMAP sessions. The [`ImapBridge`]
//! holds at most one session per user, each one watched by its own
//! [`IdleWorker`].

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info};

use super::{
    watch::IdleWorker, Credentials, Error, ImapClient, ImapConfig, ImapConnector, ImapSession,
    Result,
};
use crate::{observer::Emitter, user::UserId};

/// A logged in user.
struct ImapAccount {
    session: Arc<ImapSession>,
    watcher: JoinHandle<()>,
}

impl ImapAccount {
    async fn close(self) {
        self.watcher.abort();
        self.session.logout().await;
    }
}

/// The IMAP bridge.
pub struct ImapBridge {
    config: ImapConfig,
    connector: Arc<dyn ImapConnector>,
    emitter: Emitter,
    accounts: Mutex<HashMap<UserId, ImapAccount>>,
}

impl ImapBridge {
    pub fn new(config: ImapConfig, connector: Arc<dyn ImapConnector>, emitter: Emitter) -> Self {
        Self {
            config,
            connector,
            emitter,
            accounts: Mutex::default(),
        }
    }

    pub fn config(&self) -> &ImapConfig {
        &self.config
    }

    /// Open a session for the given user, and start its idle worker.
    ///
    /// An existing session of the same user is closed first. When
    /// concurrent logins of the same user race, the last one wins and
    /// the replaced sessions are closed.
    pub async fn login(&self, user: &UserId, credentials: Credentials) -> Result<()> {
        self.logout(user).await;

        let session = ImapSession::connect(
            user.clone(),
            credentials,
            self.config.find_mailbox(),
            self.connector.clone(),
        )
        .await?;
        let session = Arc::new(session);

        let watcher = IdleWorker::new(
            session.clone(),
            self.emitter.clone(),
            self.config.find_watch(),
        )
        .spawn();

        let account = ImapAccount { session, watcher };
        let prev = self.accounts.lock().await.insert(user.clone(), account);
        info!(%user, "user logged in");

        if let Some(prev) = prev {
            debug!(%user, "closing replaced IMAP session");
            prev.close().await;
        }

        Ok(())
    }

    /// Stop the idle worker of the given user, and close its session.
    ///
    /// Returns `false` if the user was not logged in.
    pub async fn logout(&self, user: &UserId) -> bool {
        let account = self.accounts.lock().await.remove(user);

        match account {
            Some(account) => {
                account.close().await;
                info!(%user, "user logged out");
                true
            }
            None => {
                debug!(%user, "user not logged in, nothing to logout");
                false
            }
        }
    }

    pub async fn is_logged_in(&self, user: &UserId) -> bool {
        self.accounts.lock().await.contains_key(user)
    }

    /// Return the session of the given user.
    pub async fn session(&self, user: &UserId) -> Result<Arc<ImapSession>> {
        self.accounts
            .lock()
            .await
            .get(user)
            .map(|account| account.session.clone())
            .ok_or_else(|| Error::SessionUnavailableError(user.clone()))
    }

    /// Execute the given operation on the session of the given user.
    ///
    /// See [`ImapSession::exec`].
    pub async fn exec<T, F>(&self, user: &UserId, op: F) -> Result<T>
    where
        T: Send,
        F: for<'a> Fn(&'a mut ImapClient) -> BoxFuture<'a, Result<T>> + Send + Sync,
    {
        self.session(user).await?.exec(op).await
    }
}

impl Drop for ImapBridge {
    fn drop(&mut self) {
        for account in self.accounts.get_mut().values() {
            account.watcher.abort();
        }
    }
}
