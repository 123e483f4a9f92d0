//! # IMAP idle worker
//!
//! Module dedicated to the idle mode of a session. The
//! [`IdleWorker`] is a state machine driven by its own task:
//!
//! - `Active`: user-driven operations use the connection. The worker
//!   waits for a quiescence window without any of them.
//! - `Idle`: the worker owns the connection in idle mode, checks for
//!   push notices every poll interval and renews the idle mode before
//!   the server drops it. A user-driven operation cancels it
//!   immediately.
//! - `Reconnecting`: the connection has been closed while idling.
//!   The worker reconnects with the stored credentials until it
//!   succeeds.
//!
//! Push notices are translated into events the same way a
//! user-driven insertion would be. Only new messages are handled:
//! expunges and flag changes are ignored.

use std::{pin::pin, sync::Arc};

use tokio::{
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, info, trace, warn};

use super::{
    session::SessionState, Error, ImapSession, ImapWatchConfig, Notice, RemoteMessage, Result,
};
use crate::{
    entity::Conversation,
    event::{Delta, Event, Refresh},
    observer::Emitter,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum WorkerState {
    Active,
    Idle,
    Reconnecting,
}

/// The idle worker of one session.
pub struct IdleWorker {
    session: Arc<ImapSession>,
    emitter: Emitter,
    config: ImapWatchConfig,
}

impl IdleWorker {
    pub fn new(session: Arc<ImapSession>, emitter: Emitter, config: ImapWatchConfig) -> Self {
        Self {
            session,
            emitter,
            config,
        }
    }

    /// Run the worker in its own task.
    ///
    /// The worker never stops by itself: abort the returned handle to
    /// stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut state = WorkerState::Active;

        loop {
            trace!(user = %self.session.user(), ?state, "idle worker state");

            state = match state {
                WorkerState::Active => self.wait_quiescence().await,
                WorkerState::Idle => self.idle().await,
                WorkerState::Reconnecting => self.reconnect().await,
            };
        }
    }

    /// Wait until no user-driven operation happened for a whole
    /// quiescence window.
    async fn wait_quiescence(&self) -> WorkerState {
        let quiescence = self.config.find_quiescence();

        loop {
            let deadline = self.session.last_activity() + quiescence;

            if Instant::now() < deadline {
                time::sleep_until(deadline).await;
                continue;
            }

            if self.session.pending() == 0 {
                return WorkerState::Idle;
            }

            // the running operation starts a new window when done
            time::sleep(quiescence.max(self.config.find_poll_interval())).await;
        }
    }

    async fn idle(&self) -> WorkerState {
        let user = self.session.user();
        let poll_interval = self.config.find_poll_interval();
        let idle_renew = self.config.find_idle_renew();

        let mut state = self.session.lock().await;

        // an operation got the lock first, a new quiescence window
        // starts after it
        if self.session.pending() > 0 {
            return WorkerState::Active;
        }

        if state.stale {
            state.stale = false;
            let event = Event {
                refresh: Refresh::MAIL,
                ..Default::default()
            };
            self.emitter.emit(user, event).await;
        }

        match self.enter_idle(&mut state).await {
            Ok(()) => debug!(%user, "entering idle mode"),
            Err(err) => return self.recover(err),
        }

        let mut renewed_at = Instant::now();

        loop {
            let mut cancelled = pin!(self.session.cancel().notified());
            cancelled.as_mut().enable();

            if self.session.pending() > 0 {
                debug!(%user, "idle mode cancelled");
                return WorkerState::Active;
            }

            tokio::select! {
                _ = cancelled => {
                    debug!(%user, "idle mode cancelled");
                    return WorkerState::Active;
                }
                _ = time::sleep(poll_interval) => (),
            }

            if renewed_at.elapsed() >= idle_renew {
                if let Err(err) = self.renew_idle(&mut state).await {
                    return self.recover(err);
                }
                renewed_at = Instant::now();
                debug!(%user, "idle mode renewed");
            }

            let notices = match state.client.as_mut() {
                Some(client) => client.poll_notices().await,
                None => Err(Error::ConnectionClosedError),
            };

            let notices = match notices {
                Ok(notices) => notices,
                Err(err) if err.is_connection_closed() => return self.recover(err),
                Err(err) => {
                    warn!(%user, "cannot poll IMAP notices: {err}");
                    continue;
                }
            };

            for notice in notices {
                if let Err(err) = self.handle_notice(&mut state, notice).await {
                    if err.is_connection_closed() {
                        return self.recover(err);
                    }
                    warn!(%user, ?notice, "cannot handle IMAP notice, dropping it: {err}");
                }
            }

            // handling notices leaves the idle mode
            if !state.idling {
                if let Err(err) = self.enter_idle(&mut state).await {
                    return self.recover(err);
                }
            }
        }
    }

    async fn enter_idle(&self, state: &mut SessionState) -> Result<()> {
        let client = state.ready().await?;
        client.idle().await?;
        state.idling = true;
        Ok(())
    }

    async fn renew_idle(&self, state: &mut SessionState) -> Result<()> {
        state.ready().await?;
        self.enter_idle(state).await
    }

    /// Translate the given notice into events.
    ///
    /// Only new messages are handled. Messages notified twice, or
    /// appended by a user-driven operation of this session, are
    /// skipped. Every other message with a UID between the last
    /// pushed one and the notified one is pushed.
    async fn handle_notice(&self, state: &mut SessionState, notice: Notice) -> Result<()> {
        let user = self.session.user();

        let seq = match notice {
            Notice::Exists(seq) => seq,
            notice => {
                trace!(%user, ?notice, "ignoring IMAP notice");
                return Ok(());
            }
        };

        let last_pushed = state.last_pushed;
        let client = state.ready().await?;

        let uid = client.fetch_uid(seq).await?;
        if uid <= last_pushed {
            trace!(%user, seq, uid, "message already pushed, skipping it");
            return Ok(());
        }

        let uids = format!("{}:{uid}", last_pushed + 1);
        let messages = client.fetch_messages(&uids).await?;
        state.last_pushed = uid;

        for message in messages {
            if state.appended.remove(&message.uid) {
                trace!(%user, seq, uid = message.uid, "message appended by user, skipping it");
                continue;
            }

            debug!(%user, seq, uid = message.uid, "new message pushed");
            self.emit_message(message).await;
        }

        state.appended.retain(|appended| *appended > uid);

        Ok(())
    }

    async fn emit_message(&self, message: RemoteMessage) {
        let message = message.into_message(self.session.mailbox());

        let conversation = Conversation::from_messages(&message.conversation_id, [&message])
            .map(Delta::create)
            .into_iter()
            .collect();

        let event = Event {
            messages: vec![Delta::create(message)],
            conversations: conversation,
            ..Default::default()
        };

        self.emitter.emit(self.session.user(), event).await;
    }

    fn recover(&self, err: Error) -> WorkerState {
        let user = self.session.user();

        if err.is_connection_closed() {
            warn!(%user, "IMAP connection closed while idling: {err}");
            WorkerState::Reconnecting
        } else {
            warn!(%user, "cannot run IMAP idle mode: {err}");
            WorkerState::Active
        }
    }

    async fn reconnect(&self) -> WorkerState {
        let user = self.session.user();
        let delay = self.config.find_reconnect_delay();

        loop {
            let mut state = self.session.lock().await;

            // a user-driven operation reconnected in the meantime
            if state.stale {
                return WorkerState::Active;
            }

            match self.session.reconnect(&mut state).await {
                Ok(_) => {
                    info!(%user, "IMAP idle mode recovered");
                    return WorkerState::Active;
                }
                Err(err) => {
                    warn!(%user, "cannot reconnect IMAP session, retrying in {delay:?}: {err}");
                }
            }

            drop(state);
            time::sleep(delay).await;
        }
    }
}
