//! In-process IMAP mailbox for testing purpose.
//!
//! The [`ImapTestingServer`] implements the connection contract of
//! the IMAP bridge without any network: it keeps users, mailboxes
//! and live connections in memory, and lets tests deliver messages,
//! drop connections or make reconnections fail in a deterministic
//! way.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use mailsync::{
    entity::EmailAddress,
    imap::{
        Credentials, Error, ImapClient, ImapConnection, ImapConnector, MailboxStatus, Notice,
        RemoteMessage, Result, DELETED,
    },
};
use tokio::time::sleep;
use tracing::debug;

/// Base timestamp of delivered messages.
const BASE_TIME: i64 = 1_704_106_800;

/// Spawn an IMAP testing server with a single user, then run the
/// given task against it.
pub async fn with_imap_testing_server<F: Future<Output = ()>>(
    login: &str,
    password: &str,
    task: impl Fn(ImapTestingServer) -> F,
) {
    let server = ImapTestingServer::new().with_user(login, password);
    task(server).await;
}

#[derive(Debug, Default)]
struct StoredMessage {
    uid: u32,
    flags: Vec<String>,
    raw: Vec<u8>,
}

#[derive(Debug)]
struct Mailbox {
    messages: Vec<StoredMessage>,
    uid_next: u32,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            uid_next: 1,
        }
    }
}

impl Mailbox {
    fn max_uid(&self) -> u32 {
        self.uid_next - 1
    }

    fn push(&mut self, raw: Vec<u8>, flags: Vec<String>) -> u32 {
        let uid = self.uid_next;
        self.uid_next += 1;
        self.messages.push(StoredMessage { uid, flags, raw });
        uid
    }
}

#[derive(Debug, Default)]
struct Account {
    password: String,
    mailboxes: HashMap<String, Mailbox>,
    connects: usize,
    failing_connects: usize,
    failing_fetches: usize,
    idle_commands: usize,
}

/// The server side of one connection.
#[derive(Debug)]
struct Connection {
    login: String,
    alive: AtomicBool,
    mailbox: Mutex<Option<String>>,
    notices: Mutex<Vec<Notice>>,
}

impl Connection {
    fn selected(&self) -> Option<String> {
        lock(&self.mailbox).clone()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct ServerState {
    accounts: HashMap<String, Account>,
    connections: Vec<Arc<Connection>>,
    /// `true` when SELECT responses omit UIDNEXT.
    hide_uid_next: bool,
    connect_delay: Duration,
}

impl ServerState {
    fn account(&mut self, login: &str) -> Result<&mut Account> {
        self.accounts
            .get_mut(login)
            .ok_or_else(|| Error::LoginError("unknown user".into(), login.to_owned()))
    }

    /// Queue the given notice on every live connection of the given
    /// user having selected the given mailbox.
    fn notify(&mut self, login: &str, mailbox: &str, notice: Notice) {
        self.connections.retain(|conn| conn.is_alive());

        for conn in &self.connections {
            if conn.login == login && conn.selected().as_deref() == Some(mailbox) {
                lock(&conn.notices).push(notice);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The IMAP testing server.
#[derive(Clone, Debug, Default)]
pub struct ImapTestingServer {
    state: Arc<Mutex<ServerState>>,
}

impl ImapTestingServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, login: &str, password: &str) -> Self {
        let account = Account {
            password: password.to_owned(),
            ..Default::default()
        };
        lock(&self.state).accounts.insert(login.to_owned(), account);
        self
    }

    /// Deliver the given raw message to the given mailbox, as an
    /// external sender would, and return its UID.
    pub fn deliver(&self, login: &str, mailbox: &str, raw: impl Into<Vec<u8>>) -> u32 {
        let mut state = lock(&self.state);

        let Some(account) = state.accounts.get_mut(login) else {
            return 0;
        };

        let mailbox_ref = account.mailboxes.entry(mailbox.to_owned()).or_default();
        let uid = mailbox_ref.push(raw.into(), Vec::new());
        let exists = mailbox_ref.messages.len() as u32;

        state.notify(login, mailbox, Notice::Exists(exists));
        debug!(login, mailbox, uid, "message delivered");

        uid
    }

    /// Close every live connection of the given user, as a server
    /// restart would.
    pub fn drop_connections(&self, login: &str) {
        let mut state = lock(&self.state);

        for conn in state.connections.iter().filter(|conn| conn.login == login) {
            conn.close();
        }

        state.connections.retain(|conn| conn.is_alive());
        debug!(login, "connections dropped");
    }

    /// Make the next given number of connections of the given user
    /// fail.
    pub fn fail_next_connects(&self, login: &str, count: usize) {
        if let Some(account) = lock(&self.state).accounts.get_mut(login) {
            account.failing_connects = count;
        }
    }

    /// Make the next given number of UID FETCH commands of the given
    /// user fail, without closing the connection.
    pub fn fail_next_fetches(&self, login: &str, count: usize) {
        if let Some(account) = lock(&self.state).accounts.get_mut(login) {
            account.failing_fetches = count;
        }
    }

    /// Omit UIDNEXT from SELECT responses.
    pub fn hide_uid_next(self) -> Self {
        lock(&self.state).hide_uid_next = true;
        self
    }

    /// Delay every connection by the given duration.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        lock(&self.state).connect_delay = delay;
        self
    }

    /// Add the given flag to the given message, as another client
    /// would.
    pub fn add_flag(&self, login: &str, mailbox: &str, uid: u32, flag: &str) {
        let mut state = lock(&self.state);
        let msg = state
            .accounts
            .get_mut(login)
            .and_then(|account| account.mailboxes.get_mut(mailbox))
            .and_then(|mailbox| mailbox.messages.iter_mut().find(|msg| msg.uid == uid));

        if let Some(msg) = msg {
            msg.flags.push(flag.to_owned());
        }
    }

    /// Return the number of successful connections of the given user.
    pub fn connects(&self, login: &str) -> usize {
        lock(&self.state)
            .accounts
            .get(login)
            .map(|account| account.connects)
            .unwrap_or_default()
    }

    /// Return the number of IDLE commands sent by the given user.
    pub fn idle_commands(&self, login: &str) -> usize {
        lock(&self.state)
            .accounts
            .get(login)
            .map(|account| account.idle_commands)
            .unwrap_or_default()
    }

    /// Return the number of live connections of the given user.
    pub fn live_connections(&self, login: &str) -> usize {
        lock(&self.state)
            .connections
            .iter()
            .filter(|conn| conn.login == login && conn.is_alive())
            .count()
    }

    /// Return the UIDs of the given mailbox.
    pub fn uids(&self, login: &str, mailbox: &str) -> Vec<u32> {
        lock(&self.state)
            .accounts
            .get(login)
            .and_then(|account| account.mailboxes.get(mailbox))
            .map(|mailbox| mailbox.messages.iter().map(|msg| msg.uid).collect())
            .unwrap_or_default()
    }

    /// Return the flags of the given message.
    pub fn flags(&self, login: &str, mailbox: &str, uid: u32) -> Vec<String> {
        lock(&self.state)
            .accounts
            .get(login)
            .and_then(|account| account.mailboxes.get(mailbox))
            .and_then(|mailbox| mailbox.messages.iter().find(|msg| msg.uid == uid))
            .map(|msg| msg.flags.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ImapConnector for ImapTestingServer {
    async fn connect(&self, credentials: &Credentials) -> Result<ImapClient> {
        let delay = lock(&self.state).connect_delay;
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut state = lock(&self.state);
        let account = state.account(&credentials.login)?;

        if account.failing_connects > 0 {
            account.failing_connects -= 1;
            return Err(Error::ConnectionClosedError);
        }

        if account.password != credentials.password {
            let reason = "invalid credentials".to_owned();
            return Err(Error::LoginError(reason, credentials.login.clone()));
        }

        account.connects += 1;

        let conn = Arc::new(Connection {
            login: credentials.login.clone(),
            alive: AtomicBool::new(true),
            mailbox: Mutex::new(None),
            notices: Mutex::new(Vec::new()),
        });
        state.connections.push(conn.clone());
        debug!(login = %credentials.login, "connection opened");

        Ok(Box::new(TestingConnection {
            state: self.state.clone(),
            conn,
            idling: false,
        }))
    }
}

/// The client side of one connection.
struct TestingConnection {
    state: Arc<Mutex<ServerState>>,
    conn: Arc<Connection>,
    idling: bool,
}

impl TestingConnection {
    /// Check that the given command can be sent.
    fn check(&self, cmd: &str) -> Result<()> {
        if !self.conn.is_alive() {
            return Err(Error::ConnectionClosedError);
        }

        if self.idling {
            let reason = "command sent while idling".to_owned();
            return Err(Error::ExecuteCommandError(cmd.to_owned(), reason));
        }

        Ok(())
    }

    fn with_mailbox<T>(&self, cmd: &str, f: impl FnOnce(&mut Mailbox) -> Result<T>) -> Result<T> {
        self.check(cmd)?;

        let mailbox = self.conn.selected().ok_or_else(|| {
            Error::ExecuteCommandError(cmd.to_owned(), "no mailbox selected".into())
        })?;

        let mut state = lock(&self.state);
        let account = state.account(&self.conn.login)?;
        f(account.mailboxes.entry(mailbox).or_default())
    }
}

fn parse_uid_set(cmd: &str, set: &str, max: u32) -> Result<Vec<(u32, u32)>> {
    let parse = |n: &str| match n {
        "*" => Ok(max),
        n => n.parse::<u32>().map_err(|err| {
            Error::ExecuteCommandError(cmd.to_owned(), format!("invalid UID set {set}: {err}"))
        }),
    };

    set.split(',')
        .map(|part| {
            let (start, end) = part.split_once(':').unwrap_or((part, part));
            let (start, end) = (parse(start)?, parse(end)?);
            Ok((start.min(end), start.max(end)))
        })
        .collect()
}

fn contains(ranges: &[(u32, u32)], uid: u32) -> bool {
    ranges
        .iter()
        .any(|(start, end)| (*start..=*end).contains(&uid))
}

fn header(raw: &str, name: &str) -> Option<String> {
    raw.lines()
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (key, val) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| val.trim().to_owned())
        })
}

fn to_remote_message(msg: &StoredMessage) -> RemoteMessage {
    let raw = String::from_utf8_lossy(&msg.raw);

    RemoteMessage {
        uid: msg.uid,
        flags: msg.flags.clone(),
        size: msg.raw.len() as u64,
        time: BASE_TIME + i64::from(msg.uid),
        subject: header(&raw, "Subject").unwrap_or_default(),
        sender: header(&raw, "From")
            .map(|from| EmailAddress::from(from.as_str()))
            .unwrap_or_default(),
        to_list: header(&raw, "To")
            .map(|to| to.split(',').map(|addr| EmailAddress::from(addr.trim())).collect())
            .unwrap_or_default(),
        raw: msg.raw.clone(),
        ..Default::default()
    }
}

#[async_trait]
impl ImapConnection for TestingConnection {
    async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        self.check("SELECT")?;

        let mut state = lock(&self.state);
        let hide_uid_next = state.hide_uid_next;
        let account = state.account(&self.conn.login)?;
        let selected = account.mailboxes.entry(mailbox.to_owned()).or_default();

        *lock(&self.conn.mailbox) = Some(mailbox.to_owned());
        lock(&self.conn.notices).clear();

        Ok(MailboxStatus {
            exists: selected.messages.len() as u32,
            uid_next: (!hide_uid_next).then_some(selected.uid_next),
        })
    }

    async fn idle(&mut self) -> Result<()> {
        self.check("IDLE")?;

        let mut state = lock(&self.state);
        state.account(&self.conn.login)?.idle_commands += 1;
        self.idling = true;

        Ok(())
    }

    async fn done(&mut self) -> Result<()> {
        if !self.conn.is_alive() {
            return Err(Error::ConnectionClosedError);
        }

        self.idling = false;
        Ok(())
    }

    async fn poll_notices(&mut self) -> Result<Vec<Notice>> {
        if !self.conn.is_alive() {
            return Err(Error::ConnectionClosedError);
        }

        if !self.idling {
            return Ok(Vec::new());
        }

        Ok(lock(&self.conn.notices).drain(..).collect())
    }

    async fn fetch_uid(&mut self, seq: u32) -> Result<u32> {
        self.with_mailbox("FETCH", |mailbox| {
            let index = seq.checked_sub(1).ok_or(Error::FindUidError(seq))?;
            mailbox
                .messages
                .get(index as usize)
                .map(|msg| msg.uid)
                .ok_or(Error::FindUidError(seq))
        })
    }

    async fn fetch_messages(&mut self, uids: &str) -> Result<Vec<RemoteMessage>> {
        self.check("UID FETCH")?;

        {
            let mut state = lock(&self.state);
            let account = state.account(&self.conn.login)?;
            if account.failing_fetches > 0 {
                account.failing_fetches -= 1;
                let reason = "fetch failure".to_owned();
                return Err(Error::ExecuteCommandError("UID FETCH".into(), reason));
            }
        }

        self.with_mailbox("UID FETCH", |mailbox| {
            let ranges = parse_uid_set("UID FETCH", uids, mailbox.max_uid())?;
            Ok(mailbox
                .messages
                .iter()
                .filter(|msg| contains(&ranges, msg.uid))
                .map(to_remote_message)
                .collect())
        })
    }

    async fn append(&mut self, mailbox: &str, raw: &[u8], flags: &[&str]) -> Result<u32> {
        self.check("APPEND")?;

        let mut state = lock(&self.state);
        let account = state.account(&self.conn.login)?;
        let target = account.mailboxes.entry(mailbox.to_owned()).or_default();

        let flags = flags.iter().map(ToString::to_string).collect();
        let uid = target.push(raw.to_vec(), flags);
        let exists = target.messages.len() as u32;

        state.notify(&self.conn.login, mailbox, Notice::Exists(exists));
        Ok(uid)
    }

    async fn store_flags(&mut self, uids: &str, flags: &[&str], add: bool) -> Result<()> {
        self.with_mailbox("UID STORE", |mailbox| {
            let ranges = parse_uid_set("UID STORE", uids, mailbox.max_uid())?;

            for msg in &mut mailbox.messages {
                if !contains(&ranges, msg.uid) {
                    continue;
                }
                for flag in flags {
                    msg.flags.retain(|f| !f.eq_ignore_ascii_case(flag));
                    if add {
                        msg.flags.push(flag.to_string());
                    }
                }
            }

            Ok(())
        })
    }

    async fn uid_expunge(&mut self, uids: &str) -> Result<()> {
        self.with_mailbox("UID EXPUNGE", |mailbox| {
            let ranges = parse_uid_set("UID EXPUNGE", uids, mailbox.max_uid())?;
            mailbox.messages.retain(|msg| {
                let deleted = msg.flags.iter().any(|f| f.eq_ignore_ascii_case(DELETED));
                !(deleted && contains(&ranges, msg.uid))
            });
            Ok(())
        })
    }

    async fn noop(&mut self) -> Result<()> {
        self.check("NOOP")
    }

    async fn logout(&mut self) -> Result<()> {
        self.check("LOGOUT")?;
        self.conn.close();
        debug!(login = %self.conn.login, "connection closed");
        Ok(())
    }
}
