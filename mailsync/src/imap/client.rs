//! # IMAP client
//!
//! Module dedicated to the real IMAP connector, built on top of the
//! blocking `imap` crate. Every command runs on the blocking thread
//! pool of tokio.
//!
//! The idle mode is emulated with short IDLE windows: each call to
//! [`ImapConnection::poll_notices`] idles for at most
//! [`IDLE_WINDOW`], then leaves the idle mode so that the connection
//! stays available to user-driven operations.

use std::{
    io::{self, Read, Write},
    net::TcpStream,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use imap::{extensions::idle::SetReadTimeout, types::UnsolicitedResponse};
use mail_parser::{Address, MessageParser};
use native_tls::{TlsConnector, TlsStream};
use tokio::task;
use tracing::{debug, trace};

use super::{
    Credentials, Error, ImapClient, ImapConfig, ImapConnection, ImapConnector, MailboxStatus,
    Notice, RemoteMessage, Result,
};
use crate::entity::EmailAddress;

/// Maximum time spent in one IDLE command.
pub const IDLE_WINDOW: Duration = Duration::from_millis(500);

const FETCH_QUERY: &str = "(UID FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[])";

pub enum ImapStream {
    Tls(TlsStream<TcpStream>),
    Tcp(TcpStream),
}

impl SetReadTimeout for ImapStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> imap::Result<()> {
        match self {
            Self::Tls(stream) => Ok(stream.get_ref().set_read_timeout(timeout)?),
            Self::Tcp(stream) => Ok(stream.set_read_timeout(timeout)?),
        }
    }
}

impl Read for ImapStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.read(buf),
            Self::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for ImapStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.write(buf),
            Self::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tls(stream) => stream.flush(),
            Self::Tcp(stream) => stream.flush(),
        }
    }
}

type Session = imap::Session<ImapStream>;

/// Map an `imap` crate error to a module error.
///
/// Lost connections and I/O failures are reported as closed
/// connections, so that the session reconnects.
fn command_error(cmd: &str, err: imap::Error) -> Error {
    match err {
        imap::Error::ConnectionLost | imap::Error::Io(_) => Error::ConnectionClosedError,
        err => Error::ExecuteCommandError(cmd.to_owned(), err.to_string()),
    }
}

fn is_timeout(err: &imap::Error) -> bool {
    match err {
        imap::Error::Io(err) => matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ),
        _ => false,
    }
}

/// The real IMAP connector.
#[derive(Clone, Debug)]
pub struct NativeImapConnector {
    config: ImapConfig,
}

impl NativeImapConnector {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    fn open_stream(config: &ImapConfig) -> Result<ImapStream> {
        let host = config.host.as_str();
        let port = config.port;
        let connect_error = |err: io::Error| Error::ConnectError(err, host.to_owned(), port);

        let tcp = TcpStream::connect((host, port)).map_err(connect_error)?;

        if config.is_encryption_disabled() {
            return Ok(ImapStream::Tcp(tcp));
        }

        let connector = TlsConnector::new()
            .map_err(|err| connect_error(io::Error::new(io::ErrorKind::Other, err.to_string())))?;
        let tls = connector
            .connect(host, tcp)
            .map_err(|err| connect_error(io::Error::new(io::ErrorKind::Other, err.to_string())))?;

        Ok(ImapStream::Tls(tls))
    }
}

#[async_trait]
impl ImapConnector for NativeImapConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<ImapClient> {
        let config = self.config.clone();
        let credentials = credentials.clone();

        let session = task::spawn_blocking(move || {
            let stream = Self::open_stream(&config)?;

            let mut client = imap::Client::new(stream);
            client
                .read_greeting()
                .map_err(|err| command_error("GREETING", err))?;

            let session = client
                .login(&credentials.login, &credentials.password)
                .map_err(|(err, _)| Error::LoginError(err.to_string(), credentials.login))?;

            Result::Ok(session)
        })
        .await
        .map_err(Error::JoinCommandError)??;

        debug!(host = %self.config.host, port = self.config.port, "connected to IMAP server");

        Ok(Box::new(NativeImapConnection::new(session)))
    }
}

/// The real IMAP connection.
pub struct NativeImapConnection {
    session: Option<Session>,
    mailbox: Option<String>,
    exists: u32,
    idling: bool,
}

impl NativeImapConnection {
    fn new(session: Session) -> Self {
        Self {
            session: Some(session),
            mailbox: None,
            exists: 0,
            idling: false,
        }
    }

    /// Run the given command on the blocking thread pool.
    ///
    /// The session is moved to the blocking task and back. A session
    /// lost in a panicking task leaves the connection closed.
    async fn run<T, F>(&mut self, cmd: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> imap::Result<T> + Send + 'static,
    {
        let mut session = self.session.take().ok_or(Error::ConnectionClosedError)?;

        let (session, res) = task::spawn_blocking(move || {
            let res = f(&mut session);
            (session, res)
        })
        .await
        .map_err(Error::JoinCommandError)?;

        match res {
            Ok(output) => {
                self.session = Some(session);
                Ok(output)
            }
            Err(err) => {
                let err = command_error(cmd, err);
                if !err.is_connection_closed() {
                    self.session = Some(session);
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ImapConnection for NativeImapConnection {
    async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let encoded = utf7_imap::encode_utf7_imap(mailbox.to_owned());
        let selected = self
            .run("SELECT", move |session| session.select(encoded))
            .await?;

        self.mailbox = Some(mailbox.to_owned());
        self.exists = selected.exists;

        Ok(MailboxStatus {
            exists: selected.exists,
            uid_next: selected.uid_next,
        })
    }

    async fn idle(&mut self) -> Result<()> {
        self.idling = true;
        Ok(())
    }

    async fn done(&mut self) -> Result<()> {
        self.idling = false;
        Ok(())
    }

    async fn poll_notices(&mut self) -> Result<Vec<Notice>> {
        if !self.idling {
            return Ok(Vec::new());
        }

        let mailbox = self.mailbox.clone().map(utf7_imap::encode_utf7_imap);
        let known = self.exists;

        let (notices, exists) = self
            .run("IDLE", move |session| {
                let start = Instant::now();
                let changed = match session.idle()?.wait_with_timeout(IDLE_WINDOW) {
                    Ok(_) => start.elapsed() < IDLE_WINDOW * 9 / 10,
                    Err(err) if is_timeout(&err) => false,
                    Err(err) => return Err(err),
                };

                let mut exists = known;
                let mut notices = Vec::new();

                for response in session.unsolicited_responses.try_iter() {
                    let notice = match response {
                        UnsolicitedResponse::Exists(n) => Notice::Exists(n),
                        UnsolicitedResponse::Expunge(n) => Notice::Expunge(n),
                        UnsolicitedResponse::Recent(n) => Notice::Recent(n),
                        _ => Notice::Other,
                    };
                    if let Notice::Exists(n) = notice {
                        exists = exists.max(n);
                    }
                    notices.push(notice);
                }

                // the notice may have been consumed by the idle
                // command itself
                if let Some(mailbox) = mailbox.filter(|_| changed) {
                    let selected = session.select(mailbox)?;
                    if selected.exists > exists {
                        notices.push(Notice::Exists(selected.exists));
                    }
                    exists = selected.exists;
                }

                Ok((notices, exists))
            })
            .await?;

        trace!(?notices, exists, "IMAP notices polled");
        self.exists = exists;

        Ok(notices)
    }

    async fn fetch_uid(&mut self, seq: u32) -> Result<u32> {
        let uid = self
            .run("FETCH", move |session| {
                let fetches = session.fetch(seq.to_string(), "UID")?;
                Ok(fetches.iter().find_map(|fetch| fetch.uid))
            })
            .await?;

        uid.ok_or(Error::FindUidError(seq))
    }

    async fn fetch_messages(&mut self, uids: &str) -> Result<Vec<RemoteMessage>> {
        let uids = uids.to_owned();

        self.run("UID FETCH", move |session| {
            let fetches = session.uid_fetch(uids, FETCH_QUERY)?;
            Ok(fetches.iter().filter_map(to_remote_message).collect())
        })
        .await
    }

    async fn append(&mut self, mailbox: &str, raw: &[u8], flags: &[&str]) -> Result<u32> {
        let mailbox = utf7_imap::encode_utf7_imap(mailbox.to_owned());
        let raw = raw.to_vec();
        let flags = flags.join(" ");

        let uid = self
            .run("APPEND", move |session| {
                session.append(&mailbox, &raw)?;

                let uid = session.uid_search("ALL")?.into_iter().max();
                if let Some(uid) = uid.filter(|_| !flags.is_empty()) {
                    session.uid_store(uid.to_string(), format!("+FLAGS.SILENT ({flags})"))?;
                }

                Ok(uid)
            })
            .await?;

        uid.ok_or(Error::FindAppendedMessageUidError)
    }

    async fn store_flags(&mut self, uids: &str, flags: &[&str], add: bool) -> Result<()> {
        let uids = uids.to_owned();
        let query = format!(
            "{}FLAGS.SILENT ({})",
            if add { "+" } else { "-" },
            flags.join(" ")
        );

        self.run("UID STORE", move |session| {
            session.uid_store(uids, query)?;
            Ok(())
        })
        .await
    }

    async fn uid_expunge(&mut self, uids: &str) -> Result<()> {
        let uids = uids.to_owned();

        self.run("UID EXPUNGE", move |session| {
            session.uid_expunge(uids)?;
            Ok(())
        })
        .await
    }

    async fn noop(&mut self) -> Result<()> {
        self.run("NOOP", |session| session.noop()).await
    }

    async fn logout(&mut self) -> Result<()> {
        let res = self.run("LOGOUT", |session| session.logout()).await;
        self.session = None;
        res
    }
}

fn to_email_addresses(address: Option<&Address>) -> Vec<EmailAddress> {
    let addrs = match address {
        Some(Address::List(addrs)) => addrs.iter().collect::<Vec<_>>(),
        Some(Address::Group(groups)) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .collect(),
        None => Vec::new(),
    };

    addrs
        .into_iter()
        .filter_map(|addr| {
            let email = addr.address.as_ref()?;
            Some(EmailAddress::new(addr.name.as_ref(), email))
        })
        .collect()
}

fn to_remote_message(fetch: &imap::types::Fetch) -> Option<RemoteMessage> {
    let uid = fetch.uid?;
    let raw = fetch.body().unwrap_or_default().to_vec();

    let mut message = RemoteMessage {
        uid,
        flags: fetch.flags().iter().map(ToString::to_string).collect(),
        size: fetch.size.map(u64::from).unwrap_or(raw.len() as u64),
        time: fetch
            .internal_date()
            .map(|date| date.timestamp())
            .unwrap_or_default(),
        ..Default::default()
    };

    if let Some(parsed) = MessageParser::default().parse(&raw[..]) {
        message.subject = parsed.subject().unwrap_or_default().to_owned();
        message.sender = to_email_addresses(parsed.from())
            .into_iter()
            .next()
            .unwrap_or_default();
        message.to_list = to_email_addresses(parsed.to());
        message.cc_list = to_email_addresses(parsed.cc());
        message.bcc_list = to_email_addresses(parsed.bcc());
    }

    message.raw = raw;
    Some(message)
}
