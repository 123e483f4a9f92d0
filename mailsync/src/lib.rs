//! Rust library to keep email clients in sync with their mail
//! stores.
//!
//! The main purpose of this library is to give clients a single,
//! incremental view of everything that changed in a mailbox
//! (messages, conversations, contacts, labels and addresses), no
//! matter whether the change came from the client itself or from a
//! remote IMAP server pushing notices.
//!
//! This goal is achieved by exposing a [`Backend`](crate::backend::Backend)
//! struct which is just a set of observed storage capabilities
//! plugged on top of an [`EventStore`](crate::event::store::EventStore).
//! Every successful mutation appends an
//! [`Event`](crate::event::Event) to the user's log, and clients
//! catch up by asking for every event after the last one they saw.
//!
//! See examples in the /mailsync-tests folder.
//!
//! ## Building blocks
//!
//! - [`event`]: the per-user event log, the delta merge and the
//!   listener coordinator.
//! - [`storage`]: the per-kind storage contracts and the in-memory
//!   store.
//! - [`observer`]: the storage decorators emitting events after
//!   successful mutations.
//! - [`imap`]: the IMAP push bridge, translating IDLE notices into
//!   events.
//! - [`backend`]: the facade gluing everything together.

pub mod backend;
pub mod config;
pub mod entity;
mod error;
pub mod event;
pub mod imap;
pub mod observer;
pub mod storage;
pub mod user;

#[doc(inline)]
pub use self::error::{AnyBoxedError, AnyError, AnyResult, Error, Result};
