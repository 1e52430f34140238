//! This crate provides a client for the [Source RCON protocol], the remote console used by
//! Source engine servers and the many games that adopted its wire format.
//!
//! With the default `sync` feature the client uses blocking `std::net` sockets. Enabling the
//! `async` feature adds an equivalent [Tokio](https://tokio.rs/) implementation in
//! [`r#async`].
//!
//! To connect to an RCON server and authenticate, use the [`dial`] function.
//!
//! # Example
//! ```rust,no_run
//! use source_rcon_client::dial;
//!
//! fn main() {
//!     let session = dial("localhost:27015", "password123").unwrap();
//!
//!     let players = session.execute("list").unwrap();
//!     println!("{}", players);
//!
//!     session.close().unwrap();
//! }
//! ```
//!
//! [Source RCON protocol]: https://developer.valvesoftware.com/wiki/Source_RCON_Protocol

pub mod packet;
mod session;

#[cfg(feature = "async")]
pub mod r#async;
#[cfg(feature = "sync")]
mod sync;

use crate::packet::{Class, PacketError};
use std::io;

#[cfg(feature = "sync")]
pub use self::sync::*;
pub use self::session::{Options, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};

/// Error type for RCON operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("timed out connecting to server")]
    DialTimeout,

    #[error("server refused the connection")]
    DialRefused,

    #[error("timed out waiting for a response")]
    ReadTimeout,

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("session is closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),

    #[error("unrecognised response from server")]
    UnknownResponse,

    #[error("expected a {expected} response, got {actual}")]
    ResponseKindMismatch { expected: Class, actual: Class },

    #[error("response id {actual} does not match request id {expected}")]
    IdMismatch { expected: i32, actual: i32 },

    #[error("authentication failed: incorrect password")]
    AuthenticationFailed,
}

/// [`Result`] alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the session that produced this error can no longer be used.
    ///
    /// Framing and protocol errors only spoil the current call; transport errors mean the
    /// caller has to dial again.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::DialTimeout
                | Error::DialRefused
                | Error::ConnectionClosed
                | Error::SessionClosed
                | Error::Io(_)
                | Error::AuthenticationFailed
        )
    }

    pub(crate) fn from_dial(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::DialTimeout,
            io::ErrorKind::ConnectionRefused => Error::DialRefused,
            _ => Error::Io(err),
        }
    }

    pub(crate) fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::ReadTimeout,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(err),
        }
    }
}
