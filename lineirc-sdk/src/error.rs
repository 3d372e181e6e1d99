//! Error types for the SDK.

use std::io;

/// A received or submitted line did not match the message grammar.
///
/// Local to that one line: the connection keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    EmptyLine,
    #[error("unknown command")]
    UnknownCommand,
}

/// Errors surfaced by [`Connection`](crate::connection::Connection).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stream socket could not be established.
    #[error("connect to {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Read or write failure on the live socket. Fatal to the connection.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The connection was terminated; no further I/O is accepted.
    #[error("connection terminated")]
    Terminated,

    /// The outbound queue had no room and the caller could not wait.
    #[error("outbound queue is full")]
    QueueFull,

    #[error("connection is already serving")]
    AlreadyServing,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
