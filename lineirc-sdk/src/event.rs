//! Events emitted by a connection for the consumer (bot, CLI, tests).

use crate::irc::Message;

/// Events that the read task emits to whoever holds the receiver.
///
/// After [`Event::Disconnected`] the channel closes.
#[derive(Debug, Clone)]
pub enum Event {
    /// A parsed inbound message, emitted after every handler has seen it.
    Message(Message),

    /// A handler returned an error for a message. Dispatch continued.
    HandlerFailed {
        handler: &'static str,
        command: String,
        error: String,
    },

    /// Raw inbound line (only when the connection is verbose).
    RawLine(String),

    /// The connection was closed, by request or by a transport failure.
    Disconnected {
        reason: String,
    },
}
