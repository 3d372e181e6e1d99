//! lineirc-bots: small programs built on lineirc-sdk.
//!
//! - [`echo`] — a handler that repeats messages addressed to the bot
//! - [`session`] — registration and stdin forwarding shared by the binaries

pub mod echo;
pub mod session;
