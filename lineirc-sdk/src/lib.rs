//! lineirc-sdk: client side of a line-oriented, IRC-style chat protocol.
//!
//! - [`irc`] parses and formats single protocol lines.
//! - [`transport`] frames lines over an async byte stream.
//! - [`connection`] owns the socket, the read task and the write path.
//! - [`handler`] defines handlers and the built-in keep-alive responder.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use lineirc_sdk::connection::{ConnectConfig, Connection};
//!
//! let (conn, mut events) = Connection::dial(ConnectConfig {
//!     server_addr: "irc.example.net:6667".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//! conn.send("NICK demo").await?;
//! conn.send("USER demo * * :Demo").await?;
//!
//! let serving = conn.clone();
//! tokio::spawn(async move { serving.serve().await });
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod event;
pub mod handler;
pub mod irc;
pub mod transport;

pub use connection::{ConnectConfig, Connection, State};
pub use error::{Error, ParseError};
pub use event::Event;
pub use handler::{Handler, HandlerFuture, Outbound};
pub use irc::Message;
