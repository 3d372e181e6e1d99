//! Handler trait, outbound queue handle and in-order dispatch.
//!
//! Every inbound message is offered to every registered handler, in the
//! order they were registered. A failing handler is logged and skipped;
//! the remaining handlers still run.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};

use crate::connection::{self, State};
use crate::error::{Error, Result};
use crate::irc::Message;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Something that reacts to inbound messages.
///
/// Registration and initialization are separate steps: the connection
/// appends the handler, and the registering caller hands it an
/// [`Outbound`] through [`Handler::initialize`] so it can queue replies.
pub trait Handler: Send + Sync {
    fn initialize(&self, outbound: Outbound) -> anyhow::Result<()>;

    fn handle_message<'a>(&'a self, msg: &'a Message) -> HandlerFuture<'a>;

    /// Used in logs and [`Event::HandlerFailed`](crate::event::Event::HandlerFailed).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Sending half of a connection's bounded outbound queue.
///
/// Everything pushed here is written by the serve loop, in FIFO order.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Message>,
    state: watch::Receiver<State>,
}

impl Outbound {
    pub(crate) fn new(tx: mpsc::Sender<Message>, state: watch::Receiver<State>) -> Self {
        Self { tx, state }
    }

    /// Parse `text` and enqueue it. Waits while the queue is full.
    pub async fn queue(&self, text: &str) -> Result<()> {
        let msg = Message::parse(text)?;
        self.push(msg).await
    }

    /// Enqueue an already-built message. Waits while the queue is full and
    /// fails with [`Error::Terminated`] once the connection is gone.
    pub async fn push(&self, msg: Message) -> Result<()> {
        if *self.state.borrow() == State::Terminated {
            return Err(Error::Terminated);
        }
        tokio::select! {
            sent = self.tx.send(msg) => sent.map_err(|_| Error::Terminated),
            _ = connection::terminated(self.state.clone()) => Err(Error::Terminated),
        }
    }

    /// Enqueue without waiting. Fails with [`Error::QueueFull`] instead of
    /// blocking.
    pub fn try_push(&self, msg: Message) -> Result<()> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::Terminated),
        }
    }
}

/// Answers `PING` with `PONG`. Always handler #0 of a connection.
///
/// Runs inside the read task, so it never waits on the queue: with no room
/// left the `PONG` is dropped and reported as a handler failure.
pub(crate) struct KeepAlive {
    outbound: OnceLock<Outbound>,
}

impl KeepAlive {
    pub(crate) fn new() -> Self {
        Self {
            outbound: OnceLock::new(),
        }
    }
}

impl Handler for KeepAlive {
    fn initialize(&self, outbound: Outbound) -> anyhow::Result<()> {
        let _ = self.outbound.set(outbound);
        Ok(())
    }

    fn handle_message<'a>(&'a self, msg: &'a Message) -> HandlerFuture<'a> {
        Box::pin(async move {
            if msg.command() != "PING" {
                return Ok(());
            }
            let Some(outbound) = self.outbound.get() else {
                anyhow::bail!("keep-alive handler used before initialize");
            };
            // Some servers send the token as a middle param instead.
            let token = msg
                .trailing_opt()
                .or_else(|| msg.params().first().map(String::as_str))
                .unwrap_or("");
            let pong = Message::parse(&format!("PONG {token}"))?;
            outbound
                .try_push(pong)
                .map_err(|e| anyhow::anyhow!("PONG not queued: {e}"))
        })
    }

    fn name(&self) -> &'static str {
        "keep-alive"
    }
}

/// A handler error collected during one dispatch turn.
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub error: anyhow::Error,
}

/// Ordered, append-only handler list.
#[derive(Default)]
pub(crate) struct Handlers {
    list: RwLock<Vec<Arc<dyn Handler>>>,
}

impl Handlers {
    pub(crate) fn push(&self, handler: Arc<dyn Handler>) {
        self.list.write().push(handler);
    }

    pub(crate) fn len(&self) -> usize {
        self.list.read().len()
    }

    /// Offer `msg` to every handler in registration order.
    ///
    /// Works on a snapshot, so a handler may register further handlers
    /// without deadlocking; those see the next message.
    pub(crate) async fn dispatch(&self, msg: &Message) -> Vec<HandlerFailure> {
        let snapshot: Vec<Arc<dyn Handler>> = self.list.read().clone();
        let mut failures = Vec::new();
        for handler in snapshot {
            if let Err(error) = handler.handle_message(msg).await {
                tracing::warn!(handler = handler.name(), command = msg.command(), "Handler failed: {error:#}");
                failures.push(HandlerFailure {
                    handler: handler.name(),
                    error,
                });
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    impl Handler for Recorder {
        fn initialize(&self, _outbound: Outbound) -> anyhow::Result<()> {
            Ok(())
        }

        fn handle_message<'a>(&'a self, msg: &'a Message) -> HandlerFuture<'a> {
            Box::pin(async move {
                self.seen.lock().push(format!("{}:{}", self.tag, msg.command()));
                if self.fail_on == Some(msg.command()) {
                    anyhow::bail!("{} refuses {}", self.tag, msg.command());
                }
                Ok(())
            })
        }

        fn name(&self) -> &'static str {
            self.tag
        }
    }

    fn outbound(capacity: usize) -> (Outbound, mpsc::Receiver<Message>, watch::Sender<State>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(State::Active);
        (Outbound::new(tx, state_rx), rx, state_tx)
    }

    #[tokio::test]
    async fn dispatch_in_registration_order_despite_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handlers = Handlers::default();
        for (tag, fail_on) in [("a", None), ("b", Some("PRIVMSG")), ("c", None)] {
            handlers.push(Arc::new(Recorder {
                tag,
                seen: seen.clone(),
                fail_on,
            }));
        }

        let msg = Message::parse(":n!u@h PRIVMSG #c :hi").unwrap();
        let failures = handlers.dispatch(&msg).await;

        assert_eq!(*seen.lock(), ["a:PRIVMSG", "b:PRIVMSG", "c:PRIVMSG"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].handler, "b");
    }

    #[tokio::test]
    async fn keep_alive_queues_exactly_one_pong() {
        let (out, mut rx, _state) = outbound(4);
        let keep_alive = KeepAlive::new();
        keep_alive.initialize(out).unwrap();

        let ping = Message::parse("PING :X").unwrap();
        keep_alive.handle_message(&ping).await.unwrap();

        let pong = rx.try_recv().unwrap();
        assert_eq!(pong.command(), "PONG");
        assert_eq!(crate::irc::format(&pong), "PONG X\r\n");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn keep_alive_ignores_other_commands() {
        let (out, mut rx, _state) = outbound(4);
        let keep_alive = KeepAlive::new();
        keep_alive.initialize(out).unwrap();

        for line in [":s 001 me :Welcome", "PRIVMSG #c :PING", "PONG :X"] {
            keep_alive.handle_message(&Message::parse(line).unwrap()).await.unwrap();
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn keep_alive_echoes_middle_param() {
        let (out, mut rx, _state) = outbound(4);
        let keep_alive = KeepAlive::new();
        keep_alive.initialize(out).unwrap();

        keep_alive.handle_message(&Message::parse("PING irc.example.net").unwrap()).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().raw(), "PONG irc.example.net");
    }

    #[tokio::test]
    async fn keep_alive_drops_pong_when_queue_is_full() {
        let (out, mut rx, _state) = outbound(1);
        let keep_alive = KeepAlive::new();
        keep_alive.initialize(out).unwrap();

        let ping = Message::parse("PING :X").unwrap();
        keep_alive.handle_message(&ping).await.unwrap();
        let err = tokio::time::timeout(std::time::Duration::from_secs(1), keep_alive.handle_message(&ping))
            .await
            .expect("keep-alive must not wait for queue space")
            .unwrap_err();
        assert!(err.to_string().contains("full"), "{err}");

        assert_eq!(rx.try_recv().unwrap().raw(), "PONG X");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn try_push_reports_closed_queue_as_terminated() {
        let (out, rx, _state) = outbound(1);
        drop(rx);
        let msg = Message::parse("PONG :X").unwrap();
        assert!(matches!(out.try_push(msg), Err(Error::Terminated)));
    }

    #[tokio::test]
    async fn push_fails_after_termination() {
        let (out, _rx, state) = outbound(1);
        state.send_replace(State::Terminated);
        assert!(matches!(out.queue("NICK x").await, Err(Error::Terminated)));
    }

    #[tokio::test]
    async fn queue_rejects_unparseable_text() {
        let (out, _rx, _state) = outbound(1);
        assert!(matches!(out.queue("   ").await, Err(Error::Parse(_))));
    }
}
