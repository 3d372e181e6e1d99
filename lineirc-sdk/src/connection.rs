//! Connection lifecycle: dial, read task, direct and queued writes, serve loop.
//!
//! A connection moves through `Idle → Active → (Serving) → Terminated`.
//!
//! - **Active**: the read task is running. [`Connection::send`] writes
//!   straight to the socket, so code written before `serve` needs no extra
//!   synchronization.
//! - **Serving**: [`Connection::serve`] owns the write half. `send` now
//!   enqueues, and every write goes through one FIFO queue.
//!
//! The hand-off between the two writers happens while holding the writer
//! mutex, so a direct write can never interleave with the serve loop.
//!
//! Inbound messages are parsed and dispatched to handlers inside the read
//! task, one at a time, in arrival order. The keep-alive handler is always
//! handler #0 and answers `PING` through the queue.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::instrument::{Instrumented, WithDispatch, WithSubscriber};
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::handler::{Handler, Handlers, KeepAlive, Outbound};
use crate::irc::{self, Message};
use crate::transport::{BoxedReader, BoxedWriter, LineReader, LineWriter, DEFAULT_MAX_LINE_LEN};

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed, not yet reading.
    Idle,
    /// Read task running; sends are direct writes.
    Active,
    /// Serve loop running; sends are queued.
    Serving,
    /// Transport closed. No further I/O.
    Terminated,
}

/// Configuration for connecting to a server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Log raw traffic at `info` and emit [`Event::RawLine`]. Display only.
    pub verbose: bool,
    /// Capacity of the outbound queue. Senders wait when it is full.
    pub queue_capacity: usize,
    /// Capacity of the event channel returned by [`Connection::dial`].
    pub event_capacity: usize,
    /// Inbound lines longer than this are dropped.
    pub max_line_len: usize,
    /// Where this connection's logs go. `None` uses the caller's default
    /// subscriber at construction time.
    pub log_dispatch: Option<tracing::Dispatch>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            verbose: false,
            queue_capacity: 100,
            event_capacity: 4096,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            log_dispatch: None,
        }
    }
}

/// A handle to one connection. Cheap to clone; all clones share the socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    verbose: bool,
    state: watch::Sender<State>,
    writer: tokio::sync::Mutex<LineWriter<BoxedWriter>>,
    queue_tx: mpsc::Sender<Message>,
    // Taken by the serve loop, or closed on termination.
    queue_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    // Taken by `start`.
    reader: Mutex<Option<(LineReader<BoxedReader>, mpsc::Sender<Event>)>>,
    handlers: Handlers,
    dispatch: tracing::Dispatch,
    span: tracing::Span,
}

impl Connection {
    /// Open a TCP connection and start reading.
    ///
    /// Returns the connection and the stream of [`Event`]s produced by the
    /// read task. Events are delivered with backpressure: a consumer that
    /// stops reading eventually stalls dispatch.
    ///
    /// Keep-alive `PONG`s go through the outbound queue and are only written
    /// once [`Connection::serve`] runs. Without a serve loop they are dropped
    /// once the queue fills, and the server will eventually time us out.
    pub async fn dial(config: ConnectConfig) -> Result<(Self, mpsc::Receiver<Event>)> {
        let dispatch = resolve_dispatch(&config);
        let addr = config.server_addr.clone();

        let tcp = async {
            tracing::debug!("Connecting to {addr}...");
            TcpStream::connect(&addr).await
        }
        .with_subscriber(dispatch)
        .await
        .map_err(|source| Error::Dial {
            addr: addr.clone(),
            source,
        })?;

        let (reader, writer) = tcp.into_split();
        let (conn, events) = Self::new(reader, writer, config);
        conn.start()?;
        Ok((conn, events))
    }

    /// Wrap an already-open stream. The connection starts `Idle`; call
    /// [`Connection::start`] to begin reading.
    pub fn new<R, W>(reader: R, writer: W, config: ConnectConfig) -> (Self, mpsc::Receiver<Event>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let dispatch = resolve_dispatch(&config);
        let span = tracing::dispatcher::with_default(&dispatch, || {
            tracing::info_span!("connection", server = %config.server_addr)
        });

        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (state, _) = watch::channel(State::Idle);

        let reader: BoxedReader = Box::new(BufReader::new(reader));
        let writer: BoxedWriter = Box::new(writer);

        let inner = Arc::new(Inner {
            verbose: config.verbose,
            state,
            writer: tokio::sync::Mutex::new(LineWriter::new(writer)),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            reader: Mutex::new(Some((LineReader::new(reader, config.max_line_len), event_tx))),
            handlers: Handlers::default(),
            dispatch,
            span,
        });

        let conn = Self { inner };
        let keep_alive = Arc::new(KeepAlive::new());
        // Infallible: the keep-alive handler only stores the queue handle.
        let _ = keep_alive.initialize(conn.outbound());
        conn.register_handler(keep_alive);

        (conn, event_rx)
    }

    /// Spawn the read task, moving `Idle → Active`. Calling it again while
    /// running is a no-op.
    ///
    /// Reading never waits on the outbound queue: if nothing serves it, the
    /// keep-alive drops `PONG`s once it is full and reports
    /// [`Event::HandlerFailed`] instead.
    pub fn start(&self) -> Result<()> {
        let mut started = false;
        self.inner.state.send_if_modified(|state| {
            if *state == State::Idle {
                *state = State::Active;
                started = true;
            }
            started
        });

        if !started {
            return match self.state() {
                State::Terminated => Err(Error::Terminated),
                _ => Ok(()),
            };
        }

        let Some((reader, events)) = self.inner.reader.lock().take() else {
            return Ok(());
        };
        tracing::dispatcher::with_default(&self.inner.dispatch, || {
            tracing::debug!(parent: &self.inner.span, "Read task starting");
        });
        let inner = self.inner.clone();
        tokio::spawn(self.scoped(read_task(inner, reader, events)));
        Ok(())
    }

    pub fn state(&self) -> State {
        *self.inner.state.borrow()
    }

    /// Send one line.
    ///
    /// The text is parsed and re-formatted, so a missing CRLF is added and
    /// malformed text is rejected with [`Error::Parse`]. Before `serve`
    /// this writes directly and returns once the bytes are written; while
    /// serving it enqueues and returns once the message is queued.
    pub async fn send(&self, text: &str) -> Result<()> {
        self.scoped(self.inner.send(text)).await
    }

    /// Enqueue one line for the serve loop, whatever the current state.
    ///
    /// Queued messages are only written once [`Connection::serve`] runs.
    pub async fn queue(&self, text: &str) -> Result<()> {
        self.scoped(self.outbound().queue(text)).await
    }

    /// A handle onto the outbound queue, for handlers.
    pub fn outbound(&self) -> Outbound {
        self.inner.outbound()
    }

    /// Append a handler. It still needs [`Handler::initialize`] before it
    /// can queue replies; see [`Connection::install_handler`].
    pub fn register_handler(&self, handler: Arc<dyn Handler>) {
        self.inner.handlers.push(handler);
    }

    /// Initialize `handler` with this connection's outbound queue, then
    /// register it. A failed initialize leaves the handler unregistered.
    pub fn install_handler(&self, handler: Arc<dyn Handler>) -> anyhow::Result<()> {
        handler.initialize(self.outbound())?;
        self.register_handler(handler);
        Ok(())
    }

    /// Number of registered handlers, the keep-alive handler included.
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.len()
    }

    /// Take over the write half and write queued messages until the
    /// connection terminates.
    ///
    /// Starts the read task first if the connection is still idle. Returns
    /// `Ok(())` after [`Connection::terminate`], or the write error that
    /// ended the connection.
    pub async fn serve(&self) -> Result<()> {
        self.start()?;
        self.scoped(self.inner.clone().serve()).await
    }

    /// Close the outbound queue and the transport. Blocked senders fail
    /// with [`Error::Terminated`], the read task stops, and no further
    /// messages are dispatched. Safe to call more than once.
    pub async fn terminate(&self) {
        self.scoped(self.inner.terminate()).await
    }

    /// Resolves once the connection is terminated.
    pub async fn closed(&self) {
        terminated(self.inner.state.subscribe()).await
    }

    fn scoped<F: Future>(&self, fut: F) -> WithDispatch<Instrumented<F>> {
        fut.instrument(self.inner.span.clone())
            .with_subscriber(self.inner.dispatch.clone())
    }
}

impl Inner {
    async fn send(&self, text: &str) -> Result<()> {
        let msg = Message::parse(text)?;

        // `Serving` only ever moves on to `Terminated`, which `push` handles,
        // so the queue path needs no writer lock.
        if *self.state.borrow() == State::Serving {
            return self.outbound().push(msg).await;
        }

        let mut writer = self.writer.lock().await;
        let state = *self.state.borrow();
        match state {
            State::Idle | State::Active => {
                let line = irc::format(&msg);
                self.log_outbound(&line);
                match self.write_line(&mut writer, &line).await {
                    Err(Error::Transport(e)) => {
                        tracing::warn!("Write error: {e}");
                        drop(writer);
                        self.terminate().await;
                        Err(Error::Transport(e))
                    }
                    written => written,
                }
            }
            State::Serving => {
                drop(writer);
                self.outbound().push(msg).await
            }
            State::Terminated => Err(Error::Terminated),
        }
    }

    async fn serve(self: Arc<Self>) -> Result<()> {
        let mut rx = {
            let _writer = self.writer.lock().await;
            match *self.state.borrow() {
                State::Terminated => return Err(Error::Terminated),
                State::Serving => return Err(Error::AlreadyServing),
                State::Idle | State::Active => {}
            }
            let Some(rx) = self.queue_rx.lock().take() else {
                return Err(Error::AlreadyServing);
            };
            self.state.send_replace(State::Serving);
            rx
        };
        tracing::debug!("Serving");

        let stop = terminated(self.state.subscribe());
        tokio::pin!(stop);

        let result = loop {
            let msg = tokio::select! {
                biased;
                _ = &mut stop => break Ok(()),
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break Ok(()),
                },
            };

            let mut writer = self.writer.lock().await;
            // `terminate` may have shut the writer down while we waited.
            if self.is_terminated() {
                break Ok(());
            }
            let line = irc::format(&msg);
            self.log_outbound(&line);
            match self.write_line(&mut writer, &line).await {
                Ok(()) => {}
                Err(Error::Terminated) => break Ok(()),
                Err(e) => {
                    tracing::warn!("Write error: {e}");
                    break Err(e);
                }
            }
        };

        rx.close();
        self.terminate().await;
        result
    }

    async fn terminate(&self) {
        let previous = self.state.send_replace(State::Terminated);
        if previous == State::Terminated {
            return;
        }
        tracing::debug!(from = ?previous, "Terminating");

        if let Some(mut rx) = self.queue_rx.lock().take() {
            rx.close();
        }
        // Never started: dropping the reader closes the event stream.
        drop(self.reader.lock().take());

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("Shutdown error: {e}");
        }
    }

    fn outbound(&self) -> Outbound {
        Outbound::new(self.queue_tx.clone(), self.state.subscribe())
    }

    /// Write one line, or give up with [`Error::Terminated`] once the
    /// connection terminates. A stalled peer must not pin the writer lock.
    async fn write_line(&self, writer: &mut LineWriter<BoxedWriter>, line: &str) -> Result<()> {
        tokio::select! {
            written = writer.write_line(line) => written.map_err(Error::Transport),
            _ = terminated(self.state.subscribe()) => Err(Error::Terminated),
        }
    }

    fn is_terminated(&self) -> bool {
        *self.state.borrow() == State::Terminated
    }

    fn log_outbound(&self, line: &str) {
        if self.verbose {
            tracing::info!("-> {}", line.trim_end());
        } else {
            tracing::trace!("-> {}", line.trim_end());
        }
    }
}

async fn read_task(
    inner: Arc<Inner>,
    mut reader: LineReader<BoxedReader>,
    events: mpsc::Sender<Event>,
) {
    let reason = tokio::select! {
        reason = read_loop(&inner, &mut reader, &events) => reason,
        _ = terminated(inner.state.subscribe()) => "terminated".to_string(),
    };

    tracing::debug!(%reason, "Read task finished");
    inner.terminate().await;
    let _ = events.try_send(Event::Disconnected { reason });
}

/// Read, parse and dispatch until EOF or a read error. Returns the reason.
async fn read_loop(
    inner: &Inner,
    reader: &mut LineReader<BoxedReader>,
    events: &mpsc::Sender<Event>,
) -> String {
    loop {
        let line = match reader.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return "EOF".to_string(),
            Err(e) => {
                tracing::warn!("Read error: {e}");
                return Error::Transport(e).to_string();
            }
        };

        if inner.verbose {
            tracing::info!("<- {line}");
            let _ = events.send(Event::RawLine(line.clone())).await;
        } else {
            tracing::trace!("<- {line}");
        }

        let msg = match Message::parse(&line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("Ignoring line ({e}): {line:?}");
                continue;
            }
        };

        if inner.is_terminated() {
            return "terminated".to_string();
        }

        for failure in inner.handlers.dispatch(&msg).await {
            let _ = events
                .send(Event::HandlerFailed {
                    handler: failure.handler,
                    command: msg.command().to_string(),
                    error: format!("{:#}", failure.error),
                })
                .await;
        }

        let _ = events.send(Event::Message(msg)).await;
    }
}

/// Resolves once `state` reads `Terminated` (or its sender is gone).
pub(crate) async fn terminated(mut state: watch::Receiver<State>) {
    loop {
        if *state.borrow_and_update() == State::Terminated {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

fn resolve_dispatch(config: &ConnectConfig) -> tracing::Dispatch {
    config
        .log_dispatch
        .clone()
        .unwrap_or_else(|| tracing::dispatcher::get_default(Clone::clone))
}
