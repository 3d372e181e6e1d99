//! echobot: joins channels and repeats whatever is addressed to it.
//!
//!   echobot --server irc.example.net:6667 --nick echobot rust lineirc
//!
//! Lines typed on stdin are sent to the server as-is (`PRIVMSG #rust :hi`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use lineirc_bots::echo::EchoHandler;
use lineirc_bots::session;
use lineirc_sdk::{ConnectConfig, Connection, Event};

#[derive(Parser)]
#[command(name = "echobot", about = "Echo bot for line-protocol chat servers")]
struct Args {
    /// Server address (host:port)
    #[arg(long, env = "LINEIRC_SERVER", default_value = "127.0.0.1:6667")]
    server: String,

    /// Bot nick
    #[arg(long, env = "LINEIRC_NICK", default_value = "echobot")]
    nick: String,

    /// Real name sent with USER
    #[arg(long, default_value = "lineirc echo bot")]
    name: String,

    /// Log every line sent and received
    #[arg(long)]
    verbose: bool,

    /// Channels to join (`#` is added when missing)
    channels: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "echobot=info,lineirc_bots=info,lineirc_sdk=info".into()),
        )
        .init();

    let args = Args::parse();

    let (conn, mut events) = Connection::dial(ConnectConfig {
        server_addr: args.server.clone(),
        verbose: args.verbose,
        ..Default::default()
    })
    .await?;
    tracing::info!(server = %args.server, nick = %args.nick, "Connected");

    session::register(&conn, &args.nick, &args.name).await?;
    conn.install_handler(Arc::new(EchoHandler::new(&args.nick)))?;
    for channel in &args.channels {
        conn.queue(&format!("JOIN {}", session::channel_name(channel))).await?;
    }

    let stdin_conn = conn.clone();
    tokio::spawn(async move {
        if let Err(e) = session::forward_stdin(stdin_conn).await {
            tracing::warn!("stdin forwarding stopped: {e:#}");
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::HandlerFailed { handler, command, error } => {
                    tracing::warn!(handler, command = %command, "Handler error: {error}");
                }
                Event::Disconnected { reason } => tracing::info!("Disconnected: {reason}"),
                _ => {}
            }
        }
    });

    let serving = conn.clone();
    let serve = tokio::spawn(async move { serving.serve().await });

    tokio::select! {
        result = serve => result??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, quitting");
            if conn.send("QUIT :echobot shutting down").await.is_ok() {
                // Give the server a moment to close its side first.
                let _ = tokio::time::timeout(Duration::from_secs(2), conn.closed()).await;
            }
            conn.terminate().await;
        }
    }

    Ok(())
}
