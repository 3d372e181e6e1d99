//! lineirc-client: a bare terminal client.
//!
//! Prints everything the server sends and forwards typed lines verbatim.
//! `help` lists a few commands, `quit` leaves.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use lineirc_bots::session;
use lineirc_sdk::{ConnectConfig, Connection, Event};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "
quit                                - close the client
help                                - this text

JOIN <channel>{,<channel>}          - join channels
PART <channel>{,<channel>}          - leave channels
PRIVMSG <target> :<message>         - send a message

Protocol reference: https://tools.ietf.org/html/rfc1459
";

#[derive(Parser)]
#[command(name = "lineirc-client", about = "Terminal client for line-protocol chat servers")]
struct Args {
    /// Server address (host:port)
    #[arg(long, env = "LINEIRC_SERVER", default_value = "127.0.0.1:6667")]
    server: String,

    /// Nickname
    #[arg(long, env = "LINEIRC_NICK", default_value = "lineirc-client")]
    nick: String,

    /// Real name sent with USER
    #[arg(long, default_value = "lineirc client")]
    name: String,

    /// Log every line sent and received
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lineirc_client=warn,lineirc_sdk=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let (conn, mut events) = Connection::dial(ConnectConfig {
        server_addr: args.server.clone(),
        verbose: args.verbose,
        ..Default::default()
    })
    .await?;
    session::register(&conn, &args.nick, &args.name).await?;

    let serving = conn.clone();
    tokio::spawn(async move {
        if let Err(e) = serving.serve().await {
            tracing::warn!("Connection lost: {e}");
        }
    });

    println!("\n** Connected to {}. Type `help` for commands **\n", args.server);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::Message(msg) if msg.command() == "PRIVMSG" => {
                    let from = msg.nick().unwrap_or(msg.prefix());
                    let target = msg.params().first().map(String::as_str).unwrap_or("");
                    println!("{from} -> {target}: {}", msg.trailing());
                }
                Event::Message(msg) => println!("> {msg}"),
                Event::Disconnected { reason } => println!("** Disconnected: {reason}"),
                _ => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "help" => println!("{HELP}"),
                    "quit" => break,
                    text => {
                        if let Err(e) = conn.send(text).await {
                            println!("** {e}");
                        }
                    }
                }
            }
            _ = conn.closed() => break,
        }
    }

    if conn.send("QUIT").await.is_ok() {
        let _ = tokio::time::timeout(Duration::from_secs(2), conn.closed()).await;
    }
    conn.terminate().await;
    let _ = printer.await;
    Ok(())
}
