//! Echo handler: repeats anything addressed to the bot.
//!
//! `PRIVMSG #chan :echobot: hello` is answered with `PRIVMSG #chan :hello`.
//! Private messages are answered to the sender.

use std::sync::OnceLock;

use lineirc_sdk::{Handler, HandlerFuture, Message, Outbound};

pub struct EchoHandler {
    nick: String,
    outbound: OnceLock<Outbound>,
}

impl EchoHandler {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            outbound: OnceLock::new(),
        }
    }

    /// The line to send back for `msg`, if it is addressed to us.
    pub fn reply_for(&self, msg: &Message) -> Option<String> {
        if msg.command() != "PRIVMSG" {
            return None;
        }
        let rest = msg.trailing().strip_prefix(self.nick.as_str())?;
        if !rest.starts_with([':', ',', ' ']) {
            return None;
        }
        let body = rest.trim_start_matches([':', ',']).trim();
        if body.is_empty() {
            return None;
        }

        let target = msg.params().first()?;
        let target = if *target == self.nick {
            msg.nick()?
        } else {
            target.as_str()
        };
        Some(format!("PRIVMSG {target} :{body}"))
    }
}

impl Handler for EchoHandler {
    fn initialize(&self, outbound: Outbound) -> anyhow::Result<()> {
        self.outbound
            .set(outbound)
            .map_err(|_| anyhow::anyhow!("echo handler initialized twice"))
    }

    fn handle_message<'a>(&'a self, msg: &'a Message) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Some(reply) = self.reply_for(msg) else {
                return Ok(());
            };
            let Some(outbound) = self.outbound.get() else {
                anyhow::bail!("echo handler used before initialize");
            };
            tracing::debug!(nick = %self.nick, "Echoing: {reply}");
            outbound.queue(&reply).await?;
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}
