//! Message codec.
//!
//! Wire form: `[:<prefix> ]<command>[ <params>][ :<trailing>]`. Parsing and
//! formatting are pure functions with no I/O.

use std::fmt;

use crate::error::ParseError;

/// A single protocol line split into its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    raw: String,
    prefix: Option<String>,
    command: String,
    params: Vec<String>,
    trailing: Option<String>,
}

impl Message {
    /// Build an outbound message. Outbound messages never carry a prefix;
    /// the server assigns one.
    pub fn new(command: impl Into<String>, params: Vec<String>, trailing: Option<String>) -> Self {
        let mut msg = Self {
            raw: String::new(),
            prefix: None,
            command: command.into(),
            params,
            trailing,
        };
        msg.raw = msg.render();
        msg
    }

    pub fn parse(line: &str) -> Result<Self, ParseError> {
        parse(line)
    }

    /// Sender identity, or `""` when the line had none.
    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Final parameter, or `""` when absent. Use [`Message::trailing_opt`]
    /// to tell `CMD :` apart from `CMD`.
    pub fn trailing(&self) -> &str {
        self.trailing.as_deref().unwrap_or("")
    }

    pub fn trailing_opt(&self) -> Option<&str> {
        self.trailing.as_deref()
    }

    /// Short nickname from a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()?
            .split_once('!')
            .map(|(nick, _)| nick)
    }

    /// The original line, without its terminator.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn render(&self) -> String {
        let mut line = self.command.clone();
        if !self.params.is_empty() {
            line.push(' ');
            line.push_str(&self.params.join(" "));
        }
        if let Some(ref trailing) = self.trailing {
            line.push_str(" :");
            line.push_str(trailing);
        }
        line
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse one line. Surrounding whitespace, including the line terminator,
/// is ignored.
pub fn parse(line: &str) -> Result<Message, ParseError> {
    let raw = line.trim();
    if raw.is_empty() {
        return Err(ParseError::EmptyLine);
    }

    let mut rest = raw;
    let mut prefix = None;
    if let Some(stripped) = rest.strip_prefix(':') {
        let (p, remainder) = stripped.split_once(' ').unwrap_or((stripped, ""));
        prefix = Some(p.to_string()).filter(|p| !p.is_empty());
        rest = remainder;
    }

    let (command, rest) = rest.split_once(' ').unwrap_or((rest, ""));
    if command.is_empty() {
        return Err(ParseError::UnknownCommand);
    }

    let (params, trailing) = if let Some(trailing) = rest.strip_prefix(':') {
        (Vec::new(), Some(trailing))
    } else if let Some((middle, trailing)) = rest.split_once(" :") {
        (split_params(middle), Some(trailing))
    } else {
        (split_params(rest), None)
    };

    Ok(Message {
        raw: raw.to_string(),
        prefix,
        command: command.to_string(),
        params,
        trailing: trailing.map(str::to_string),
    })
}

/// Render a message for the wire, CRLF included. The prefix is never
/// written.
pub fn format(msg: &Message) -> String {
    let mut line = msg.render();
    line.push_str("\r\n");
    line
}

fn split_params(middle: &str) -> Vec<String> {
    middle
        .trim_end()
        .split(' ')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
