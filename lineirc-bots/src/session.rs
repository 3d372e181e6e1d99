//! Session helpers shared by the binaries.

use lineirc_sdk::Connection;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Send the NICK/USER pair that opens a session.
pub async fn register(conn: &Connection, nick: &str, realname: &str) -> lineirc_sdk::error::Result<()> {
    conn.send(&format!("NICK {nick}")).await?;
    conn.send(&format!("USER {nick} * * :{realname}")).await
}

/// `rust` → `#rust`; names that already carry `#` or `&` are kept.
pub fn channel_name(name: &str) -> String {
    if name.starts_with(['#', '&']) {
        name.to_string()
    } else {
        format!("#{name}")
    }
}

/// Forward non-empty stdin lines as raw protocol lines until EOF.
pub async fn forward_stdin(conn: Connection) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = conn.send(line).await {
            match e {
                lineirc_sdk::Error::Parse(_) => tracing::warn!("Not sent ({e}): {line}"),
                _ => return Err(e.into()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_get_a_hash() {
        assert_eq!(channel_name("rust"), "#rust");
        assert_eq!(channel_name("#rust"), "#rust");
        assert_eq!(channel_name("&local"), "&local");
    }
}
