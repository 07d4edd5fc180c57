//! Parent frame on the process's standard streams.
//!
//! Outbound messages are written to stdout as one JSON object per line;
//! inbound messages are read from stdin the same way.

use std::io::Write;
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use xenote_bridge::Transport;
use xenote_bridge::transport::InboundSender;
use xenote_core::error::{Result, XenoteError};
use xenote_core::protocol::Message;

/// Writes outbound messages to stdout.
///
/// The process on the other end of the pipe is trusted, so every target
/// origin is accepted.
pub struct StdioTransport {
    stdout: Mutex<std::io::Stdout>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(std::io::stdout()),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StdioTransport {
    fn post_message(&self, message: &Message, target_origin: &str) -> Result<()> {
        let line = serde_json::to_string(message)?;
        let mut stdout = self
            .stdout
            .lock()
            .map_err(|_| XenoteError::Transport("stdout lock poisoned".into()))?;
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        debug!(topic = %message.topic, target_origin, "Wrote message to stdout");
        Ok(())
    }
}

/// Forward stdin lines to the bridge until EOF.
pub async fn pump_stdin(inbound: InboundSender) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(line) {
            Ok(message) => {
                if inbound.send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Ignoring malformed message on stdin"),
        }
    }
    debug!("Stdin closed");
    Ok(())
}
