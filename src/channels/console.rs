//! Stdin channel for local development.
//!
//! Lines are free-text messages for a single fixed user; lines starting
//! with `/postback ` are fed through as raw postback payloads, e.g.
//! `/postback action=job&step=list`.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::channels::{Channel, InboundEvent, OutgoingReply};
use crate::error::ChannelError;

const CONSOLE_USER: &str = "console-user";

#[derive(Default)]
pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn start(&self, events: mpsc::Sender<InboundEvent>) -> Result<(), ChannelError> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let event = match line.strip_prefix("/postback ") {
                            Some(payload) => {
                                InboundEvent::postback("console", CONSOLE_USER, payload)
                            }
                            None => InboundEvent::message("console", CONSOLE_USER, line),
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("console read error: {e}");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn respond(&self, _event: &InboundEvent, reply: OutgoingReply) -> Result<(), ChannelError> {
        let mut stdout = tokio::io::stdout();
        let text = format!("{}\n", reply.text);
        stdout
            .write_all(text.as_bytes())
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "console".to_string(),
                reason: e.to_string(),
            })?;
        stdout.flush().await.map_err(|e| ChannelError::SendFailed {
            name: "console".to_string(),
            reason: e.to_string(),
        })
    }
}
