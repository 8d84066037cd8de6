//! LINE Messaging API adapter.
//!
//! Inbound events are produced by the webhook layer outside this crate; it
//! obtains the queue handle via [`LineChannel::sender`] after startup and
//! pushes decoded events in. Outbound replies use the reply endpoint while
//! the event's one-shot reply token is available, falling back to push.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::sync::{mpsc, RwLock};

use crate::channels::{Channel, InboundEvent, OutgoingReply};
use crate::config::LineConfig;
use crate::error::ChannelError;

const REPLY_URL: &str = "https://api.line.me/v2/bot/message/reply";
const PUSH_URL: &str = "https://api.line.me/v2/bot/message/push";

pub struct LineChannel {
    client: reqwest::Client,
    access_token: SecretString,
    timeout: std::time::Duration,
    events: RwLock<Option<mpsc::Sender<InboundEvent>>>,
}

impl LineChannel {
    pub fn new(config: &LineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: config.access_token.clone(),
            timeout: config.timeout,
            events: RwLock::new(None),
        }
    }

    /// Queue handle for the webhook layer. `None` before [`Channel::start`].
    pub async fn sender(&self) -> Option<mpsc::Sender<InboundEvent>> {
        self.events.read().await.clone()
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<(), ChannelError> {
        let request = self
            .client
            .post(url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send();

        // A hung Messaging API call must not pin the sending worker.
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ChannelError::Timeout {
                name: "line".to_string(),
                timeout: self.timeout,
            })??;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "line".to_string(),
                reason: format!("{status}: {detail}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for LineChannel {
    fn name(&self) -> &str {
        "line"
    }

    async fn start(&self, events: mpsc::Sender<InboundEvent>) -> Result<(), ChannelError> {
        *self.events.write().await = Some(events);
        Ok(())
    }

    async fn respond(&self, event: &InboundEvent, reply: OutgoingReply) -> Result<(), ChannelError> {
        let messages = json!([{ "type": "text", "text": reply.text }]);
        match &event.reply_token {
            Some(token) => {
                self.post(
                    REPLY_URL,
                    json!({ "replyToken": token, "messages": messages }),
                )
                .await
            }
            None => {
                self.post(PUSH_URL, json!({ "to": event.user_id, "messages": messages }))
                    .await
            }
        }
    }
}
