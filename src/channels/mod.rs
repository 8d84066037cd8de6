//! Chat transport abstraction.
//!
//! A [`Channel`] feeds inbound events into one shared stream and delivers
//! replies back to the originating user. The webhook plumbing (signature
//! verification, HTTP server) lives outside this crate; adapters here only
//! carry the event contract and the outbound delivery call.

pub mod console;
pub mod line;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error::ChannelError;

/// One inbound chat event: a free-text message or a menu-driven postback.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Name of the channel the event arrived on.
    pub channel: String,
    /// Platform-issued user identifier.
    pub user_id: String,
    pub kind: EventKind,
    /// One-shot reply credential, when the transport issues one.
    pub reply_token: Option<String>,
}

impl InboundEvent {
    pub fn message(channel: impl Into<String>, user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            user_id: user_id.into(),
            kind: EventKind::Message(text.into()),
            reply_token: None,
        }
    }

    pub fn postback(channel: impl Into<String>, user_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            user_id: user_id.into(),
            kind: EventKind::Postback(payload.into()),
            reply_token: None,
        }
    }
}

/// Raw event payload. Postbacks carry the transport's payload string
/// verbatim; the dialog machine is the sole interpreter, so a malformed
/// payload becomes a help reply rather than a transport error.
#[derive(Debug, Clone)]
pub enum EventKind {
    Message(String),
    Postback(String),
}

/// Structured actions the core consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostbackAction {
    Register,
    Job,
    ViewProfile,
}

/// Steps within an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostbackStep {
    Register,
    List,
    View,
    Apply,
    MyApplications,
}

/// Parsed `action=<name>&step=<name>[&job_id=<uuid>]` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Postback {
    pub action: PostbackAction,
    pub step: PostbackStep,
    pub job_id: Option<Uuid>,
}

impl Postback {
    /// Parse a postback payload string. Unknown keys are ignored; unknown
    /// or missing action/step values are errors the caller answers with a
    /// generic help reply.
    pub fn parse(raw: &str) -> Result<Self, ChannelError> {
        let mut action = None;
        let mut step = None;
        let mut job_id = None;

        for pair in raw.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = urlencoding::decode(value)
                .map_err(|e| ChannelError::InvalidEvent(format!("bad encoding in '{pair}': {e}")))?;
            match key {
                "action" => {
                    action = Some(match value.as_ref() {
                        "register" => PostbackAction::Register,
                        "job" => PostbackAction::Job,
                        "view_profile" => PostbackAction::ViewProfile,
                        other => {
                            return Err(ChannelError::InvalidEvent(format!(
                                "unknown action '{other}'"
                            )))
                        }
                    });
                }
                "step" => {
                    step = Some(match value.as_ref() {
                        "register" => PostbackStep::Register,
                        "list" => PostbackStep::List,
                        "view" => PostbackStep::View,
                        "apply" => PostbackStep::Apply,
                        "my_applications" => PostbackStep::MyApplications,
                        other => {
                            return Err(ChannelError::InvalidEvent(format!("unknown step '{other}'")))
                        }
                    });
                }
                "job_id" => {
                    job_id = Some(value.parse::<Uuid>().map_err(|e| {
                        ChannelError::InvalidEvent(format!("bad job_id '{value}': {e}"))
                    })?);
                }
                _ => {}
            }
        }

        match (action, step) {
            (Some(action), Some(step)) => Ok(Self {
                action,
                step,
                job_id,
            }),
            _ => Err(ChannelError::InvalidEvent(
                "payload missing action or step".to_string(),
            )),
        }
    }
}

/// A single text reply addressed to the originating user. Exactly one per
/// inbound event.
#[derive(Debug, Clone)]
pub struct OutgoingReply {
    pub text: String,
}

impl OutgoingReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A chat transport adapter.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin producing inbound events into `events`. Returns once the
    /// channel is live; production continues in background tasks.
    async fn start(&self, events: mpsc::Sender<InboundEvent>) -> Result<(), ChannelError>;

    /// Deliver one reply for one inbound event.
    async fn respond(&self, event: &InboundEvent, reply: OutgoingReply) -> Result<(), ChannelError>;
}

/// Holds the configured channels and the merged inbound stream.
pub struct ChannelManager {
    channels: Vec<Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Self {
        Self { channels }
    }

    /// Start every channel, all feeding one bounded queue.
    pub async fn start_all(&self) -> Result<ReceiverStream<InboundEvent>, ChannelError> {
        let (tx, rx) = mpsc::channel(256);
        for channel in &self.channels {
            channel.start(tx.clone()).await?;
            tracing::info!(channel = channel.name(), "channel started");
        }
        Ok(ReceiverStream::new(rx))
    }

    /// Route a reply back through the channel the event arrived on.
    pub async fn respond(
        &self,
        event: &InboundEvent,
        reply: OutgoingReply,
    ) -> Result<(), ChannelError> {
        let channel = self
            .channels
            .iter()
            .find(|c| c.name() == event.channel)
            .ok_or_else(|| ChannelError::UnknownChannel(event.channel.clone()))?;
        channel.respond(event, reply).await
    }
}
