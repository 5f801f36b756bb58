use std::fmt;

use keybot_core::intent::{Intent, IntentRouter};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::responder::{Responder, SendError};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed socket mode frame: {0}")]
    Frame(#[source] serde_json::Error),
    #[error("events api payload did not match the expected shape: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("`{event_type}` event did not match the expected shape: {source}")]
    Event { event_type: String, source: serde_json::Error },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeCategory {
    Hello,
    EventsApi,
    SlashCommands,
    Interactive,
    Disconnect,
    Other(String),
}

impl EnvelopeCategory {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "hello" => Self::Hello,
            "events_api" => Self::EventsApi,
            "slash_commands" => Self::SlashCommands,
            "interactive" => Self::Interactive,
            "disconnect" => Self::Disconnect,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::EventsApi => "events_api",
            Self::SlashCommands => "slash_commands",
            Self::Interactive => "interactive",
            Self::Disconnect => "disconnect",
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for EnvelopeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One Socket Mode frame. `envelope_id` is empty for frames Slack does not
/// expect to be acknowledged (`hello`, `disconnect`).
#[derive(Clone, Debug, PartialEq)]
pub struct SocketEnvelope {
    pub envelope_id: String,
    pub category: EnvelopeCategory,
    pub retry_attempt: Option<u32>,
    pub payload: Value,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: String,
    #[serde(default)]
    retry_attempt: Option<u32>,
    #[serde(default)]
    payload: Value,
}

impl SocketEnvelope {
    pub fn from_text(text: &str) -> Result<Self, DecodeError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(DecodeError::Frame)?;
        Ok(Self {
            envelope_id: raw.envelope_id,
            category: EnvelopeCategory::from_wire(&raw.kind),
            retry_attempt: raw.retry_attempt,
            payload: raw.payload,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventsApiPayload {
    pub callback_type: String,
    pub team_id: Option<String>,
    pub event_id: Option<String>,
    pub event: InboundEvent,
}

#[derive(Deserialize)]
struct RawEventsApiPayload {
    #[serde(rename = "type")]
    callback_type: String,
    #[serde(default)]
    team_id: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    event: Value,
}

impl EventsApiPayload {
    /// Serde also fills structs from sequences, so the object shape of both
    /// the payload and its inner `event` is checked explicitly.
    pub fn decode(payload: &Value) -> Result<Self, DecodeError> {
        if !payload.is_object() {
            return Err(shape_mismatch("payload is not a json object"));
        }
        let raw = RawEventsApiPayload::deserialize(payload).map_err(DecodeError::Payload)?;
        if !raw.event.is_object() {
            return Err(shape_mismatch("`event` is missing or not a json object"));
        }
        Ok(Self {
            callback_type: raw.callback_type,
            team_id: raw.team_id,
            event_id: raw.event_id,
            event: InboundEvent::decode(raw.event)?,
        })
    }
}

fn shape_mismatch(reason: &str) -> DecodeError {
    DecodeError::Payload(serde::de::Error::custom(reason))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Message(MessageEvent),
    AppMention(AppMentionEvent),
    MetadataPosted(MetadataEvent),
    MetadataUpdated(MetadataEvent),
    MetadataDeleted(MetadataEvent),
    Other { event_type: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    #[serde(default, deserialize_with = "nullable")]
    pub user: String,
    #[serde(default, deserialize_with = "nullable")]
    pub text: String,
    #[serde(default, deserialize_with = "nullable")]
    pub channel: String,
    #[serde(default, deserialize_with = "nullable")]
    pub bot_id: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub client_msg_id: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub files: Vec<SlackFile>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AppMentionEvent {
    #[serde(default, deserialize_with = "nullable")]
    pub user: String,
    #[serde(default, deserialize_with = "nullable")]
    pub text: String,
    #[serde(default, deserialize_with = "nullable")]
    pub channel: String,
    #[serde(default, deserialize_with = "nullable")]
    pub bot_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

/// Shared shape of the `message_metadata_*` events.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MetadataEvent {
    #[serde(default, deserialize_with = "nullable")]
    pub app_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub bot_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub user_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub channel_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub message_ts: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SlackFile {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// Reads an explicit `null` as the default value.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageFields<'a> {
    pub text: &'a str,
    pub channel: &'a str,
    pub user: &'a str,
}

impl InboundEvent {
    pub fn decode(event: Value) -> Result<Self, DecodeError> {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default().to_owned();
        let decoded = match event_type.as_str() {
            "message" => serde_json::from_value(event).map(Self::Message),
            "app_mention" => serde_json::from_value(event).map(Self::AppMention),
            "message_metadata_posted" => serde_json::from_value(event).map(Self::MetadataPosted),
            "message_metadata_updated" => serde_json::from_value(event).map(Self::MetadataUpdated),
            "message_metadata_deleted" => serde_json::from_value(event).map(Self::MetadataDeleted),
            _ => Ok(Self::Other { event_type: event_type.clone() }),
        };

        decoded.map_err(|source| DecodeError::Event { event_type, source })
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::AppMention(_) => "app_mention",
            Self::MetadataPosted(_) => "message_metadata_posted",
            Self::MetadataUpdated(_) => "message_metadata_updated",
            Self::MetadataDeleted(_) => "message_metadata_deleted",
            Self::Other { event_type } => event_type,
        }
    }

    /// Bot identifier of the event's author, `None` for kinds that carry none.
    pub fn bot_id(&self) -> Option<&str> {
        match self {
            Self::Message(event) => Some(event.bot_id.as_str()),
            Self::AppMention(event) => Some(event.bot_id.as_str()),
            Self::MetadataPosted(event)
            | Self::MetadataUpdated(event)
            | Self::MetadataDeleted(event) => Some(event.bot_id.as_str()),
            Self::Other { .. } => None,
        }
    }

    /// Text, channel and author of message-shaped events. Only these are
    /// ever replied to.
    pub fn message_fields(&self) -> Option<MessageFields<'_>> {
        match self {
            Self::Message(event) => Some(MessageFields {
                text: &event.text,
                channel: &event.channel,
                user: &event.user,
            }),
            Self::AppMention(event) => Some(MessageFields {
                text: &event.text,
                channel: &event.channel,
                user: &event.user,
            }),
            Self::MetadataPosted(_)
            | Self::MetadataUpdated(_)
            | Self::MetadataDeleted(_)
            | Self::Other { .. } => None,
        }
    }
}

/// True when the bot identifier is set. Unknown kinds are never treated as
/// self-originated.
pub fn is_self_originated(event: &InboundEvent) -> bool {
    event.bot_id().is_some_and(|bot_id| !bot_id.is_empty())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Replied(Intent),
    SelfEcho,
    Ignored,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Reply(#[from] SendError),
}

pub struct EventDispatcher {
    router: IntentRouter,
    responder: Responder,
}

impl EventDispatcher {
    pub fn new(router: IntentRouter, responder: Responder) -> Self {
        Self { router, responder }
    }

    pub async fn dispatch(
        &self,
        event: &InboundEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        if is_self_originated(event) {
            debug!(
                correlation_id = %ctx.correlation_id,
                event_type = event.event_type(),
                bot_id = event.bot_id().unwrap_or_default(),
                "skipping self-originated event"
            );
            return Ok(HandlerResult::SelfEcho);
        }

        let Some(fields) = event.message_fields() else {
            info!(
                correlation_id = %ctx.correlation_id,
                event_type = event.event_type(),
                "not a message event"
            );
            return Ok(HandlerResult::Ignored);
        };

        log_message_event(event, ctx);

        let intent = self.router.classify(fields.text);
        self.responder.reply(fields.channel, intent, fields.user).await?;
        Ok(HandlerResult::Replied(intent))
    }
}

fn log_message_event(event: &InboundEvent, ctx: &EventContext) {
    match event {
        InboundEvent::Message(message) => {
            let file_ids: Vec<&str> = message.files.iter().map(|file| file.id.as_str()).collect();
            info!(
                event_name = "ingress.slack.message",
                correlation_id = %ctx.correlation_id,
                user = %message.user,
                channel = %message.channel,
                subtype = message.subtype.as_deref().unwrap_or("none"),
                client_msg_id = message.client_msg_id.as_deref().unwrap_or("none"),
                file_count = message.files.len(),
                file_ids = ?file_ids,
                "received message event"
            );
            debug!(correlation_id = %ctx.correlation_id, text = %message.text, "message text");
        }
        InboundEvent::AppMention(mention) => {
            info!(
                event_name = "ingress.slack.app_mention",
                correlation_id = %ctx.correlation_id,
                user = %mention.user,
                channel = %mention.channel,
                "received app mention event"
            );
            debug!(correlation_id = %ctx.correlation_id, text = %mention.text, "mention text");
        }
        _ => {}
    }
}
