use std::sync::Arc;

use async_trait::async_trait;
use keybot_core::intent::Intent;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("slack web api request failed: {0}")]
    Http(String),
    #[error("slack web api returned error `{0}`")]
    Api(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub channel: String,
    pub text: String,
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, reply: &OutboundReply) -> Result<(), SendError>;
}

#[derive(Clone)]
pub struct Responder {
    sender: Arc<dyn MessageSender>,
}

impl Responder {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }

    /// Sends exactly one reply. Failures are returned, never retried.
    pub async fn reply(&self, channel: &str, intent: Intent, user: &str) -> Result<(), SendError> {
        let reply = OutboundReply { channel: channel.to_owned(), text: intent.reply_text(user) };
        debug!(
            event_name = "egress.slack.reply",
            channel = %reply.channel,
            intent = %intent,
            "sending canned reply"
        );
        self.sender.send(&reply).await
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use keybot_core::intent::Intent;

    use super::{test_support::RecordingSender, Responder, SendError};

    #[tokio::test]
    async fn maps_each_intent_to_its_canned_text() {
        let sender = Arc::new(RecordingSender::default());
        let responder = Responder::new(sender.clone());

        for intent in
            [Intent::Greeting, Intent::TransferRequest, Intent::HelpRequest, Intent::Unrecognized]
        {
            responder.reply("C1", intent, "U42").await.expect("reply");
        }

        let texts: Vec<String> = sender.sent().await.into_iter().map(|(_, text)| text).collect();
        assert_eq!(
            texts,
            vec!["Hello <@U42>", "transfering...", "I can help you", "I don't understand"]
        );
    }

    #[tokio::test]
    async fn send_failure_is_returned_after_a_single_attempt() {
        let sender = Arc::new(RecordingSender::failing(SendError::Http("timeout".to_owned())));
        let responder = Responder::new(sender.clone());

        let result = responder.reply("C1", Intent::HelpRequest, "U1").await;

        assert_eq!(result, Err(SendError::Http("timeout".to_owned())));
        assert_eq!(sender.sent().await.len(), 1);
    }
}
