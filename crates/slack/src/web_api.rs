use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::responder::{MessageSender, OutboundReply, SendError};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AuthIdentity {
    pub user_id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub bot_id: Option<String>,
}

#[derive(Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Slack Web API client authenticated with the bot token.
#[derive(Clone)]
pub struct SlackWebClient {
    http: reqwest::Client,
    bot_token: SecretString,
    base_url: String,
}

impl SlackWebClient {
    pub fn new(
        http: reqwest::Client,
        bot_token: SecretString,
        base_url: impl Into<String>,
    ) -> Self {
        Self { http, bot_token, base_url: base_url.into().trim_end_matches('/').to_owned() }
    }

    pub async fn auth_test(&self) -> Result<AuthIdentity, SendError> {
        self.call("auth.test", &serde_json::json!({})).await
    }

    pub async fn post_message(&self, reply: &OutboundReply) -> Result<(), SendError> {
        let request = PostMessageRequest { channel: &reply.channel, text: &reply.text };
        let _: serde_json::Value = self.call("chat.postMessage", &request).await?;
        debug!(
            event_name = "egress.slack.message_posted",
            channel = %reply.channel,
            "message posted"
        );
        Ok(())
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, SendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| SendError::Http(format!("{method}: {error}")))?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|error| SendError::Http(format!("{method} returned invalid json: {error}")))?;

        let envelope = ApiEnvelope::deserialize(&raw)
            .map_err(|error| SendError::Http(format!("{method} returned invalid json: {error}")))?;
        if !envelope.ok {
            return Err(SendError::Api(envelope.error.unwrap_or_else(|| "unknown".to_owned())));
        }

        serde_json::from_value(raw)
            .map_err(|error| SendError::Http(format!("{method} returned unexpected body: {error}")))
    }
}

#[async_trait]
impl MessageSender for SlackWebClient {
    async fn send(&self, reply: &OutboundReply) -> Result<(), SendError> {
        self.post_message(reply).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::SlackWebClient;
    use crate::responder::{MessageSender, OutboundReply, SendError};

    fn client(base_url: &str) -> SlackWebClient {
        SlackWebClient::new(reqwest::Client::new(), "xoxb-test".to_owned().into(), base_url)
    }

    fn reply() -> OutboundReply {
        OutboundReply { channel: "C1".to_owned(), text: "Hello <@U1>".to_owned() }
    }

    #[tokio::test]
    async fn posts_reply_with_bot_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(body_json(json!({ "channel": "C1", "text": "Hello <@U1>" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "ts": "1.2" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri()).send(&reply()).await.expect("post");
    }

    #[tokio::test]
    async fn api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": false, "error": "channel_not_found" })),
            )
            .mount(&server)
            .await;

        let result = client(&server.uri()).send(&reply()).await;
        assert_eq!(result, Err(SendError::Api("channel_not_found".to_owned())));
    }

    #[tokio::test]
    async fn http_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server.uri()).send(&reply()).await;
        assert!(matches!(
            result,
            Err(SendError::Http(ref reason)) if reason.starts_with("chat.postMessage")
        ));
    }

    #[tokio::test]
    async fn auth_test_returns_bot_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "user": "keybot",
                "user_id": "U0BOT",
                "team": "Acme",
                "bot_id": "B0BOT"
            })))
            .mount(&server)
            .await;

        let identity = client(&server.uri()).auth_test().await.expect("identity");
        assert_eq!(identity.user_id, "U0BOT");
        assert_eq!(identity.bot_id.as_deref(), Some("B0BOT"));
    }
}
