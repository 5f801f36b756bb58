use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::events::{EnvelopeCategory, SocketEnvelope};
use crate::socket::{SocketTransport, TransportError};

const ENVELOPE_BUFFER: usize = 64;

type SocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Deserialize)]
struct ConnectionsOpenResponse {
    ok: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Socket Mode session over a single WebSocket.
///
/// [`SocketModeSession::run`] owns the network side: it opens the connection,
/// forwards every decoded frame and writes queued
/// acknowledgments. The listener consumes the session through
/// [`SocketTransport`]. When Slack sends a `disconnect` frame the session
/// opens a fresh connection; any other loss of the socket ends `run` with an
/// error.
pub struct SocketModeSession {
    http: reqwest::Client,
    app_token: SecretString,
    api_base_url: String,
    envelopes_tx: mpsc::Sender<SocketEnvelope>,
    envelopes_rx: Mutex<mpsc::Receiver<SocketEnvelope>>,
    acks_tx: mpsc::UnboundedSender<String>,
    acks_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl SocketModeSession {
    pub fn new(
        http: reqwest::Client,
        app_token: SecretString,
        api_base_url: impl Into<String>,
    ) -> Self {
        let (envelopes_tx, envelopes_rx) = mpsc::channel(ENVELOPE_BUFFER);
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        Self {
            http,
            app_token,
            api_base_url: api_base_url.into().trim_end_matches('/').to_owned(),
            envelopes_tx,
            envelopes_rx: Mutex::new(envelopes_rx),
            acks_tx,
            acks_rx: Mutex::new(acks_rx),
        }
    }

    /// Asks `apps.connections.open` for a fresh WebSocket URL.
    pub async fn open_connection_url(&self) -> Result<String, TransportError> {
        let response = self
            .http
            .post(format!("{}/apps.connections.open", self.api_base_url))
            .bearer_auth(self.app_token.expose_secret())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| {
                TransportError::Connect(format!("apps.connections.open request failed: {error}"))
            })?;

        let body: ConnectionsOpenResponse = response.json().await.map_err(|error| {
            TransportError::Connect(format!("apps.connections.open returned invalid json: {error}"))
        })?;

        if !body.ok {
            let reason = body.error.unwrap_or_else(|| "unknown".to_owned());
            let hint = if reason == "invalid_auth" {
                " (check that the app token starts with `xapp-` and has the connections:write scope)"
            } else {
                ""
            };
            return Err(TransportError::Connect(format!(
                "apps.connections.open rejected the app token: {reason}{hint}"
            )));
        }

        body.url.filter(|url| !url.is_empty()).ok_or_else(|| {
            TransportError::Connect("apps.connections.open response had no url".to_owned())
        })
    }

    pub async fn run(&self) -> Result<(), TransportError> {
        let mut acks = self.acks_rx.lock().await;

        loop {
            let url = self.open_connection_url().await?;
            let (stream, response) =
                tokio_tungstenite::connect_async(url.as_str()).await.map_err(|error| {
                    TransportError::Connect(format!("websocket handshake failed: {error}"))
                })?;
            info!(
                event_name = "ingress.slack.socket_connected",
                status = %response.status(),
                "connected to slack socket mode"
            );

            self.pump(stream, &mut acks).await?;
            info!(
                event_name = "ingress.slack.socket_refresh",
                "slack requested a connection refresh; reopening socket"
            );
        }
    }

    /// Returns `Ok` only after Slack asked for a refresh.
    async fn pump(
        &self,
        stream: SocketStream,
        acks: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<(), TransportError> {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                message = read.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
                        None => {
                            return Err(TransportError::Receive(
                                "socket closed without a disconnect request".to_owned(),
                            ))
                        }
                    };

                    match message {
                        Message::Text(text) => {
                            let envelope = match SocketEnvelope::from_text(text.as_str()) {
                                Ok(envelope) => envelope,
                                Err(decode_error) => {
                                    warn!(
                                        error = %decode_error,
                                        "dropping undecodable socket mode frame"
                                    );
                                    continue;
                                }
                            };
                            let refresh = envelope.category == EnvelopeCategory::Disconnect;
                            self.envelopes_tx.send(envelope).await.map_err(|_| {
                                TransportError::Receive("listener channel closed".to_owned())
                            })?;
                            if refresh {
                                if let Err(error) = write.close().await {
                                    debug!(error = %error, "closing refreshed socket failed");
                                }
                                return Ok(());
                            }
                        }
                        Message::Close(frame) => {
                            return Err(TransportError::Receive(format!(
                                "socket closed by slack: {frame:?}"
                            )));
                        }
                        // tungstenite queues the pong for every ping it reads.
                        _ => {}
                    }
                }
                Some(envelope_id) = acks.recv() => {
                    let ack = serde_json::json!({ "envelope_id": envelope_id });
                    write
                        .send(Message::text(ack.to_string()))
                        .await
                        .map_err(|error| TransportError::Acknowledge(error.to_string()))?;
                }
            }
        }
    }
}

#[async_trait]
impl SocketTransport for SocketModeSession {
    async fn next_envelope(&self) -> Result<Option<SocketEnvelope>, TransportError> {
        Ok(self.envelopes_rx.lock().await.recv().await)
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        self.acks_tx
            .send(envelope_id.to_owned())
            .map_err(|_| TransportError::Acknowledge("socket session closed".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::SocketModeSession;
    use crate::events::EnvelopeCategory;
    use crate::socket::{SocketTransport, TransportError};

    fn session(base_url: &str) -> SocketModeSession {
        SocketModeSession::new(reqwest::Client::new(), "xapp-test".to_owned().into(), base_url)
    }

    async fn next_text<S>(socket: &mut S) -> Option<String>
    where
        S: futures_util::Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    }

    fn events_api_frame(envelope_id: &str, text: &str) -> Message {
        Message::text(
            json!({
                "envelope_id": envelope_id,
                "type": "events_api",
                "payload": {
                    "type": "event_callback",
                    "event": { "type": "message", "user": "U1", "text": text, "channel": "C1" }
                }
            })
            .to_string(),
        )
    }

    async fn mock_connections_open(server: &MockServer, body: Value) {
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .and(header("authorization", "Bearer xapp-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn opens_connection_url_with_app_token() {
        let server = MockServer::start().await;
        mock_connections_open(&server, json!({ "ok": true, "url": "wss://example.test/link" }))
            .await;

        let url = session(&server.uri()).open_connection_url().await.expect("url");
        assert_eq!(url, "wss://example.test/link");
    }

    #[tokio::test]
    async fn rejected_app_token_is_a_connect_error() {
        let server = MockServer::start().await;
        mock_connections_open(&server, json!({ "ok": false, "error": "invalid_auth" })).await;

        let error = session(&server.uri()).open_connection_url().await.expect_err("rejected");
        assert!(matches!(
            error,
            TransportError::Connect(ref reason)
                if reason.contains("invalid_auth") && reason.contains("xapp-")
        ));
    }

    #[tokio::test]
    async fn run_fails_when_connection_cannot_be_opened() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = session(&server.uri()).run().await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn forwards_frames_and_writes_acknowledgments() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let socket_url = format!("ws://{}/", listener.local_addr().expect("addr"));
        let (ack_tx, ack_rx) = oneshot::channel::<String>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut socket = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            socket
                .send(Message::text(json!({ "type": "hello", "num_connections": 1 }).to_string()))
                .await
                .expect("send hello");
            socket.send(events_api_frame("env-ws-1", "hello")).await.expect("send event");

            if let Some(ack) = next_text(&mut socket).await {
                let _ = ack_tx.send(ack);
            }
        });

        let server = MockServer::start().await;
        mock_connections_open(&server, json!({ "ok": true, "url": socket_url })).await;

        let session = Arc::new(session(&server.uri()));
        let network = tokio::spawn({
            let session = session.clone();
            async move { session.run().await }
        });

        let hello = session.next_envelope().await.expect("hello").expect("open stream");
        assert_eq!(hello.category, EnvelopeCategory::Hello);

        let event = session.next_envelope().await.expect("event").expect("open stream");
        assert_eq!(event.category, EnvelopeCategory::EventsApi);
        assert_eq!(event.envelope_id, "env-ws-1");

        session.acknowledge(&event.envelope_id).await.expect("ack queued");
        let ack: Value =
            serde_json::from_str(&ack_rx.await.expect("ack written")).expect("ack json");
        assert_eq!(ack, json!({ "envelope_id": "env-ws-1" }));

        network.abort();
    }

    #[tokio::test]
    async fn reopens_connection_after_disconnect_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let socket_url = format!("ws://{}/", listener.local_addr().expect("addr"));
        let (acks_tx, acks_rx) = oneshot::channel::<(String, String)>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept first");
            let mut first = tokio_tungstenite::accept_async(tcp).await.expect("first handshake");
            first.send(Message::text("not a socket mode frame")).await.expect("send garbage");
            first.send(events_api_frame("env-1", "hello")).await.expect("send first event");
            let Some(first_ack) = next_text(&mut first).await else { return };
            first
                .send(Message::text(
                    json!({ "type": "disconnect", "reason": "refresh_requested" }).to_string(),
                ))
                .await
                .expect("send disconnect");

            let (tcp, _) = listener.accept().await.expect("accept second");
            let mut second = tokio_tungstenite::accept_async(tcp).await.expect("second handshake");
            second.send(events_api_frame("env-2", "help")).await.expect("send second event");
            let Some(second_ack) = next_text(&mut second).await else { return };
            let _ = acks_tx.send((first_ack, second_ack));
        });

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "url": socket_url
            })))
            .expect(2)
            .mount(&server)
            .await;

        let session = Arc::new(session(&server.uri()));
        let network = tokio::spawn({
            let session = session.clone();
            async move { session.run().await }
        });

        let first = session.next_envelope().await.expect("first").expect("open stream");
        assert_eq!(first.envelope_id, "env-1");
        session.acknowledge(&first.envelope_id).await.expect("ack queued");

        let disconnect = session.next_envelope().await.expect("disconnect").expect("open stream");
        assert_eq!(disconnect.category, EnvelopeCategory::Disconnect);

        let second = session.next_envelope().await.expect("second").expect("open stream");
        assert_eq!(second.envelope_id, "env-2");
        session.acknowledge(&second.envelope_id).await.expect("ack queued");

        let (first_ack, second_ack) = acks_rx.await.expect("acks written");
        let first_ack: Value = serde_json::from_str(&first_ack).expect("ack json");
        let second_ack: Value = serde_json::from_str(&second_ack).expect("ack json");
        assert_eq!(first_ack, json!({ "envelope_id": "env-1" }));
        assert_eq!(second_ack, json!({ "envelope_id": "env-2" }));

        network.abort();
    }
}
