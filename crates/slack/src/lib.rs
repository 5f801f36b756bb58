//! Slack Integration - Socket Mode keyword bot
//!
//! - **Events** (`events`) - Socket Mode envelopes, inbound event kinds, dispatch
//! - **Socket Mode** (`socket`) - listener loop over a `SocketTransport`
//! - **WebSocket session** (`websocket`) - the production `SocketTransport`
//! - **Responder** (`responder`) - canned replies through a `MessageSender`
//! - **Web API** (`web_api`) - `chat.postMessage` / `auth.test` client
//!
//! # Architecture
//!
//! ```text
//! SocketModeSession → SocketModeRunner → EventDispatcher → IntentRouter
//!        ↑ ack                                  ↓
//!                                   Responder → SlackWebClient
//! ```

pub mod events;
pub mod responder;
pub mod socket;
pub mod web_api;
pub mod websocket;
