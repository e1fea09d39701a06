//! WebSocket transport.
//!
//! The handshake response must carry the socket endpoint as `ws_url` (or
//! `url`) and may carry a `token`, sent as `Authorization: Bearer <token>`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rtvi_client::config::VoiceClientOptions;
//! use rtvi_client::core::session::VoiceClient;
//! use rtvi_client::core::transport::WebSocketTransport;
//!
//! # async fn run() -> Result<(), rtvi_client::errors::RtviError> {
//! let options = VoiceClientOptions::new("http://localhost:7860/connect", [("llm", "together")]);
//! let client = VoiceClient::new(options, Arc::new(WebSocketTransport::default()));
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;

pub use client::WebSocketTransport;
pub use config::{
    CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, WS_CHANNEL_CAPACITY, WebSocketTransportConfig,
    WsAuthBundle,
};
