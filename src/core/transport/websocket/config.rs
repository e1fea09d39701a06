//! WebSocket transport configuration and auth bundle parsing.

use std::time::Duration;

use serde::Deserialize;

use crate::errors::{RtviError, RtviResult};

/// Outbound messages buffered before `send_message` reports backpressure.
pub const WS_CHANNEL_CAPACITY: usize = 256;

/// Default deadline for the WebSocket opening handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `disconnect` waits for the close frame before aborting the socket task.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketTransportConfig {
    /// Outbound queue size
    pub channel_capacity: usize,
    /// Deadline for opening the socket
    pub connect_timeout: Duration,
}

impl Default for WebSocketTransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: WS_CHANNEL_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Fields the WebSocket transport reads from the handshake response.
///
/// Accepts `ws_url` or `url` for the endpoint and an optional bearer `token`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WsAuthBundle {
    #[serde(alias = "ws_url")]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl WsAuthBundle {
    pub fn from_value(bundle: &serde_json::Value) -> RtviResult<Self> {
        let parsed: Self = serde_json::from_value(bundle.clone()).map_err(|e| {
            RtviError::Transport(format!("Auth bundle has no usable WebSocket url: {}", e))
        })?;

        let url = url::Url::parse(&parsed.url)
            .map_err(|e| RtviError::Transport(format!("Invalid WebSocket url '{}': {}", parsed.url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RtviError::Transport(format!(
                "WebSocket url must use ws or wss, got '{}'",
                url.scheme()
            )));
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bundle_accepts_ws_url_or_url() {
        let bundle = WsAuthBundle::from_value(&json!({"ws_url": "wss://bot.example.com/ws", "token": "abc"})).unwrap();
        assert_eq!(bundle.url, "wss://bot.example.com/ws");
        assert_eq!(bundle.token.as_deref(), Some("abc"));

        let bundle = WsAuthBundle::from_value(&json!({"url": "ws://localhost:8765"})).unwrap();
        assert!(bundle.token.is_none());
    }

    #[test]
    fn test_bundle_rejects_bad_urls() {
        assert!(WsAuthBundle::from_value(&json!({"room": "r"})).is_err());
        assert!(WsAuthBundle::from_value(&json!({"url": "https://bot.example.com"})).is_err());
        assert!(WsAuthBundle::from_value(&json!({"url": "::"})).is_err());
    }

    #[test]
    fn test_default_config() {
        let config = WebSocketTransportConfig::default();
        assert_eq!(config.channel_capacity, WS_CHANNEL_CAPACITY);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }
}
