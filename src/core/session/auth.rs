//! Handshake with the session endpoint.
//!
//! Before the transport can join, the client asks `base_url` for an auth
//! bundle (room URL, token, ...). The bundle is opaque to the session and is
//! handed unchanged to [`Transport::connect`](crate::core::transport::Transport::connect).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::config::VoiceClientOptions;
use crate::errors::{RtviError, RtviResult};

/// Everything needed to perform one handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    pub base_url: String,
    /// Handshake deadline, if any
    pub timeout: Option<Duration>,
    /// JSON body for the endpoint
    pub body: Value,
    pub headers: BTreeMap<String, String>,
}

impl HandshakeRequest {
    pub fn from_options(options: &VoiceClientOptions) -> Self {
        Self {
            base_url: options.base_url.clone(),
            timeout: options.timeout,
            body: build_handshake_body(options),
            headers: options.custom_headers.clone(),
        }
    }
}

/// Body of the default handshake POST.
///
/// Custom body params are merged at the top level; they cannot replace
/// `services`, `config` or `config_dict`.
pub fn build_handshake_body(options: &VoiceClientOptions) -> Value {
    let mut body: Map<String, Value> = options.custom_body_params.clone();
    body.insert("services".to_string(), json!(options.services));
    body.insert("config".to_string(), json!(options.config));
    body.insert(
        "config_dict".to_string(),
        Value::Object(options.config_dict.clone()),
    );
    Value::Object(body)
}

/// Obtains the auth bundle for a session.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Perform the handshake and return the bundle for the transport.
    async fn authenticate(&self, request: &HandshakeRequest) -> RtviResult<Value>;
}

/// Default handshake: `POST base_url` with a JSON body.
#[derive(Debug, Clone, Default)]
pub struct HttpAuthHandler {
    client: reqwest::Client,
}

impl HttpAuthHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AuthHandler for HttpAuthHandler {
    async fn authenticate(&self, request: &HandshakeRequest) -> RtviResult<Value> {
        info!(base_url = %request.base_url, "Starting handshake");

        let mut builder = self
            .client
            .post(&request.base_url)
            .header("Content-Type", "application/json")
            .json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            RtviError::HandshakeFailed(format!("Failed to reach {}: {}", request.base_url, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RtviError::HandshakeFailed(format!(
                "Handshake request failed with status {}: {}",
                status, body
            )));
        }

        let bundle: Value = response.json().await.map_err(|e| {
            RtviError::HandshakeFailed(format!("Failed to parse auth bundle: {}", e))
        })?;
        debug!("Received auth bundle");
        Ok(bundle)
    }
}
