use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::messages::ServiceConfigOption;
use crate::errors::{RtviError, RtviResult};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values missing here
/// fall back to environment variables and then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// client:
///   base_url: "http://localhost:7860/connect"
///   timeout_ms: 15000
///   request_timeout_ms: 10000
///   sweep_interval_ms: 1000
///
/// services:
///   asr: deepgram
///   llm: together
///   tts: edge
///
/// config:
///   - service: llm
///     options:
///       - name: model
///         value: "meta-llama/Llama-3-70b-chat-hf"
///
/// media:
///   enable_mic: true
///   enable_cam: false
///
/// handshake:
///   headers:
///     X-Api-Key: "secret"
///   body_params:
///     room: "demo"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub client: Option<ClientYaml>,
    pub services: Option<BTreeMap<String, String>>,
    pub config: Option<Vec<ServiceConfigOption>>,
    pub config_dict: Option<serde_json::Map<String, serde_json::Value>>,
    pub media: Option<MediaYaml>,
    pub handshake: Option<HandshakeYaml>,
}

/// Endpoint and timing settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ClientYaml {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
}

/// Local media settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MediaYaml {
    pub enable_mic: Option<bool>,
    pub enable_cam: Option<bool>,
}

/// Extra handshake request settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HandshakeYaml {
    pub headers: Option<BTreeMap<String, String>>,
    pub body_params: Option<serde_json::Map<String, serde_json::Value>>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> RtviResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RtviError::InvalidConfiguration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        Self::from_str(&contents)
    }

    /// Parse YAML configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> RtviResult<Self> {
        serde_yaml::from_str(contents).map_err(|e| {
            RtviError::InvalidConfiguration(format!("Failed to parse YAML config: {e}"))
        })
    }
}
