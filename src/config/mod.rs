//! Client configuration
//!
//! [`VoiceClientOptions`] can be built in code or loaded from a YAML file and
//! `RTVI_*` environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use rtvi_client::config::VoiceClientOptions;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let options = VoiceClientOptions::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let options = VoiceClientOptions::from_file(&PathBuf::from("client.yaml"))?;
//! println!("Connecting through {}", options.base_url);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mod env;
mod yaml;

pub use env::EnvConfig;
pub use yaml::{ClientYaml, HandshakeYaml, MediaYaml, YamlConfig};

use crate::core::dispatcher::DEFAULT_REQUEST_TIMEOUT;
use crate::core::messages::ServiceConfigOption;
use crate::core::session::AuthHandler;
use crate::errors::{RtviError, RtviResult};

/// Default period of the pending request sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Options for a [`VoiceClient`](crate::core::session::VoiceClient).
#[derive(Clone)]
pub struct VoiceClientOptions {
    /// Handshake endpoint; the default auth handler POSTs the session request here
    pub base_url: String,
    /// Service role to backend mapping (e.g. `llm -> together`). Must not be empty.
    pub services: BTreeMap<String, String>,
    /// Service configuration sent with the handshake
    pub config: Vec<ServiceConfigOption>,
    /// Free-form service configuration sent with the handshake
    pub config_dict: serde_json::Map<String, serde_json::Value>,
    /// How long to wait for `bot-ready` after starting to connect. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Enable the local microphone (default: true)
    pub enable_mic: bool,
    /// Enable the local camera (default: false)
    pub enable_cam: bool,
    /// Extra HTTP headers for the handshake request
    pub custom_headers: BTreeMap<String, String>,
    /// Extra top-level fields merged into the handshake body
    pub custom_body_params: serde_json::Map<String, serde_json::Value>,
    /// Replaces the default handshake POST
    pub custom_auth_handler: Option<Arc<dyn AuthHandler>>,
    /// Age after which an unanswered request fails with a timeout
    pub request_timeout: Duration,
    /// How often pending requests are checked for expiry
    pub sweep_interval: Duration,
}

impl Default for VoiceClientOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            services: BTreeMap::new(),
            config: Vec::new(),
            config_dict: serde_json::Map::new(),
            timeout: None,
            enable_mic: true,
            enable_cam: false,
            custom_headers: BTreeMap::new(),
            custom_body_params: serde_json::Map::new(),
            custom_auth_handler: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl fmt::Debug for VoiceClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceClientOptions")
            .field("base_url", &self.base_url)
            .field("services", &self.services)
            .field("config", &self.config)
            .field("config_dict", &self.config_dict)
            .field("timeout", &self.timeout)
            .field("enable_mic", &self.enable_mic)
            .field("enable_cam", &self.enable_cam)
            // Header values may carry credentials
            .field("custom_headers", &self.custom_headers.keys().collect::<Vec<_>>())
            .field("custom_body_params", &self.custom_body_params)
            .field("custom_auth_handler", &self.custom_auth_handler.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl VoiceClientOptions {
    /// Options with an endpoint and services; everything else default.
    pub fn new<S, K, V>(base_url: impl Into<String>, services: S) -> Self
    where
        S: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            base_url: base_url.into(),
            services: services
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Default::default()
        }
    }

    /// Load options from `RTVI_*` environment variables.
    pub fn from_env() -> RtviResult<Self> {
        let mut options = Self::default();
        options.apply_env(EnvConfig::load()?);
        options.validate()?;
        Ok(options)
    }

    /// Load options from a YAML file, falling back to environment variables.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values (loaded by the binary at startup)
    /// 4. Default values
    pub fn from_file(path: &Path) -> RtviResult<Self> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut options = Self::default();
        options.apply_env(EnvConfig::load()?);
        options.apply_yaml(yaml_config);
        options.validate()?;
        Ok(options)
    }

    fn apply_env(&mut self, env: EnvConfig) {
        if let Some(base_url) = env.base_url {
            self.base_url = base_url;
        }
        if let Some(services) = env.services {
            self.services = services;
        }
        if let Some(ms) = env.timeout_ms {
            self.timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = env.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env.sweep_interval_ms {
            self.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(enable) = env.enable_mic {
            self.enable_mic = enable;
        }
        if let Some(enable) = env.enable_cam {
            self.enable_cam = enable;
        }
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(client) = yaml.client {
            if let Some(base_url) = client.base_url {
                self.base_url = base_url;
            }
            if let Some(ms) = client.timeout_ms {
                self.timeout = Some(Duration::from_millis(ms));
            }
            if let Some(ms) = client.request_timeout_ms {
                self.request_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = client.sweep_interval_ms {
                self.sweep_interval = Duration::from_millis(ms);
            }
        }
        if let Some(services) = yaml.services {
            self.services = services;
        }
        if let Some(config) = yaml.config {
            self.config = config;
        }
        if let Some(config_dict) = yaml.config_dict {
            self.config_dict = config_dict;
        }
        if let Some(media) = yaml.media {
            if let Some(enable) = media.enable_mic {
                self.enable_mic = enable;
            }
            if let Some(enable) = media.enable_cam {
                self.enable_cam = enable;
            }
        }
        if let Some(handshake) = yaml.handshake {
            if let Some(headers) = handshake.headers {
                self.custom_headers = headers;
            }
            if let Some(body_params) = handshake.body_params {
                self.custom_body_params = body_params;
            }
        }
    }

    /// Use a custom handshake instead of the default POST to `base_url`.
    pub fn with_auth_handler(mut self, handler: Arc<dyn AuthHandler>) -> Self {
        self.custom_auth_handler = Some(handler);
        self
    }

    /// Check that the options can start a session.
    pub fn validate(&self) -> RtviResult<()> {
        if self.services.is_empty() {
            return Err(RtviError::InvalidConfiguration(
                "at least one service is required".to_string(),
            ));
        }

        // A custom auth handler decides for itself what the endpoint means
        if self.custom_auth_handler.is_none() {
            let url = url::Url::parse(&self.base_url).map_err(|e| {
                RtviError::InvalidConfiguration(format!(
                    "invalid base_url '{}': {}",
                    self.base_url, e
                ))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(RtviError::InvalidConfiguration(format!(
                    "base_url must use http or https, got '{}'",
                    url.scheme()
                )));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(RtviError::InvalidConfiguration(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(RtviError::InvalidConfiguration(
                "sweep_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    use env::tests::cleanup_env_vars;

    fn valid_options() -> VoiceClientOptions {
        VoiceClientOptions::new("http://localhost:7860/connect", [("llm", "together")])
    }

    #[test]
    fn test_defaults() {
        let options = VoiceClientOptions::default();
        assert!(options.enable_mic);
        assert!(!options.enable_cam);
        assert!(options.timeout.is_none());
        assert_eq!(options.request_timeout, Duration::from_secs(10));
        assert_eq!(options.sweep_interval, DEFAULT_SWEEP_INTERVAL);
    }

    #[test]
    fn test_validate() {
        assert!(valid_options().validate().is_ok());

        let no_services = VoiceClientOptions {
            services: BTreeMap::new(),
            ..valid_options()
        };
        assert!(matches!(
            no_services.validate(),
            Err(RtviError::InvalidConfiguration(_))
        ));

        let bad_url = VoiceClientOptions {
            base_url: "not a url".to_string(),
            ..valid_options()
        };
        assert!(bad_url.validate().unwrap_err().to_string().contains("base_url"));

        let ws_url = VoiceClientOptions {
            base_url: "ws://localhost:7860".to_string(),
            ..valid_options()
        };
        assert!(ws_url.validate().is_err());

        let zero_horizon = VoiceClientOptions {
            request_timeout: Duration::ZERO,
            ..valid_options()
        };
        assert!(zero_horizon.validate().is_err());
    }

    #[test]
    fn test_debug_hides_header_values() {
        let mut options = valid_options();
        options
            .custom_headers
            .insert("Authorization".to_string(), "Bearer secret-token".to_string());
        let debug = format!("{:?}", options);
        assert!(debug.contains("Authorization"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("client.yaml");
        fs::write(
            &path,
            r#"
client:
  base_url: "http://yaml.local/connect"
services:
  llm: yaml-llm
media:
  enable_cam: true
"#,
        )
        .unwrap();

        unsafe {
            std::env::set_var("RTVI_BASE_URL", "http://env.local/connect");
            std::env::set_var("RTVI_TIMEOUT_MS", "2500");
        }

        let options = VoiceClientOptions::from_file(&path).unwrap();
        // YAML overrides ENV
        assert_eq!(options.base_url, "http://yaml.local/connect");
        assert_eq!(options.services["llm"], "yaml-llm");
        // ENV fills what YAML leaves out
        assert_eq!(options.timeout, Some(Duration::from_millis(2500)));
        assert!(options.enable_cam);
        assert!(options.enable_mic);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("RTVI_BASE_URL", "https://bot.example.com/start");
            std::env::set_var("RTVI_SERVICES", "llm=openai,tts=cartesia");
            std::env::set_var("RTVI_ENABLE_MIC", "false");
        }

        let options = VoiceClientOptions::from_env().unwrap();
        assert_eq!(options.services.len(), 2);
        assert!(!options.enable_mic);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_requires_services() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("RTVI_BASE_URL", "https://bot.example.com/start");
        }
        assert!(VoiceClientOptions::from_env().is_err());
        cleanup_env_vars();
    }
}
