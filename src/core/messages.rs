//! RTVI wire message types.
//!
//! Every message exchanged with the bot, in both directions, uses the same
//! JSON envelope:
//!
//! ```json
//! { "id": "<string>", "label": "rtvi-ai", "type": "<message-type>", "data": <any> }
//! ```
//!
//! # Protocol Overview
//!
//! Client messages (sent to the bot):
//! - client-ready - Client finished joining the transport
//! - update-config - Replace service options on the bot
//! - get-config - Fetch the current bot configuration
//! - describe-config - List the configuration options the bot supports
//! - action - Invoke a service action
//! - describe-actions - List the actions the bot supports
//!
//! Bot messages (received from the bot):
//! - bot-ready - Bot is connected and ready to receive messages
//! - transcript, user-transcription, tts-text - Speech to text results
//! - config, config-available, config-updated, config-error - Configuration replies
//! - actions-available, action-response - Action replies
//! - error, error-response - Bot errors
//! - metrics - Processing metrics
//! - user/bot-started/stopped-speaking - Speaking state changes

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{RtviError, RtviResult};

/// Label carried by every RTVI message.
pub const RTVI_MESSAGE_LABEL: &str = "rtvi-ai";

/// Length of generated request ids.
pub const MESSAGE_ID_LENGTH: usize = 8;

/// Fixed id used for client-originated metrics reports.
pub const METRICS_MESSAGE_ID: &str = "0";

// =============================================================================
// Message Types
// =============================================================================

/// Closed set of RTVI message kinds.
///
/// Unknown inbound types are preserved in [`MessageType::Other`] so that newer
/// bots do not break older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    // Outbound
    ClientReady,
    UpdateConfig,
    GetConfig,
    DescribeConfig,
    Action,
    DescribeActions,

    // Inbound
    BotReady,
    Transcript,
    Config,
    Error,
    ErrorResponse,
    ConfigAvailable,
    ConfigUpdated,
    ConfigError,
    ActionsAvailable,
    ActionResponse,
    Metrics,
    UserTranscription,
    BotTranscription,
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,

    /// Any type this client does not know about
    Other(String),
}

impl MessageType {
    /// Wire value of the message type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ClientReady => "client-ready",
            Self::UpdateConfig => "update-config",
            Self::GetConfig => "get-config",
            Self::DescribeConfig => "describe-config",
            Self::Action => "action",
            Self::DescribeActions => "describe-actions",
            Self::BotReady => "bot-ready",
            Self::Transcript => "transcript",
            Self::Config => "config",
            Self::Error => "error",
            Self::ErrorResponse => "error-response",
            Self::ConfigAvailable => "config-available",
            Self::ConfigUpdated => "config-updated",
            Self::ConfigError => "config-error",
            Self::ActionsAvailable => "actions-available",
            Self::ActionResponse => "action-response",
            Self::Metrics => "metrics",
            Self::UserTranscription => "user-transcription",
            Self::BotTranscription => "tts-text",
            Self::UserStartedSpeaking => "user-started-speaking",
            Self::UserStoppedSpeaking => "user-stopped-speaking",
            Self::BotStartedSpeaking => "bot-started-speaking",
            Self::BotStoppedSpeaking => "bot-stopped-speaking",
            Self::Other(other) => other.as_str(),
        }
    }

    /// Parse a wire value.
    pub fn parse(s: &str) -> Self {
        match s {
            "client-ready" => Self::ClientReady,
            "update-config" => Self::UpdateConfig,
            "get-config" => Self::GetConfig,
            "describe-config" => Self::DescribeConfig,
            "action" => Self::Action,
            "describe-actions" => Self::DescribeActions,
            "bot-ready" => Self::BotReady,
            "transcript" => Self::Transcript,
            "config" => Self::Config,
            "error" => Self::Error,
            "error-response" => Self::ErrorResponse,
            "config-available" => Self::ConfigAvailable,
            "config-updated" => Self::ConfigUpdated,
            "config-error" => Self::ConfigError,
            "actions-available" => Self::ActionsAvailable,
            "action-response" => Self::ActionResponse,
            "metrics" => Self::Metrics,
            "user-transcription" => Self::UserTranscription,
            "tts-text" => Self::BotTranscription,
            "user-started-speaking" => Self::UserStartedSpeaking,
            "user-stopped-speaking" => Self::UserStoppedSpeaking,
            "bot-started-speaking" => Self::BotStartedSpeaking,
            "bot-stopped-speaking" => Self::BotStoppedSpeaking,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the bot uses this type to report a failed request.
    #[inline]
    pub fn is_error_reply(&self) -> bool {
        matches!(self, Self::Error | Self::ErrorResponse | Self::ConfigError)
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// One RTVI protocol envelope.
///
/// Messages are immutable once built; constructors generate an 8 character
/// request id unless one is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Request/correlation id
    #[serde(default)]
    pub id: String,
    /// Protocol label, always [`RTVI_MESSAGE_LABEL`] for valid messages.
    /// Missing on the wire means empty, which is treated as foreign.
    #[serde(default)]
    pub label: String,
    /// Message kind
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Kind-specific payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Generate a random request id.
pub fn generate_message_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(MESSAGE_ID_LENGTH);
    id
}

impl Message {
    /// Build a message with a generated id.
    pub fn new(message_type: MessageType, data: serde_json::Value) -> Self {
        Self::with_id(message_type, data, generate_message_id())
    }

    /// Build a message with a caller supplied id.
    pub fn with_id(
        message_type: MessageType,
        data: serde_json::Value,
        id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: RTVI_MESSAGE_LABEL.to_string(),
            message_type,
            data,
        }
    }

    /// Whether the envelope carries the RTVI label.
    #[inline]
    pub fn is_rtvi(&self) -> bool {
        self.label == RTVI_MESSAGE_LABEL
    }

    /// Refuse an envelope carrying any label other than `rtvi-ai`.
    pub fn ensure_rtvi(&self) -> RtviResult<()> {
        if self.is_rtvi() {
            Ok(())
        } else {
            Err(RtviError::InvalidMessage(format!(
                "label must be '{}', got '{}'",
                RTVI_MESSAGE_LABEL, self.label
            )))
        }
    }

    /// Encode the envelope as JSON.
    pub fn serialize(&self) -> RtviResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an envelope from JSON.
    pub fn parse(json: &str) -> RtviResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decode the payload into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> RtviResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            RtviError::Serialization(format!("invalid {} payload: {}", self.message_type, e))
        })
    }

    // -------------------------------------------------------------------------
    // Outbound constructors
    // -------------------------------------------------------------------------

    pub fn client_ready() -> Self {
        Self::new(MessageType::ClientReady, serde_json::json!({}))
    }

    pub fn update_config(config: &[ServiceConfigOption]) -> Self {
        Self::new(
            MessageType::UpdateConfig,
            serde_json::json!({ "config_list": config }),
        )
    }

    pub fn describe_config() -> Self {
        Self::new(MessageType::DescribeConfig, serde_json::json!({}))
    }

    pub fn get_bot_config() -> Self {
        Self::new(MessageType::GetConfig, serde_json::json!({}))
    }

    pub fn describe_actions() -> Self {
        Self::new(MessageType::DescribeActions, serde_json::json!({}))
    }

    pub fn action(action: &ActionData) -> RtviResult<Self> {
        Ok(Self::new(MessageType::Action, serde_json::to_value(action)?))
    }

    /// Metrics report; always uses the fixed metrics id.
    pub fn metrics(metrics: &Metrics) -> RtviResult<Self> {
        Ok(Self::with_id(
            MessageType::Metrics,
            serde_json::to_value(metrics)?,
            METRICS_MESSAGE_ID,
        ))
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// One named option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    pub name: String,
    pub value: serde_json::Value,
}

impl ConfigOption {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Options targeted at one backend service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceConfigOption {
    pub service: String,
    #[serde(default)]
    pub options: Vec<ConfigOption>,
}

impl ServiceConfigOption {
    pub fn new(service: impl Into<String>, options: Vec<ConfigOption>) -> Self {
        Self {
            service: service.into(),
            options,
        }
    }
}

/// Lookup and update helpers for a list of service options.
pub trait ServiceConfigList {
    /// Options for a service, if configured.
    fn service_options(&self, service: &str) -> Option<&ServiceConfigOption>;

    /// Value of one option for a service.
    fn service_option_value(&self, service: &str, option: &str) -> Option<&serde_json::Value> {
        self.service_options(service)?
            .options
            .iter()
            .find(|o| o.name == option)
            .map(|o| &o.value)
    }
}

impl ServiceConfigList for [ServiceConfigOption] {
    fn service_options(&self, service: &str) -> Option<&ServiceConfigOption> {
        self.iter().find(|s| s.service == service)
    }
}

impl ServiceConfigList for Vec<ServiceConfigOption> {
    fn service_options(&self, service: &str) -> Option<&ServiceConfigOption> {
        self.as_slice().service_options(service)
    }
}

/// Insert or replace one option for a service, creating the service entry if needed.
pub fn set_service_option(
    config: &mut Vec<ServiceConfigOption>,
    service: &str,
    option: ConfigOption,
) {
    match config.iter_mut().find(|s| s.service == service) {
        Some(entry) => match entry.options.iter_mut().find(|o| o.name == option.name) {
            Some(existing) => existing.value = option.value,
            None => entry.options.push(option),
        },
        None => config.push(ServiceConfigOption::new(service, vec![option])),
    }
}

/// Payload of `update-config`, `config` and `config-updated`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigData {
    #[serde(default)]
    pub config_list: Vec<ServiceConfigOption>,
}

/// Payload of `bot-ready`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BotReadyData {
    pub version: String,
    #[serde(default)]
    pub config: Vec<ServiceConfigOption>,
}

/// Argument passed to a service action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionArgument {
    pub name: String,
    pub value: serde_json::Value,
}

/// Payload of `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionData {
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub arguments: Vec<ActionArgument>,
}

/// Speech to text result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(rename = "final", default)]
    pub is_final: bool,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub user_id: String,
}

/// One processor measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsData {
    pub processor: String,
    pub value: f64,
}

/// Metrics grouped by category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<Vec<MetricsData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<Vec<MetricsData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<MetricsData>>,
}
