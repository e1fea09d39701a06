//! Error types shared across the RTVI client.
//!
//! Every fallible operation in the crate returns [`RtviResult`]. Protocol-level
//! error replies from the bot are carried as the original [`Message`] so callers
//! can inspect the payload the bot sent back.

use std::time::Duration;

use thiserror::Error;

use crate::core::messages::Message;
use crate::core::session::SessionState;

/// Errors that can occur while running an RTVI session.
#[derive(Debug, Clone, Error)]
pub enum RtviError {
    /// Invalid client options
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A command needing a ready bot was issued too early (or too late)
    #[error("Bot is not ready (session state: {state})")]
    NotReady { state: SessionState },

    /// Refused session state transition
    #[error("Invalid session state transition: {from} -> {to}")]
    InvalidStateTransition { from: SessionState, to: SessionState },

    /// Handshake with the base endpoint failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The bot did not report ready before the handshake deadline
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport is not connected
    #[error("Not connected")]
    NotConnected,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Outbound message that breaks the envelope rules (foreign label, empty id)
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Another request with the same id is still in flight
    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),

    /// The bot answered a request with an error message
    #[error("Bot returned {} for request {}", .0.message_type, .0.id)]
    ErrorResponse(Message),

    /// No reply arrived within the request horizon
    #[error("Request {id} timed out after {horizon:?}")]
    RequestTimeout { id: String, horizon: Duration },

    /// The request was dropped before a reply arrived
    #[error("Request {id} cancelled: {reason}")]
    RequestCancelled { id: String, reason: String },

    /// Error reported by the bot outside of a request
    #[error("Bot error: {0}")]
    BotError(String),
}

/// Result type for RTVI operations.
pub type RtviResult<T> = Result<T, RtviError>;

impl From<serde_json::Error> for RtviError {
    fn from(err: serde_json::Error) -> Self {
        RtviError::Serialization(err.to_string())
    }
}

impl RtviError {
    /// The bot's error message, if this error wraps one.
    pub fn error_message(&self) -> Option<&Message> {
        match self {
            RtviError::ErrorResponse(message) => Some(message),
            _ => None,
        }
    }
}
