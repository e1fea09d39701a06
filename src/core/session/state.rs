use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Constructed, never connected (or reset)
    #[default]
    Idle,
    /// Handshake and transport connect in progress
    Connecting,
    /// Transport connected, waiting for `bot-ready`
    Connected,
    /// Bot reported ready; commands are accepted
    Ready,
    /// Explicit disconnect in progress
    Disconnecting,
    /// Session ended
    Disconnected,
    /// Handshake or transport failure
    Error,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (_, Error) => true,
            (Idle | Disconnected | Error, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Ready) => true,
            (Connecting | Connected | Ready, Disconnecting) => true,
            (Disconnecting, Disconnected) => true,
            (Error | Disconnected, Idle) => true,
            _ => false,
        }
    }

    #[inline]
    pub fn is_ready(self) -> bool {
        self == SessionState::Ready
    }

    /// Whether a connection attempt or live session is in progress.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Ready
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Ready => "ready",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
