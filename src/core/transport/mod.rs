//! Transports carrying RTVI messages between the client and the bot.
//!
//! # Available Transports
//!
//! - **WebSocket** - JSON envelopes over a WebSocket, endpoint taken from the auth bundle
//! - **Memory** - in-process transport that records outbound messages and
//!   replays injected events
//!
//! Media-capable transports (WebRTC rooms and the like) plug in by
//! implementing [`Transport`].

mod base;
mod memory;
pub mod websocket;

use std::sync::Arc;

pub use base::{
    MediaTrack, Participant, ParticipantTracks, TrackKind, Tracks, Transport, TransportEvent,
    TransportEventReceiver, TransportEventSender, TransportState,
};
pub use memory::MemoryTransport;
pub use websocket::{WebSocketTransport, WebSocketTransportConfig, WsAuthBundle};

/// Built-in transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Memory,
}

impl TransportKind {
    /// Parse a transport name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "websocket" | "ws" => Some(TransportKind::WebSocket),
            "memory" | "in-memory" => Some(TransportKind::Memory),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Memory => write!(f, "memory"),
        }
    }
}

/// Create a built-in transport with default settings.
pub fn create_transport(kind: TransportKind) -> Arc<dyn Transport> {
    match kind {
        TransportKind::WebSocket => Arc::new(WebSocketTransport::default()),
        TransportKind::Memory => Arc::new(MemoryTransport::new()),
    }
}

/// Names accepted by [`TransportKind::parse`].
pub fn get_supported_transports() -> Vec<&'static str> {
    vec!["websocket", "memory"]
}
