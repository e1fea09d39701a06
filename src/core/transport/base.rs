//! Base trait and types for RTVI transports.
//!
//! A transport owns the media and signaling channel to the bot. The session
//! layer only needs three things from it: a way to send a [`Message`], a
//! stream of inbound activity, and connection state reporting. Inbound
//! activity is delivered as [`TransportEvent`]s over an unbounded channel
//! handed to the transport in [`Transport::initialize`], which keeps delivery
//! strictly ordered.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::VoiceClientOptions;
use crate::core::messages::Message;
use crate::errors::RtviResult;

// =============================================================================
// Transport State
// =============================================================================

/// Low-level connection state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// Not initialized
    #[default]
    Idle,
    /// Setting up devices and channels
    Initializing,
    /// Ready to connect
    Initialized,
    /// Waiting for the auth bundle
    Authenticating,
    /// Joining the remote session
    Connecting,
    /// Joined the remote session
    Connected,
    /// Bot is ready
    Ready,
    /// Left the remote session
    Disconnected,
    /// Unrecoverable failure
    Error,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Idle => "idle",
            TransportState::Initializing => "initializing",
            TransportState::Initialized => "initialized",
            TransportState::Authenticating => "authenticating",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Ready => "ready",
            TransportState::Disconnected => "disconnected",
            TransportState::Error => "error",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Media Types
// =============================================================================

/// A participant in the remote session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// True for the local user
    #[serde(default)]
    pub local: bool,
}

/// Media track kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle describing a media track owned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    #[serde(default)]
    pub participant: Option<Participant>,
}

/// Audio and video tracks of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantTracks {
    pub audio: Option<MediaTrack>,
    pub video: Option<MediaTrack>,
}

/// Tracks currently known to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tracks {
    pub local: ParticipantTracks,
    pub bot: ParticipantTracks,
}

// =============================================================================
// Events
// =============================================================================

/// Inbound activity reported by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Decoded RTVI message from the bot
    Message(Message),
    /// Connection state changed
    StateChanged(TransportState),
    /// A media track became available
    TrackStarted(MediaTrack),
    /// A media track went away
    TrackStopped(MediaTrack),
    /// A remote participant joined
    ParticipantJoined(Participant),
    /// A remote participant left
    ParticipantLeft(Participant),
    /// Unrecoverable transport failure
    Error(String),
}

/// Sending half handed to a transport at initialization.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half consumed by the session event loop.
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

// =============================================================================
// Base Trait
// =============================================================================

/// Channel between the client and the bot.
///
/// Implementations use interior mutability: the session shares one transport
/// between the dispatcher (which forwards messages) and the connect/disconnect
/// path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare the transport and register the inbound event sink.
    ///
    /// Called once per connection attempt, before [`Transport::connect`].
    async fn initialize(
        &self,
        options: &VoiceClientOptions,
        events: TransportEventSender,
    ) -> RtviResult<()>;

    /// Join the remote session using the bundle returned by the handshake.
    async fn connect(&self, auth_bundle: serde_json::Value) -> RtviResult<()>;

    /// Leave the remote session.
    async fn disconnect(&self) -> RtviResult<()>;

    /// Queue a message for delivery to the bot. Must not block.
    fn send_message(&self, message: &Message) -> RtviResult<()>;

    /// Current connection state.
    fn state(&self) -> TransportState;

    /// Enable or disable the local microphone.
    fn enable_mic(&self, enable: bool);

    /// Enable or disable the local camera.
    fn enable_cam(&self, enable: bool);

    fn is_mic_enabled(&self) -> bool;

    fn is_cam_enabled(&self) -> bool;

    /// Media tracks currently known to the transport.
    fn tracks(&self) -> Tracks {
        Tracks::default()
    }
}
