//! Typed session events and the bus that delivers them.
//!
//! Inbound protocol activity and transport signals are published as
//! [`VoiceEvent`]s. Handlers subscribe per [`EventKind`] and are identified by
//! their `Arc`, so registering the same handler twice is a no-op and
//! unregistering needs the same `Arc` that was registered.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rtvi_client::core::events::{EventBus, EventHandler, EventKind, VoiceEvent};
//!
//! let bus = EventBus::new();
//! let handler: EventHandler = Arc::new(|event: &VoiceEvent| {
//!     if let VoiceEvent::BotTranscript(text) = event {
//!         println!("bot: {}", text);
//!     }
//! });
//! bus.on(EventKind::BotTranscript, handler.clone());
//! bus.publish(&VoiceEvent::BotTranscript("hello".to_string()));
//! bus.off(EventKind::BotTranscript, &handler);
//! ```

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;

use super::messages::{BotReadyData, Message, Metrics, ServiceConfigOption, Transcript};
use super::session::SessionState;
use super::transport::{MediaTrack, Participant, TransportState};

// =============================================================================
// Events
// =============================================================================

/// Event published to application code.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Session state machine moved
    SessionStateChanged(SessionState),
    /// Transport reported a new connection state
    TransportStateChanged(TransportState),
    /// Transport joined the remote session
    Connected,
    /// Transport left the remote session
    Disconnected,
    /// Bot reported ready
    BotReady(BotReadyData),
    /// Bot participant joined
    BotConnected(Participant),
    /// Bot participant left
    BotDisconnected(Participant),
    TrackStarted(MediaTrack),
    TrackStopped(MediaTrack),
    /// Bot configuration snapshot (`config`)
    Config(Vec<ServiceConfigOption>),
    /// Bot applied a configuration update (`config-updated`)
    ConfigUpdated(Vec<ServiceConfigOption>),
    /// Configuration options the bot supports (`config-available`)
    ConfigDescribe(serde_json::Value),
    /// Actions the bot supports (`actions-available`)
    ActionsAvailable(serde_json::Value),
    /// Bot refused a configuration update
    ConfigError(Message),
    /// Bot answered a request with `error-response`
    MessageError(Message),
    /// Session or bot error
    Error(String),
    /// Speech to text result (`transcript`)
    Transcript(Transcript),
    /// Local user speech to text (`user-transcription`)
    UserTranscript(Transcript),
    /// Bot speech text (`tts-text`)
    BotTranscript(String),
    Metrics(Metrics),
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,
    /// Any other message that did not match a pending request
    GenericMessage(Message),
}

/// Discriminant of [`VoiceEvent`] used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStateChanged,
    TransportStateChanged,
    Connected,
    Disconnected,
    BotReady,
    BotConnected,
    BotDisconnected,
    TrackStarted,
    TrackStopped,
    Config,
    ConfigUpdated,
    ConfigDescribe,
    ActionsAvailable,
    ConfigError,
    MessageError,
    Error,
    Transcript,
    UserTranscript,
    BotTranscript,
    Metrics,
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,
    GenericMessage,
}

impl VoiceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            VoiceEvent::SessionStateChanged(_) => EventKind::SessionStateChanged,
            VoiceEvent::TransportStateChanged(_) => EventKind::TransportStateChanged,
            VoiceEvent::Connected => EventKind::Connected,
            VoiceEvent::Disconnected => EventKind::Disconnected,
            VoiceEvent::BotReady(_) => EventKind::BotReady,
            VoiceEvent::BotConnected(_) => EventKind::BotConnected,
            VoiceEvent::BotDisconnected(_) => EventKind::BotDisconnected,
            VoiceEvent::TrackStarted(_) => EventKind::TrackStarted,
            VoiceEvent::TrackStopped(_) => EventKind::TrackStopped,
            VoiceEvent::Config(_) => EventKind::Config,
            VoiceEvent::ConfigUpdated(_) => EventKind::ConfigUpdated,
            VoiceEvent::ConfigDescribe(_) => EventKind::ConfigDescribe,
            VoiceEvent::ActionsAvailable(_) => EventKind::ActionsAvailable,
            VoiceEvent::ConfigError(_) => EventKind::ConfigError,
            VoiceEvent::MessageError(_) => EventKind::MessageError,
            VoiceEvent::Error(_) => EventKind::Error,
            VoiceEvent::Transcript(_) => EventKind::Transcript,
            VoiceEvent::UserTranscript(_) => EventKind::UserTranscript,
            VoiceEvent::BotTranscript(_) => EventKind::BotTranscript,
            VoiceEvent::Metrics(_) => EventKind::Metrics,
            VoiceEvent::UserStartedSpeaking => EventKind::UserStartedSpeaking,
            VoiceEvent::UserStoppedSpeaking => EventKind::UserStoppedSpeaking,
            VoiceEvent::BotStartedSpeaking => EventKind::BotStartedSpeaking,
            VoiceEvent::BotStoppedSpeaking => EventKind::BotStoppedSpeaking,
            VoiceEvent::GenericMessage(_) => EventKind::GenericMessage,
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Handler invoked synchronously for each published event.
pub type EventHandler = Arc<dyn Fn(&VoiceEvent) + Send + Sync>;

/// Publish/subscribe registry keyed by [`EventKind`].
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Registering the same `Arc` again for the same kind
    /// has no effect.
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(kind).or_default();
        if list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            tracing::trace!(?kind, "Handler already registered");
            return;
        }
        list.push(handler);
    }

    /// Unregister a handler by identity. No-op if it was not registered.
    pub fn off(&self, kind: EventKind, handler: &EventHandler) {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(&kind) {
            list.retain(|h| !Arc::ptr_eq(h, handler));
            if list.is_empty() {
                handlers.remove(&kind);
            }
        }
    }

    /// Deliver an event to its handlers in registration order.
    ///
    /// A panicking handler is logged and skipped; the remaining handlers still
    /// run. Handlers may call `on`/`off` from inside the callback.
    pub fn publish(&self, event: &VoiceEvent) {
        let kind = event.kind();
        let snapshot: Vec<EventHandler> = match self.handlers.read().get(&kind) {
            Some(list) => list.clone(),
            None => return,
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(?kind, "Event handler panicked");
            }
        }
    }

    /// Number of handlers registered for a kind.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}
