//! In-process transport.
//!
//! `MemoryTransport` never leaves the process: outbound messages are recorded
//! and inbound activity is injected by the owner through [`MemoryTransport::inject`].
//! It stands in for a real bot in tests and local tooling.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::base::{Tracks, Transport, TransportEvent, TransportEventSender, TransportState};
use crate::config::VoiceClientOptions;
use crate::core::messages::{Message, MessageType};
use crate::errors::{RtviError, RtviResult};

/// Transport that records outbound messages and replays injected events.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<TransportState>,
    events: Mutex<Option<TransportEventSender>>,
    sent: Mutex<Vec<Message>>,
    auth_bundles: Mutex<Vec<serde_json::Value>>,
    tracks: Mutex<Tracks>,
    mic_enabled: AtomicBool,
    cam_enabled: AtomicBool,
    /// Report `Connected` as soon as `connect` is called
    auto_connect: AtomicBool,
    /// Refuse outbound messages
    fail_sends: AtomicBool,
}

impl MemoryTransport {
    /// Transport that reports `Connected` when `connect` is called.
    pub fn new() -> Self {
        let transport = Self::default();
        transport.auto_connect.store(true, Ordering::SeqCst);
        transport
    }

    /// Transport that stays in `Connecting` until the owner injects a state change.
    pub fn manual() -> Self {
        Self::default()
    }

    /// Make every subsequent `send_message` fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event as if it came from the remote side.
    ///
    /// Returns false when no session is listening.
    pub fn inject(&self, event: TransportEvent) -> bool {
        if let TransportEvent::StateChanged(state) = &event {
            *self.state.lock() = *state;
        }
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an inbound message.
    pub fn inject_message(&self, message: Message) -> bool {
        self.inject(TransportEvent::Message(message))
    }

    /// Messages sent so far, oldest first.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Most recent outbound message of the given type.
    pub fn last_sent(&self, message_type: &MessageType) -> Option<Message> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|m| &m.message_type == message_type)
            .cloned()
    }

    /// Auth bundles received by `connect`.
    pub fn auth_bundles(&self) -> Vec<serde_json::Value> {
        self.auth_bundles.lock().clone()
    }

    /// Replace the tracks reported by `tracks()`.
    pub fn set_tracks(&self, tracks: Tracks) {
        *self.tracks.lock() = tracks;
    }

    fn set_state(&self, state: TransportState) {
        self.inject(TransportEvent::StateChanged(state));
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn initialize(
        &self,
        options: &VoiceClientOptions,
        events: TransportEventSender,
    ) -> RtviResult<()> {
        self.mic_enabled.store(options.enable_mic, Ordering::SeqCst);
        self.cam_enabled.store(options.enable_cam, Ordering::SeqCst);
        *self.events.lock() = Some(events);
        self.set_state(TransportState::Initialized);
        Ok(())
    }

    async fn connect(&self, auth_bundle: serde_json::Value) -> RtviResult<()> {
        if self.events.lock().is_none() {
            return Err(RtviError::Transport("transport not initialized".to_string()));
        }
        self.auth_bundles.lock().push(auth_bundle);
        self.set_state(TransportState::Connecting);
        if self.auto_connect.load(Ordering::SeqCst) {
            self.set_state(TransportState::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> RtviResult<()> {
        self.set_state(TransportState::Disconnected);
        *self.events.lock() = None;
        Ok(())
    }

    fn send_message(&self, message: &Message) -> RtviResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RtviError::Transport("send refused".to_string()));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn enable_mic(&self, enable: bool) {
        self.mic_enabled.store(enable, Ordering::SeqCst);
    }

    fn enable_cam(&self, enable: bool) {
        self.cam_enabled.store(enable, Ordering::SeqCst);
    }

    fn is_mic_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::SeqCst)
    }

    fn is_cam_enabled(&self) -> bool {
        self.cam_enabled.load(Ordering::SeqCst)
    }

    fn tracks(&self) -> Tracks {
        self.tracks.lock().clone()
    }
}
