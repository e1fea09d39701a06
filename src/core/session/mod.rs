//! Session lifecycle: state machine, handshake and the [`VoiceClient`] orchestrator.

mod auth;
mod client;
mod state;

pub use auth::{AuthHandler, HandshakeRequest, HttpAuthHandler, build_handshake_body};
pub use client::VoiceClient;
pub use state::SessionState;
