//! Test Fixtures Module
//!
//! Shared helpers for the session integration tests:
//! - Client options and bot messages
//! - Handshake endpoint mocks
//! - Event recording

// Allow dead code in test fixtures - not every test binary uses every helper
#![allow(dead_code)]

pub mod session_fixtures;

pub use session_fixtures::*;
