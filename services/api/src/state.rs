//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the process-wide
//! collaborators every session shares and the registry of live sessions.

use crate::config::Config;
use crate::sessions::SessionRegistry;
use rehearse_core::{EngineServices, FeedbackClient, SpeechSynthesizer};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    /// What practice sessions use. May reach the boundaries over HTTP.
    pub services: EngineServices,
    /// Served at `POST /feedback`.
    pub feedback_boundary: FeedbackClient,
    /// Served at `POST /text-to-speech`.
    pub speech_boundary: Arc<dyn SpeechSynthesizer>,
    pub sessions: SessionRegistry,
}
