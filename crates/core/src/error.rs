//! Error taxonomy shared by the engine and its collaborators.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::engine::EngineState;
use crate::scenario::ScenarioId;
use crate::session::TurnId;

/// The caller supplied malformed input. The operation is rejected and no
/// state changes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("text must not be empty")]
    EmptyText,
    #[error("confidence rating must be between 1 and 5, got {0}")]
    RatingOutOfRange(u8),
    #[error("the conversation has no learner turn to evaluate yet")]
    NoLearnerTurn,
}

/// Coarse classification of a remote failure, as shown to the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    /// A credential is missing or invalid. User-actionable, never retried.
    Configuration,
    /// The call failed or timed out. Eligible for a caller-initiated retry.
    RemoteService,
}

/// Failure of a call to the feedback or speech-synthesis boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("service is not configured: {0}")]
    Configuration(String),
    #[error("remote service failed: {0}")]
    Remote(String),
    #[error("remote service did not answer within {0:?}")]
    Timeout(Duration),
}

impl ServiceError {
    #[must_use]
    pub fn kind(&self) -> ServiceErrorKind {
        match self {
            ServiceError::Configuration(_) => ServiceErrorKind::Configuration,
            ServiceError::Remote(_) | ServiceError::Timeout(_) => ServiceErrorKind::RemoteService,
        }
    }
}

impl ServiceErrorKind {
    /// Status line suitable for showing next to the affected control.
    #[must_use]
    pub fn status_message(self) -> &'static str {
        match self {
            ServiceErrorKind::Configuration => "AI connection failed - check configuration",
            ServiceErrorKind::RemoteService => "AI service is unavailable right now - try again",
        }
    }
}

impl ServiceError {
    /// Maps a transport failure of a call bounded by `timeout`.
    #[must_use]
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout(timeout)
        } else {
            ServiceError::Remote(err.to_string())
        }
    }
}

/// Errors emitted by `CheckpointScenarioEngine`.
///
/// Remote-service failures never appear here; they are reported as status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("`{operation}` is not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },
    #[error("unknown scenario `{0}`")]
    UnknownScenario(ScenarioId),
    #[error("turn {0} is not part of the current conversation")]
    UnknownTurn(TurnId),
    #[error("session has been discarded")]
    Discarded,
}
