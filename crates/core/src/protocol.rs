//! Wire formats of the feedback and speech-synthesis boundaries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ServiceError, ServiceErrorKind};
use crate::session::{DialogueTurn, Speaker};

/// Speech model used when a request does not name one.
pub const DEFAULT_SPEECH_MODEL: &str = "eleven_multilingual_v2";

/// One line of the conversation snapshot sent for evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationLine {
    pub speaker: Speaker,
    pub text: String,
}

impl From<&DialogueTurn> for ConversationLine {
    fn from(turn: &DialogueTurn) -> Self {
        Self {
            speaker: turn.speaker(),
            text: turn.text().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub conversation: Vec<ConversationLine>,
    pub user_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_context: Option<String>,
}

impl FeedbackRequest {
    /// Minimal request used to check that the feedback path is reachable.
    #[must_use]
    pub fn probe() -> Self {
        Self {
            conversation: Vec::new(),
            user_response: "Hello, this is a connection test.".to_string(),
            scenario_context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechRequest {
    pub text: String,
    pub voice_id: String,
    #[serde(default = "default_speech_model")]
    pub model_id: String,
}

fn default_speech_model() -> String {
    DEFAULT_SPEECH_MODEL.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechResponse {
    /// Base64-encoded audio.
    pub audio_content: String,
}

/// Body of every non-2xx boundary response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ServiceErrorKind>,
}

impl ErrorEnvelope {
    #[must_use]
    pub fn from_error(err: &ServiceError) -> Self {
        Self {
            error: err.to_string(),
            kind: Some(err.kind()),
        }
    }

    /// A missing `kind` is treated as a remote failure.
    #[must_use]
    pub fn into_error(self) -> ServiceError {
        match self.kind {
            Some(ServiceErrorKind::Configuration) => ServiceError::Configuration(self.error),
            Some(ServiceErrorKind::RemoteService) | None => ServiceError::Remote(self.error),
        }
    }
}

/// Turns a non-success boundary response into a `ServiceError`, using the
/// error envelope when the body carries one.
pub(crate) async fn error_from_response(
    response: reqwest::Response,
    timeout: Duration,
) -> ServiceError {
    let status = response.status();
    match response.text().await {
        Ok(body) => match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => envelope.into_error(),
            Err(_) if body.trim().is_empty() => {
                ServiceError::Remote(format!("boundary answered {status}"))
            }
            Err(_) => ServiceError::Remote(format!("boundary answered {status}: {body}")),
        },
        Err(err) => ServiceError::from_transport(err, timeout),
    }
}
