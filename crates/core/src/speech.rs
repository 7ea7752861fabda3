//! Client side of the remote speech-synthesis service.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ServiceError;
use crate::protocol::{SpeechRequest, SpeechResponse, error_from_response};
use crate::session::Speaker;

pub const DEFAULT_ASSISTANT_VOICE: &str = "EXAVITQu4vr4xnSDxMaL";
pub const DEFAULT_LEARNER_VOICE: &str = "TX3LPaxmHKxFdv7VOQHJ";

/// Turns text into encoded audio bytes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, ServiceError>;
}

/// Voice used for each side of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceMap {
    pub assistant: String,
    pub learner: String,
}

impl VoiceMap {
    #[must_use]
    pub fn voice_for(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::Assistant => &self.assistant,
            Speaker::User => &self.learner,
        }
    }
}

impl Default for VoiceMap {
    fn default() -> Self {
        Self {
            assistant: DEFAULT_ASSISTANT_VOICE.to_string(),
            learner: DEFAULT_LEARNER_VOICE.to_string(),
        }
    }
}

/// Reaches a speech boundary over HTTP and decodes its base64 payload.
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpSpeechSynthesizer {
    /// # Errors
    ///
    /// Returns `ServiceError::Remote` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Remote(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, ServiceError> {
        let transport = |err| ServiceError::from_transport(err, self.timeout);
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(error_from_response(response, self.timeout).await);
        }
        let body: SpeechResponse = response.json().await.map_err(transport)?;
        decode_audio(&body.audio_content)
    }
}

/// # Errors
///
/// Returns `ServiceError::Remote` when the payload is not valid base64 or
/// decodes to nothing.
pub fn decode_audio(encoded: &str) -> Result<Vec<u8>, ServiceError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ServiceError::Remote(format!("audio payload is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(ServiceError::Remote("audio payload is empty".to_string()));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_follows_the_speaker() {
        let voices = VoiceMap {
            assistant: "patient".into(),
            learner: "nurse".into(),
        };
        assert_eq!(voices.voice_for(Speaker::Assistant), "patient");
        assert_eq!(voices.voice_for(Speaker::User), "nurse");
    }

    #[test]
    fn decodes_base64_audio() {
        assert_eq!(decode_audio("SUQz\n").unwrap(), b"ID3".to_vec());
        assert!(decode_audio("not base64!").is_err());
        assert!(decode_audio("").is_err());
    }
}
