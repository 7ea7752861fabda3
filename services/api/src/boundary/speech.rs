//! Speech synthesis backed by the ElevenLabs text-to-speech API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{Json, extract::State};
use reqwest::{StatusCode, header};
use rehearse_core::protocol::{ErrorEnvelope, SpeechRequest};
use rehearse_core::{ServiceError, SpeechSynthesizer};
use serde_json::json;
use tracing::{debug, instrument};

use super::BoundaryError;
use crate::audio_utils::encode_audio;
use crate::models::{SpeechPayload, SpeechView};
use crate::state::AppState;

pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl ElevenLabsSynthesizer {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Remote(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url: ELEVENLABS_BASE_URL.to_string(),
            timeout,
        })
    }

    /// Points the synthesizer at another host, e.g. a local stand-in.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!("{}/v1/text-to-speech/{}", self.base_url, voice_id)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, ServiceError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ServiceError::Configuration("ELEVENLABS_API_KEY is not set".to_string())
        })?;

        debug!(voice = %request.voice_id, model = %request.model_id, "synthesizing speech");
        let transport = |err| ServiceError::from_transport(err, self.timeout);
        let response = self
            .client
            .post(self.endpoint(&request.voice_id))
            .header("xi-api-key", api_key)
            .header(header::ACCEPT, "audio/mpeg")
            .json(&json!({
                "text": request.text,
                "model_id": request.model_id,
            }))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ServiceError::Configuration(
                "ElevenLabs rejected the API key".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Remote(format!(
                "ElevenLabs returned {status}: {body}"
            )));
        }

        let audio = response.bytes().await.map_err(transport)?;
        if audio.is_empty() {
            return Err(ServiceError::Remote(
                "ElevenLabs returned no audio".to_string(),
            ));
        }
        Ok(audio.to_vec())
    }
}

/// Convert text to speech with the given voice.
#[utoipa::path(
    post,
    path = "/text-to-speech",
    request_body = SpeechPayload,
    responses(
        (status = 200, description = "Base64-encoded MPEG audio", body = SpeechView),
        (status = 400, description = "Malformed request", body = ErrorEnvelope),
        (status = 500, description = "Speech service is not configured", body = ErrorEnvelope),
        (status = 502, description = "Upstream synthesis failed", body = ErrorEnvelope),
        (status = 504, description = "Upstream synthesis timed out", body = ErrorEnvelope)
    ),
    tag = "Boundaries"
)]
#[instrument(skip_all, fields(voice = %payload.voice_id))]
pub async fn text_to_speech(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SpeechPayload>,
) -> Result<Json<SpeechView>, BoundaryError> {
    if payload.text.trim().is_empty() {
        return Err(BoundaryError::BadRequest("text must not be empty".to_string()));
    }
    if payload.voice_id.trim().is_empty() {
        return Err(BoundaryError::BadRequest("voiceId must not be empty".to_string()));
    }
    let request = SpeechRequest {
        text: payload.text,
        voice_id: payload.voice_id,
        model_id: payload
            .model_id
            .unwrap_or_else(|| state.config.tts_model.clone()),
    };

    let timeout = state.config.remote_timeout;
    let audio = tokio::time::timeout(timeout, state.speech_boundary.synthesize(&request))
        .await
        .map_err(|_| ServiceError::Timeout(timeout))??;

    Ok(Json(SpeechView {
        audio_content: encode_audio(&audio),
    }))
}
