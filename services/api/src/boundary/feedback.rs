//! Feedback generation backed by an OpenAI chat model.

use std::fmt::Write as _;
use std::sync::Arc;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use axum::{Json, extract::State};
use rehearse_core::protocol::{ErrorEnvelope, FeedbackRequest};
use rehearse_core::{FeedbackService, ServiceError, Speaker};
use tracing::{debug, instrument};

use super::BoundaryError;
use crate::models::{FeedbackAnswer, FeedbackPayload};
use crate::state::AppState;

/// Generates coaching feedback for the learner's latest response.
///
/// Built without a key, every call fails with a configuration error instead
/// of reaching the network.
pub struct OpenAiFeedbackService {
    client: Option<Client<OpenAIConfig>>,
    model: String,
    system_prompt: String,
}

impl OpenAiFeedbackService {
    pub fn new(api_key: Option<&str>, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            client: api_key.map(|key| Client::with_config(OpenAIConfig::new().with_api_key(key))),
            model: model.into(),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    async fn complete(
        &self,
        client: &Client<OpenAIConfig>,
        request: &FeedbackRequest,
    ) -> Result<Option<String>, OpenAIError> {
        let chat = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.system_prompt.as_str())
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(render_user_message(request))
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = client.chat().create(chat).await?;
        Ok(response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone()))
    }
}

/// Lays out the conversation for the model, newest response last.
pub fn render_user_message(request: &FeedbackRequest) -> String {
    let mut message = String::new();
    if let Some(context) = &request.scenario_context {
        let _ = writeln!(message, "Scenario: {context}\n");
    }
    if !request.conversation.is_empty() {
        message.push_str("Conversation so far:\n");
        for line in &request.conversation {
            let who = match line.speaker {
                Speaker::User => "Student",
                Speaker::Assistant => "Patient",
            };
            let _ = writeln!(message, "{who}: {}", line.text);
        }
        message.push('\n');
    }
    let _ = write!(
        message,
        "Student's latest response to evaluate:\n{}",
        request.user_response
    );
    message
}

#[async_trait]
impl FeedbackService for OpenAiFeedbackService {
    async fn generate_feedback(&self, request: &FeedbackRequest) -> Result<String, ServiceError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ServiceError::Configuration("OPENAI_API_KEY is not set".to_string()))?;

        debug!(model = %self.model, turns = request.conversation.len(), "requesting feedback");
        let answer = self
            .complete(client, request)
            .await
            .map_err(|err| match err {
                OpenAIError::ApiError(api) => ServiceError::Remote(api.message),
                other => ServiceError::Remote(other.to_string()),
            })?;

        answer
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ServiceError::Remote("No content in LLM response".to_string()))
    }
}

/// Generate feedback on the learner's latest response.
#[utoipa::path(
    post,
    path = "/feedback",
    request_body = FeedbackPayload,
    responses(
        (status = 200, description = "Feedback generated", body = FeedbackAnswer),
        (status = 400, description = "Malformed request", body = ErrorEnvelope),
        (status = 500, description = "Feedback service is not configured", body = ErrorEnvelope),
        (status = 502, description = "Upstream model failed", body = ErrorEnvelope),
        (status = 504, description = "Upstream model timed out", body = ErrorEnvelope)
    ),
    tag = "Boundaries"
)]
#[instrument(skip_all, fields(turns = payload.conversation.len()))]
pub async fn generate_feedback(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FeedbackPayload>,
) -> Result<Json<FeedbackAnswer>, BoundaryError> {
    if payload.user_response.trim().is_empty() {
        return Err(BoundaryError::BadRequest(
            "userResponse must not be empty".to_string(),
        ));
    }
    let request = FeedbackRequest::from(payload);
    let feedback = state.feedback_boundary.evaluate(&request).await?;
    Ok(Json(FeedbackAnswer { feedback }))
}
