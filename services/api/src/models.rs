//! API Models
//!
//! Request payloads and response views of the REST surface, annotated for
//! OpenAPI generation with `utoipa`. Core types are converted here so the
//! engine crate stays free of HTTP concerns.

use chrono::{DateTime, Utc};
use rehearse_core::engine::{FeedbackReport, ResetOutcome, SessionResult, TurnOutcome};
use rehearse_core::protocol::{ConversationLine, FeedbackRequest};
use rehearse_core::{
    CheckpointScenarioEngine, ConnectionStatus, DialogueTurn, EngineState, Scenario,
    ServiceErrorKind, Speaker, TopicCategory,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConversationLinePayload {
    #[schema(value_type = String, example = "user")]
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackPayload {
    #[serde(default)]
    pub conversation: Vec<ConversationLinePayload>,
    #[schema(example = "On a scale from 0 to 10, how bad is the pain?")]
    pub user_response: String,
    #[serde(default)]
    pub scenario_context: Option<String>,
}

impl From<FeedbackPayload> for FeedbackRequest {
    fn from(payload: FeedbackPayload) -> Self {
        Self {
            conversation: payload
                .conversation
                .into_iter()
                .map(|line| ConversationLine {
                    speaker: line.speaker,
                    text: line.text,
                })
                .collect(),
            user_response: payload.user_response,
            scenario_context: payload.scenario_context,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedbackAnswer {
    pub feedback: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpeechPayload {
    #[schema(example = "Good morning, I'm your nurse today.")]
    pub text: String,
    pub voice_id: String,
    #[serde(default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpeechView {
    /// Base64-encoded MPEG audio.
    pub audio_content: String,
}

#[derive(Serialize, ToSchema)]
pub struct ScenarioSummary {
    #[schema(example = "handover")]
    pub id: String,
    pub title: String,
    pub category: String,
    #[schema(example = "beginner")]
    pub difficulty: String,
    pub tags: Vec<String>,
    pub context: Option<String>,
    pub checkpoints: Vec<String>,
}

impl From<&Scenario> for ScenarioSummary {
    fn from(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id.to_string(),
            title: scenario.title.clone(),
            category: scenario.category.clone(),
            difficulty: scenario.difficulty.to_string(),
            tags: scenario.tags.iter().cloned().collect(),
            context: scenario.context.clone(),
            checkpoints: scenario.checkpoints.iter().map(|c| c.goal.clone()).collect(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionPayload {
    #[schema(example = "handover")]
    pub scenario_id: String,
}

/// Where a session is in its scenario.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress { checkpoint: usize },
    AwaitingRating,
    Completed,
}

impl From<EngineState> for SessionStatus {
    fn from(state: EngineState) -> Self {
        match state {
            EngineState::NotStarted => SessionStatus::NotStarted,
            EngineState::InProgress(checkpoint) => SessionStatus::InProgress { checkpoint },
            EngineState::AwaitingRating => SessionStatus::AwaitingRating,
            EngineState::Completed => SessionStatus::Completed,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct TurnView {
    pub id: u64,
    #[schema(value_type = String, example = "user")]
    pub speaker: Speaker,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<&DialogueTurn> for TurnView {
    fn from(turn: &DialogueTurn) -> Self {
        Self {
            id: turn.id().value(),
            speaker: turn.speaker(),
            text: turn.text().to_string(),
            created_at: turn.created_at(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub scenario_id: Option<String>,
    pub state: SessionStatus,
    pub checkpoint_count: usize,
    pub current_goal: Option<String>,
    #[schema(value_type = String, example = "unknown")]
    pub connection_status: ConnectionStatus,
    pub confidence_score: Option<u8>,
    pub can_reset: bool,
    pub conversation: Vec<TurnView>,
}

impl SessionView {
    pub fn new(id: Uuid, engine: &CheckpointScenarioEngine) -> Self {
        let session = engine.session();
        Self {
            id,
            scenario_id: session.map(|s| s.scenario_id().to_string()),
            state: engine.state().into(),
            checkpoint_count: engine.scenario().map_or(0, |s| s.checkpoint_count()),
            current_goal: engine.current_goal().map(|c| c.goal.clone()),
            connection_status: engine.connection_status(),
            confidence_score: session
                .and_then(|s| s.confidence_score())
                .map(|score| score.value()),
            can_reset: engine.can_reset(),
            conversation: session
                .map(|s| s.conversation_log().iter().map(TurnView::from).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct TurnPayload {
    #[schema(example = "How would you rate your pain right now?")]
    pub text: String,
}

#[derive(Serialize, ToSchema)]
pub struct TurnResultView {
    pub learner_turn: TurnView,
    pub reply: TurnView,
    #[schema(value_type = String, example = "pain")]
    pub category: TopicCategory,
    /// The reply is the fallback apology.
    pub degraded: bool,
    pub checkpoint_reached: Option<usize>,
    pub state: SessionStatus,
}

impl From<&TurnOutcome> for TurnResultView {
    fn from(outcome: &TurnOutcome) -> Self {
        Self {
            learner_turn: TurnView::from(&outcome.learner_turn),
            reply: TurnView::from(&outcome.reply),
            category: outcome.category,
            degraded: outcome.degraded,
            checkpoint_reached: outcome.checkpoint_reached,
            state: outcome.state.into(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct GuidanceView {
    pub checkpoint: usize,
    pub guidance: String,
}

#[derive(Serialize, ToSchema)]
pub struct ResetView {
    /// `false` when the conversation only held its opening lines.
    pub reset: bool,
    pub session: SessionView,
}

impl ResetView {
    pub fn new(outcome: ResetOutcome, session: SessionView) -> Self {
        Self {
            reset: outcome == ResetOutcome::Reset,
            session,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct RatingPayload {
    #[schema(example = 4, minimum = 1, maximum = 5)]
    pub score: u8,
}

#[derive(Serialize, ToSchema)]
pub struct SessionResultView {
    pub scenario_id: String,
    pub confidence_score: u8,
    pub learner_turns: usize,
    pub completed_at: DateTime<Utc>,
}

impl From<SessionResult> for SessionResultView {
    fn from(result: SessionResult) -> Self {
        Self {
            scenario_id: result.scenario_id.to_string(),
            confidence_score: result.confidence_score.value(),
            learner_turns: result.learner_turns,
            completed_at: result.completed_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct FeedbackView {
    /// The learner turn the feedback describes.
    pub turn_id: u64,
    pub feedback: String,
    #[schema(value_type = Option<String>, example = "remote_service")]
    pub failure: Option<ServiceErrorKind>,
    /// What to show next to the feedback control when the call failed.
    pub status_message: Option<String>,
}

impl From<FeedbackReport> for FeedbackView {
    fn from(report: FeedbackReport) -> Self {
        Self {
            turn_id: report.turn_id.value(),
            status_message: report.failure.map(|kind| kind.status_message().to_string()),
            feedback: report.text,
            failure: report.failure,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ConnectionView {
    #[schema(value_type = String, example = "connected")]
    pub status: ConnectionStatus,
    pub message: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackView {
    pub turn_id: u64,
    /// Base64-encoded MPEG audio; absent when playback failed.
    pub audio_content: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rehearse_core::TurnId;
    use rehearse_core::protocol::{FeedbackResponse, SpeechResponse};

    #[test]
    fn test_session_status_serialization() {
        let json = serde_json::to_value(SessionStatus::InProgress { checkpoint: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "in_progress", "checkpoint": 2}));

        let json = serde_json::to_value(SessionStatus::AwaitingRating).unwrap();
        assert_eq!(json, serde_json::json!({"status": "awaiting_rating"}));
    }

    #[test]
    fn test_session_status_from_engine_state() {
        assert_eq!(SessionStatus::from(EngineState::NotStarted), SessionStatus::NotStarted);
        assert_eq!(
            SessionStatus::from(EngineState::InProgress(1)),
            SessionStatus::InProgress { checkpoint: 1 }
        );
        assert_eq!(SessionStatus::from(EngineState::Completed), SessionStatus::Completed);
    }

    #[test]
    fn test_feedback_payload_deserialization() {
        let payload: FeedbackPayload = serde_json::from_str(
            r#"{
                "conversation": [{"speaker": "assistant", "text": "Hello nurse."}],
                "userResponse": "Hello, how are you feeling?"
            }"#,
        )
        .unwrap();

        let request = FeedbackRequest::from(payload);
        assert_eq!(request.conversation.len(), 1);
        assert_eq!(request.conversation[0].speaker, Speaker::Assistant);
        assert_eq!(request.user_response, "Hello, how are you feeling?");
        assert_eq!(request.scenario_context, None);
    }

    #[test]
    fn test_boundary_answers_match_the_wire_format() {
        let json = serde_json::to_string(&FeedbackAnswer {
            feedback: "Nice.".into(),
        })
        .unwrap();
        let parsed: FeedbackResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.feedback, "Nice.");

        let json = serde_json::to_string(&SpeechView {
            audio_content: "SUQz".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"audioContent":"SUQz"}"#);
        let parsed: SpeechResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.audio_content, "SUQz");
    }

    #[test]
    fn test_feedback_view_carries_the_status_message() {
        let view = FeedbackView::from(FeedbackReport {
            turn_id: TurnId::new(4),
            text: rehearse_core::FEEDBACK_FALLBACK.to_string(),
            failure: Some(ServiceErrorKind::Configuration),
        });
        assert_eq!(
            view.status_message.as_deref(),
            Some(ServiceErrorKind::Configuration.status_message())
        );

        let view = FeedbackView::from(FeedbackReport {
            turn_id: TurnId::new(4),
            text: "Well done.".into(),
            failure: None,
        });
        assert!(view.status_message.is_none());
        assert_eq!(
            serde_json::to_value(&view).unwrap()["turn_id"],
            serde_json::json!(4)
        );
    }
}
