//! Axum Handlers for the practice-session REST API
//!
//! Each handler locks one session's engine for the duration of the engine
//! operation. Remote calls that can take long (feedback, speech) run with the
//! lock released and are reconciled with the session afterwards.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use rehearse_core::{
    CheckpointScenarioEngine, EngineError, PlaybackOutcome, ScenarioId, SurfaceId, TurnId,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    audio_utils::{ClipSink, encode_audio},
    models::{
        ConnectionView, CreateSessionPayload, ErrorResponse, FeedbackView, GuidanceView,
        PlaybackView, RatingPayload, ResetView, ScenarioSummary, SessionResultView, SessionView,
        TurnPayload, TurnResultView,
    },
    sessions::{EVENT_BUFFER, SharedEngine, spawn_event_logger},
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Gone(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Gone(message) => (StatusCode::GONE, message),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::Validation(_) => ApiError::BadRequest(err.to_string()),
            EngineError::InvalidState { .. } => ApiError::Conflict(err.to_string()),
            EngineError::UnknownScenario(_) | EngineError::UnknownTurn(_) => {
                ApiError::NotFound(err.to_string())
            }
            EngineError::Discarded => ApiError::Gone(err.to_string()),
            _ => ApiError::InternalServerError(err.into()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

async fn find_session(state: &AppState, id: Uuid) -> Result<SharedEngine, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))
}

/// List the scenarios a learner can rehearse.
#[utoipa::path(
    get,
    path = "/scenarios",
    responses(
        (status = 200, description = "Available scenarios", body = [ScenarioSummary])
    ),
    tag = "Practice"
)]
pub async fn list_scenarios(State(state): State<Arc<AppState>>) -> Json<Vec<ScenarioSummary>> {
    Json(
        state
            .services
            .catalog
            .scenarios()
            .map(|scenario| ScenarioSummary::from(scenario.as_ref()))
            .collect(),
    )
}

/// Start a practice session on a scenario.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session started", body = SessionView),
        (status = 404, description = "Unknown scenario", body = ErrorResponse)
    ),
    tag = "Practice"
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let id = Uuid::new_v4();
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let mut engine = CheckpointScenarioEngine::new(state.services.clone(), SurfaceId::for_session(id))
        .with_events(events_tx);
    engine.start(&ScenarioId::new(payload.scenario_id))?;

    let view = SessionView::new(id, &engine);
    state.sessions.insert(id, engine).await;
    spawn_event_logger(id, events_rx);
    info!(session_id = %id, "practice session created");

    Ok((StatusCode::CREATED, Json(view)))
}

/// Get a session with its conversation so far.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID")),
    tag = "Practice"
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let engine = find_session(&state, id).await?;
    let engine = engine.lock().await;
    Ok(Json(SessionView::new(id, &engine)))
}

/// End a session and discard its state.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Session discarded"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID")),
    tag = "Practice"
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(id).await {
        info!(session_id = %id, "practice session discarded");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Session with id '{}' not found", id)))
    }
}

/// Say something to the simulated patient.
#[utoipa::path(
    post,
    path = "/sessions/{id}/turns",
    request_body = TurnPayload,
    responses(
        (status = 200, description = "The learner's turn and the reply", body = TurnResultView),
        (status = 400, description = "Empty text", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session is not in progress", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID")),
    tag = "Practice"
)]
pub async fn submit_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TurnPayload>,
) -> Result<Json<TurnResultView>, ApiError> {
    let engine = find_session(&state, id).await?;
    let outcome = engine.lock().await.submit_turn(&payload.text).await?;
    Ok(Json(TurnResultView::from(&outcome)))
}

/// Get guidance for the current checkpoint.
#[utoipa::path(
    get,
    path = "/sessions/{id}/guidance",
    responses(
        (status = 200, description = "Guidance text", body = GuidanceView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session is not in progress", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID")),
    tag = "Practice"
)]
pub async fn get_guidance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<GuidanceView>, ApiError> {
    let engine = find_session(&state, id).await?;
    let engine = engine.lock().await;
    let guidance = engine.request_guidance()?.to_string();
    let checkpoint = engine.session().map_or(0, |s| s.checkpoint_index());
    Ok(Json(GuidanceView {
        checkpoint,
        guidance,
    }))
}

/// Clear the conversation back to the opening line.
#[utoipa::path(
    post,
    path = "/sessions/{id}/reset",
    responses(
        (status = 200, description = "Reset applied, or skipped for a fresh conversation", body = ResetView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session has not started or is completed", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID")),
    tag = "Practice"
)]
pub async fn reset_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResetView>, ApiError> {
    let engine = find_session(&state, id).await?;
    let mut engine = engine.lock().await;
    let outcome = engine.reset_conversation()?;
    Ok(Json(ResetView::new(outcome, SessionView::new(id, &engine))))
}

/// Submit the learner's confidence rating and complete the session.
#[utoipa::path(
    post,
    path = "/sessions/{id}/rating",
    request_body = RatingPayload,
    responses(
        (status = 200, description = "Session completed", body = SessionResultView),
        (status = 400, description = "Score outside 1..=5", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session is not awaiting a rating", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID")),
    tag = "Practice"
)]
pub async fn submit_rating(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RatingPayload>,
) -> Result<Json<SessionResultView>, ApiError> {
    let engine = find_session(&state, id).await?;
    let result = engine.lock().await.submit_rating(payload.score)?;
    Ok(Json(result.into()))
}

/// Check that the feedback service is reachable.
#[utoipa::path(
    post,
    path = "/sessions/{id}/connection-test",
    responses(
        (status = 200, description = "Probe result", body = ConnectionView),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID")),
    tag = "Practice"
)]
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionView>, ApiError> {
    let engine = find_session(&state, id).await?;
    let probe = engine.lock().await.test_connection().await?;
    Ok(Json(ConnectionView {
        status: probe.status,
        message: probe
            .failure
            .map(|err| err.kind().status_message().to_string()),
    }))
}

/// Get feedback on the learner's latest turn.
///
/// A failed call still answers 200 with the fallback text and the failure
/// kind. The answer names the learner turn it describes, which may be older
/// than the latest turn if the learner spoke while it was being generated.
#[utoipa::path(
    post,
    path = "/sessions/{id}/feedback",
    responses(
        (status = 200, description = "Feedback or fallback", body = FeedbackView),
        (status = 400, description = "The learner has not spoken yet", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Conversation was reset meanwhile", body = ErrorResponse),
        (status = 410, description = "Session was discarded meanwhile", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID")),
    tag = "Practice"
)]
pub async fn request_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FeedbackView>, ApiError> {
    let engine = find_session(&state, id).await?;
    let ticket = engine.lock().await.prepare_feedback()?;

    let outcome = state.services.feedback.evaluate(ticket.request()).await;

    let mut engine = engine.lock().await;
    match engine.record_feedback(ticket, outcome) {
        Some(report) => Ok(Json(report.into())),
        None if engine.is_discarded() => Err(EngineError::Discarded.into()),
        None => Err(ApiError::Conflict(
            "The conversation was reset while feedback was being generated".to_string(),
        )),
    }
}

/// Speak a turn of the conversation.
#[utoipa::path(
    post,
    path = "/sessions/{id}/turns/{turn_id}/speech",
    responses(
        (status = 200, description = "Audio, or the playback error", body = PlaybackView),
        (status = 404, description = "Session or turn not found", body = ErrorResponse),
        (status = 409, description = "Another turn is already playing", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("turn_id" = u64, Path, description = "Turn ID")
    ),
    tag = "Practice"
)]
pub async fn speak_turn(
    State(state): State<Arc<AppState>>,
    Path((id, turn_id)): Path<(Uuid, u64)>,
) -> Result<Json<PlaybackView>, ApiError> {
    let engine = find_session(&state, id).await?;
    let (surface, request) = {
        let engine = engine.lock().await;
        (
            engine.surface().clone(),
            engine.playback_request(TurnId::new(turn_id))?,
        )
    };

    let sink = ClipSink::new();
    match state.services.playback.play(&surface, request, &sink).await {
        PlaybackOutcome::Played => Ok(Json(PlaybackView {
            turn_id,
            audio_content: sink.take().map(|audio| encode_audio(&audio)),
            error: None,
        })),
        PlaybackOutcome::Rejected { active_turn } => Err(ApiError::Conflict(match active_turn {
            Some(active) => format!("Turn {active} is already playing"),
            None => "Audio is already playing".to_string(),
        })),
        PlaybackOutcome::Failed(failure) => Ok(Json(PlaybackView {
            turn_id,
            audio_content: None,
            error: Some(failure.to_string()),
        })),
    }
}
