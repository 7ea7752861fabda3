//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the boundary endpoints, the practice-session REST API, and
//! OpenAPI documentation.

use crate::{
    boundary::{feedback, speech},
    handlers,
    models::{
        ConnectionView, ConversationLinePayload, CreateSessionPayload, ErrorResponse,
        FeedbackAnswer, FeedbackPayload, FeedbackView, GuidanceView, PlaybackView, RatingPayload,
        ResetView, ScenarioSummary, SessionResultView, SessionStatus,
        SessionView, SpeechPayload, SpeechView, TurnPayload, TurnResultView, TurnView,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use rehearse_core::{ServiceErrorKind, protocol::ErrorEnvelope};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        feedback::generate_feedback,
        speech::text_to_speech,
        handlers::list_scenarios,
        handlers::create_session,
        handlers::get_session,
        handlers::delete_session,
        handlers::submit_turn,
        handlers::get_guidance,
        handlers::reset_conversation,
        handlers::submit_rating,
        handlers::test_connection,
        handlers::request_feedback,
        handlers::speak_turn,
    ),
    components(
        schemas(
            ErrorResponse, ErrorEnvelope, ServiceErrorKind, FeedbackPayload, ConversationLinePayload,
            FeedbackAnswer, SpeechPayload, SpeechView, ScenarioSummary, CreateSessionPayload,
            SessionStatus, SessionView, TurnView, TurnPayload, TurnResultView, GuidanceView,
            ResetView, RatingPayload, SessionResultView, FeedbackView, ConnectionView, PlaybackView
        )
    ),
    tags(
        (name = "Boundaries", description = "Feedback generation and speech synthesis"),
        (name = "Practice", description = "Checkpoint-based practice sessions")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/feedback", post(feedback::generate_feedback))
        .route("/text-to-speech", post(speech::text_to_speech))
        .route("/scenarios", get(handlers::list_scenarios))
        .route("/sessions", post(handlers::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{id}/turns", post(handlers::submit_turn))
        .route("/sessions/{id}/guidance", get(handlers::get_guidance))
        .route("/sessions/{id}/reset", post(handlers::reset_conversation))
        .route("/sessions/{id}/rating", post(handlers::submit_rating))
        .route(
            "/sessions/{id}/connection-test",
            post(handlers::test_connection),
        )
        .route("/sessions/{id}/feedback", post(handlers::request_feedback))
        .route(
            "/sessions/{id}/turns/{turn_id}/speech",
            post(handlers::speak_turn),
        )
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        StaticFeedback, StaticSpeech, services_with, test_services, unconfigured_state,
    };
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use rehearse_core::ServiceError;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(Arc::new(unconfigured_state(test_services())))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn start_handover(app: &Router) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/sessions",
            Some(json!({"scenarioId": "handover"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_cors_preflight_is_permissive() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/feedback")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_success());
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn test_feedback_without_key_reports_configuration() {
        let (status, body) = send(
            &app(),
            Method::POST,
            "/feedback",
            Some(json!({"conversation": [], "userResponse": "Hello, I'm your nurse."})),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "configuration");
        assert!(body["error"].as_str().unwrap().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_feedback_rejects_empty_response() {
        let (status, body) = send(
            &app(),
            Method::POST,
            "/feedback",
            Some(json!({"userResponse": "   "})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], Value::Null);
    }

    #[tokio::test]
    async fn test_text_to_speech_without_key_reports_configuration() {
        let (status, body) = send(
            &app(),
            Method::POST,
            "/text-to-speech",
            Some(json!({"text": "Good morning", "voiceId": "nurse"})),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "configuration");
    }

    #[tokio::test]
    async fn test_list_scenarios() {
        let (status, body) = send(&app(), Method::GET, "/scenarios", None).await;

        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"handover"));
    }

    #[tokio::test]
    async fn test_unknown_scenario_is_not_found() {
        let (status, _) = send(
            &app(),
            Method::POST,
            "/sessions",
            Some(json!({"scenarioId": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let uri = format!("/sessions/{}", uuid::Uuid::new_v4());
        let (status, body) = send(&app(), Method::GET, &uri, None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_session_flow_to_completion() {
        let app = app();
        let id = start_handover(&app).await;

        let (status, body) = send(&app, Method::GET, &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], json!({"status": "in_progress", "checkpoint": 0}));
        assert_eq!(body["can_reset"], false);
        let seed_len = body["conversation"].as_array().unwrap().len();

        let (status, body) = send(&app, Method::GET, &format!("/sessions/{id}/guidance"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checkpoint"], 0);

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/turns"),
            Some(json!({"text": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/rating"),
            Some(json!({"score": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        for n in 0..5 {
            let (status, body) = send(
                &app,
                Method::POST,
                &format!("/sessions/{id}/turns"),
                Some(json!({"text": "How are you feeling about your pain today?"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["checkpoint_reached"], n);
            assert_eq!(body["reply"]["speaker"], "assistant");
        }

        let (_, body) = send(&app, Method::GET, &format!("/sessions/{id}"), None).await;
        assert_eq!(body["state"]["status"], "awaiting_rating");
        assert_eq!(body["conversation"].as_array().unwrap().len(), seed_len + 10);

        let (status, _) = send(&app, Method::GET, &format!("/sessions/{id}/guidance"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/rating"),
            Some(json!({"score": 6})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/rating"),
            Some(json!({"score": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["confidence_score"], 4);
        assert_eq!(body["learner_turns"], 5);

        let (status, _) = send(&app, Method::POST, &format!("/sessions/{id}/reset"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_reset_then_reset_again_is_disabled() {
        let app = app();
        let id = start_handover(&app).await;
        send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/turns"),
            Some(json!({"text": "Good morning, I'm your nurse today."})),
        )
        .await;

        let (status, body) = send(&app, Method::POST, &format!("/sessions/{id}/reset"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reset"], true);
        assert_eq!(body["session"]["state"]["checkpoint"], 0);

        let (status, body) = send(&app, Method::POST, &format!("/sessions/{id}/reset"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reset"], false);
    }

    #[tokio::test]
    async fn test_session_feedback_and_connection() {
        let app = app();
        let id = start_handover(&app).await;

        let (status, _) = send(&app, Method::POST, &format!("/sessions/{id}/feedback"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/turns"),
            Some(json!({"text": "Can you describe where it hurts?"})),
        )
        .await;
        let (status, body) = send(&app, Method::POST, &format!("/sessions/{id}/feedback"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["feedback"], "Good use of an open question.");
        assert_eq!(body["failure"], Value::Null);
        assert!(body["turn_id"].is_u64());

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/connection-test"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "connected");
    }

    #[tokio::test]
    async fn test_failed_session_feedback_is_a_fallback_not_an_error() {
        let services = services_with(
            Arc::new(StaticFeedback(Err(ServiceError::Remote("503".into())))),
            Arc::new(StaticSpeech(Ok(b"ID3".to_vec()))),
        );
        let app = create_router(Arc::new(unconfigured_state(services)));
        let id = start_handover(&app).await;
        send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/turns"),
            Some(json!({"text": "Are you allergic to anything?"})),
        )
        .await;

        let (status, body) = send(&app, Method::POST, &format!("/sessions/{id}/feedback"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["feedback"], rehearse_core::FEEDBACK_FALLBACK);
        assert_eq!(body["failure"], "remote_service");

        let (_, body) = send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/connection-test"),
            None,
        )
        .await;
        assert_eq!(body["status"], "failed");
        assert_eq!(
            body["message"],
            rehearse_core::ServiceErrorKind::RemoteService.status_message()
        );
    }

    #[tokio::test]
    async fn test_speak_turn_returns_audio() {
        let app = app();
        let id = start_handover(&app).await;
        let (_, session) = send(&app, Method::GET, &format!("/sessions/{id}"), None).await;
        let turn_id = session["conversation"][0]["id"].as_u64().unwrap();

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/turns/{turn_id}/speech"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["audioContent"], "SUQz");

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/sessions/{id}/turns/9999/speech"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_deleted_session_is_gone_from_the_registry() {
        let app = app();
        let id = start_handover(&app).await;

        let (status, _) = send(&app, Method::DELETE, &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, Method::GET, &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::DELETE, &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_openapi_documents_the_core_error_envelope() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schemas = &doc["components"]["schemas"];
        assert!(schemas.get("ErrorEnvelope").is_some());
        assert!(schemas.get("ServiceErrorKind").is_some());
        assert_eq!(
            doc["paths"]["/feedback"]["post"]["responses"]["500"]["content"]["application/json"]
                ["schema"]["$ref"],
            "#/components/schemas/ErrorEnvelope"
        );
    }
}
