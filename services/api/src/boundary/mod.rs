//! The two remote boundaries: feedback generation and speech synthesis.
//!
//! Each boundary is a `rehearse_core` trait implementation that talks to the
//! vendor API, plus an HTTP handler exposing it with the `{error, kind}`
//! failure envelope so that `HttpFeedbackService` and
//! `HttpSpeechSynthesizer` can reach it from another process.

pub mod feedback;
pub mod speech;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rehearse_core::ServiceError;
use rehearse_core::protocol::ErrorEnvelope;
use tracing::{error, warn};

pub use feedback::OpenAiFeedbackService;
pub use speech::ElevenLabsSynthesizer;

#[derive(Debug)]
pub enum BoundaryError {
    BadRequest(String),
    Service(ServiceError),
}

impl From<ServiceError> for BoundaryError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl IntoResponse for BoundaryError {
    fn into_response(self) -> Response {
        match self {
            BoundaryError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorEnvelope {
                    error: message,
                    kind: None,
                }),
            )
                .into_response(),
            BoundaryError::Service(err) => {
                let status = match &err {
                    ServiceError::Configuration(_) => {
                        error!(error = %err, "boundary is not configured");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    ServiceError::Timeout(_) => {
                        warn!(error = %err, "boundary call timed out");
                        StatusCode::GATEWAY_TIMEOUT
                    }
                    _ => {
                        warn!(error = %err, "boundary call failed");
                        StatusCode::BAD_GATEWAY
                    }
                };
                (status, Json(ErrorEnvelope::from_error(&err))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::create_router;
    use crate::test_support::{StaticFeedback, StaticSpeech, test_services, unconfigured_state};
    use axum::{Router, routing::post};
    use rehearse_core::feedback::HttpFeedbackService;
    use rehearse_core::protocol::{FeedbackRequest, SpeechRequest};
    use rehearse_core::speech::HttpSpeechSynthesizer;
    use rehearse_core::{
        FeedbackClient, FeedbackService, ServiceErrorKind, SpeechSynthesizer,
    };
    use std::sync::Arc;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Serves `app` on an ephemeral local port and returns its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn speech_request() -> SpeechRequest {
        SpeechRequest {
            text: "Good morning, Mr. Jones.".into(),
            voice_id: "nurse".into(),
            model_id: rehearse_core::protocol::DEFAULT_SPEECH_MODEL.into(),
        }
    }

    fn feedback_request(user_response: &str) -> FeedbackRequest {
        FeedbackRequest {
            conversation: Vec::new(),
            user_response: user_response.into(),
            scenario_context: None,
        }
    }

    #[tokio::test]
    async fn test_missing_keys_cross_the_wire_as_configuration_errors() {
        let base = serve(create_router(Arc::new(unconfigured_state(test_services())))).await;

        let feedback = HttpFeedbackService::new(format!("{base}/feedback"), TIMEOUT).unwrap();
        let err = feedback
            .generate_feedback(&feedback_request("How are you feeling?"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(ref msg) if msg.contains("OPENAI_API_KEY")));

        let client = FeedbackClient::new(Arc::new(feedback));
        assert_eq!(
            client.probe().await.unwrap_err().kind(),
            ServiceErrorKind::Configuration
        );

        let speech = HttpSpeechSynthesizer::new(format!("{base}/text-to-speech"), TIMEOUT).unwrap();
        let err = speech.synthesize(&speech_request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(ref msg) if msg.contains("ELEVENLABS_API_KEY")));
    }

    #[tokio::test]
    async fn test_http_clients_read_successful_answers() {
        let mut state = unconfigured_state(test_services());
        state.feedback_boundary = FeedbackClient::new(Arc::new(StaticFeedback(Ok(
            "Good open question.".into(),
        ))));
        state.speech_boundary = Arc::new(StaticSpeech(Ok(b"ID3".to_vec())));
        let base = serve(create_router(Arc::new(state))).await;

        let feedback = HttpFeedbackService::new(format!("{base}/feedback"), TIMEOUT).unwrap();
        assert_eq!(
            feedback
                .generate_feedback(&feedback_request("Where does it hurt?"))
                .await
                .unwrap(),
            "Good open question."
        );

        let speech = HttpSpeechSynthesizer::new(format!("{base}/text-to-speech"), TIMEOUT).unwrap();
        assert_eq!(speech.synthesize(&speech_request()).await.unwrap(), b"ID3".to_vec());
    }

    #[tokio::test]
    async fn test_responses_without_a_typed_envelope_are_remote_failures() {
        let app = create_router(Arc::new(unconfigured_state(test_services()))).route(
            "/plain",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "upstream is down") }),
        );
        let base = serve(app).await;

        let missing = HttpFeedbackService::new(format!("{base}/missing"), TIMEOUT).unwrap();
        let err = missing
            .generate_feedback(&feedback_request("Hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Remote(ref msg) if msg.contains("404")));

        let plain = HttpSpeechSynthesizer::new(format!("{base}/plain"), TIMEOUT).unwrap();
        let err = plain.synthesize(&speech_request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Remote(ref msg) if msg.contains("upstream is down")));

        // A 400 envelope carries no kind.
        let feedback = HttpFeedbackService::new(format!("{base}/feedback"), TIMEOUT).unwrap();
        let err = feedback
            .generate_feedback(&feedback_request("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Remote(ref msg) if msg.contains("userResponse")));
    }

    #[tokio::test]
    async fn test_slow_boundary_is_reported_as_timeout() {
        let app = Router::new().route(
            "/feedback",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "too late"
            }),
        );
        let base = serve(app).await;
        let timeout = Duration::from_millis(100);

        let feedback = HttpFeedbackService::new(format!("{base}/feedback"), timeout).unwrap();
        let err = feedback
            .generate_feedback(&feedback_request("Hello"))
            .await
            .unwrap_err();

        assert_eq!(err, ServiceError::Timeout(timeout));
    }

    #[tokio::test]
    async fn test_elevenlabs_rejected_key_is_a_configuration_error() {
        let app = Router::new()
            .route(
                "/v1/text-to-speech/rejected",
                post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
            )
            .route(
                "/v1/text-to-speech/broken",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "synthesis failed") }),
            )
            .route(
                "/v1/text-to-speech/nurse",
                post(|headers: axum::http::HeaderMap| async move {
                    match headers.get("xi-api-key").and_then(|v| v.to_str().ok()) {
                        Some("test-key") => (StatusCode::OK, "ID3").into_response(),
                        _ => StatusCode::UNAUTHORIZED.into_response(),
                    }
                }),
            );
        let base = serve(app).await;
        let synthesizer = ElevenLabsSynthesizer::new(Some("test-key".into()), TIMEOUT)
            .unwrap()
            .with_base_url(&base);

        let request = |voice: &str| SpeechRequest {
            voice_id: voice.into(),
            ..speech_request()
        };

        assert_eq!(
            synthesizer.synthesize(&request("rejected")).await.unwrap_err().kind(),
            ServiceErrorKind::Configuration
        );
        let err = synthesizer.synthesize(&request("broken")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Remote(ref msg) if msg.contains("synthesis failed")));
        assert_eq!(synthesizer.synthesize(&request("nurse")).await.unwrap(), b"ID3".to_vec());
    }

    #[test]
    fn test_boundary_status_codes() {
        let cases = [
            (
                BoundaryError::BadRequest("text is empty".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::Configuration("OPENAI_API_KEY is not set".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServiceError::Remote("upstream 500".into()).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ServiceError::Timeout(Duration::from_secs(20)).into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
