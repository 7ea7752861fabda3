use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rehearse_core::engine::ResetOutcome;
use rehearse_core::protocol::{FeedbackRequest, SpeechRequest};
use rehearse_core::time::fixed_clock;
use rehearse_core::{
    AudioPlaybackController, CheckpointScenarioEngine, DialogueContent, DialogueResponder,
    EngineError, EngineServices, EngineState, FeedbackClient, FeedbackService, LatencyProfile,
    ScenarioCatalog, ScenarioId, ServiceError, ServiceErrorKind, SpeechSynthesizer, SurfaceId,
    ValidationError,
};

/// Behaves like a boundary deployed without its API key.
struct UnconfiguredFeedback {
    calls: AtomicUsize,
}

#[async_trait]
impl FeedbackService for UnconfiguredFeedback {
    async fn generate_feedback(&self, _: &FeedbackRequest) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ServiceError::Configuration(
            "OPENAI_API_KEY is not set".to_string(),
        ))
    }
}

struct SilentSpeech;

#[async_trait]
impl SpeechSynthesizer for SilentSpeech {
    async fn synthesize(&self, _: &SpeechRequest) -> Result<Vec<u8>, ServiceError> {
        Ok(vec![0])
    }
}

fn engine_with(feedback: Arc<dyn FeedbackService>) -> CheckpointScenarioEngine {
    let content = Arc::new(DialogueContent::builtin().unwrap());
    let services = EngineServices {
        catalog: Arc::new(ScenarioCatalog::builtin().unwrap()),
        responder: Arc::new(
            DialogueResponder::new(content)
                .with_seed(42)
                .with_latency(LatencyProfile::none()),
        ),
        feedback: FeedbackClient::new(feedback),
        playback: Arc::new(AudioPlaybackController::new(Arc::new(SilentSpeech))),
    };
    CheckpointScenarioEngine::new(services, SurfaceId::new("handover-test")).with_clock(fixed_clock())
}

fn handover_engine() -> CheckpointScenarioEngine {
    engine_with(Arc::new(UnconfiguredFeedback {
        calls: AtomicUsize::new(0),
    }))
}

const HANDOVER_LINES: [&str; 5] = [
    "Good morning, my name is Alex and I'll be your nurse today.",
    "How would you rate your pain right now?",
    "Your next dose of medication is due at noon.",
    "I'm going to check your blood pressure and pulse.",
    "Let's talk about what happens when you go home.",
];

#[tokio::test]
async fn handover_runs_to_completion() {
    let mut engine = handover_engine();
    let session = engine.start(&ScenarioId::from("handover")).unwrap();
    let seed_len = session.seed_len();
    assert_eq!(engine.scenario().map(|s| s.checkpoint_count()), Some(5));

    for (n, line) in HANDOVER_LINES.iter().enumerate() {
        assert_eq!(engine.state(), EngineState::InProgress(n));
        let outcome = engine.submit_turn(line).await.unwrap();
        assert_eq!(outcome.checkpoint_reached, Some(n));
        assert_eq!(
            engine.session().unwrap().conversation_log().len(),
            seed_len + 2 * (n + 1)
        );
    }
    assert_eq!(engine.state(), EngineState::AwaitingRating);

    let result = engine.submit_rating(4).unwrap();

    assert_eq!(engine.state(), EngineState::Completed);
    assert_eq!(result.confidence_score.value(), 4);
    assert_eq!(result.learner_turns, 5);
    assert_eq!(
        engine
            .session()
            .and_then(|s| s.confidence_score())
            .map(|s| s.value()),
        Some(4)
    );
}

#[tokio::test]
async fn reset_twice_is_idempotent() {
    let mut engine = handover_engine();
    engine.start(&ScenarioId::from("handover")).unwrap();
    engine.submit_turn(HANDOVER_LINES[0]).await.unwrap();
    engine.submit_turn(HANDOVER_LINES[1]).await.unwrap();

    assert_eq!(engine.reset_conversation().unwrap(), ResetOutcome::Reset);
    let before: Vec<_> = engine.session().unwrap().conversation_log().to_vec();
    let state_before = engine.state();

    assert_eq!(engine.reset_conversation().unwrap(), ResetOutcome::Disabled);

    assert_eq!(engine.session().unwrap().conversation_log(), before.as_slice());
    assert_eq!(engine.state(), state_before);
    assert_eq!(engine.session().unwrap().checkpoint_index(), 0);
}

#[tokio::test]
async fn ratings_outside_one_to_five_are_rejected() {
    let mut engine = handover_engine();
    engine.start(&ScenarioId::from("handover")).unwrap();

    assert!(matches!(
        engine.submit_rating(3),
        Err(EngineError::InvalidState { .. })
    ));
    for line in HANDOVER_LINES {
        engine.submit_turn(line).await.unwrap();
    }
    for score in [0, 6] {
        assert_eq!(
            engine.submit_rating(score).unwrap_err(),
            EngineError::Validation(ValidationError::RatingOutOfRange(score))
        );
    }
    assert!(engine.submit_rating(3).is_ok());
}

#[tokio::test]
async fn missing_credential_is_a_configuration_failure() {
    let feedback = Arc::new(UnconfiguredFeedback {
        calls: AtomicUsize::new(0),
    });
    let mut engine = engine_with(feedback.clone());
    engine.start(&ScenarioId::from("handover")).unwrap();
    engine.submit_turn(HANDOVER_LINES[0]).await.unwrap();

    let report = engine.evaluate_latest_turn().await.unwrap();

    assert_eq!(report.failure, Some(ServiceErrorKind::Configuration));
    assert_eq!(report.text, rehearse_core::FEEDBACK_FALLBACK);
    assert_eq!(feedback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state(), EngineState::InProgress(1));
}
