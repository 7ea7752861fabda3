pub mod classifier;
pub mod content;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod playback;
pub mod protocol;
pub mod responder;
pub mod scenario;
pub mod session;
pub mod speech;
pub mod time;

pub use classifier::{KeywordTable, ResponseClassifier, TopicCategory};
pub use content::DialogueContent;
pub use engine::{CheckpointScenarioEngine, EngineServices, EngineState, GoalPolicy, TurnsPerCheckpoint};
pub use error::{EngineError, ServiceError, ServiceErrorKind, ValidationError};
pub use feedback::{FEEDBACK_FALLBACK, FeedbackClient, FeedbackService};
pub use playback::{AudioPlaybackController, AudioSink, PlaybackOutcome, PlaybackPhase, SurfaceId};
pub use responder::{DialogueResponder, LatencyProfile};
pub use scenario::{Scenario, ScenarioCatalog, ScenarioId};
pub use session::{ConfidenceScore, ConnectionStatus, DialogueTurn, SessionState, Speaker, TurnId};
pub use speech::{SpeechSynthesizer, VoiceMap};

/// Notifications a session emits to whoever drives it.
///
/// This is how the engine reports progress that a caller did not directly ask
/// for, e.g. to update a progress indicator or hand a finished session to the
/// persistence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The checkpoint at `index` was satisfied.
    CheckpointReached { index: usize },
    /// Every checkpoint is done; the learner should rate their confidence.
    AwaitingRating,
    Completed { confidence: ConfidenceScore },
    ConversationReset,
    ConnectionChanged(ConnectionStatus),
}
