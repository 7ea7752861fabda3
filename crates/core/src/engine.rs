//! The scenario state machine.
//!
//! A `CheckpointScenarioEngine` owns exactly one [`SessionState`] and drives
//! it through the scenario's checkpoints:
//!
//! ```text
//! NotStarted --start--> InProgress(0) --turn--> ... InProgress(n-1) --turn--> AwaitingRating
//!                            ^                                                     |
//!                            +---------------------- reset ------------------------+
//! AwaitingRating --rating--> Completed
//! ```
//!
//! Operations take `&mut self`, so a session can never interleave two of
//! them. Remote failures (feedback, speech) are reported as status values
//! and never abort the state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::SessionEvent;
use crate::classifier::TopicCategory;
use crate::error::{EngineError, ServiceError, ServiceErrorKind, ValidationError};
use crate::feedback::{FEEDBACK_FALLBACK, FeedbackClient};
use crate::playback::{
    AudioPlaybackController, AudioSink, PlaybackOutcome, PlaybackPhase, PlaybackRequest, SurfaceId,
};
use crate::protocol::{ConversationLine, FeedbackRequest};
use crate::responder::DialogueResponder;
use crate::scenario::{Checkpoint, Scenario, ScenarioCatalog, ScenarioId};
use crate::session::{
    ConfidenceScore, ConnectionStatus, DialogueTurn, SessionState, Speaker, TurnId,
};
use crate::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    InProgress(usize),
    AwaitingRating,
    Completed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::NotStarted => write!(f, "not started"),
            EngineState::InProgress(index) => write!(f, "in progress (checkpoint {index})"),
            EngineState::AwaitingRating => write!(f, "awaiting rating"),
            EngineState::Completed => write!(f, "completed"),
        }
    }
}

/// What a [`GoalPolicy`] sees when deciding whether a turn satisfied the
/// current checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct GoalContext<'a> {
    pub scenario: &'a Scenario,
    pub checkpoint: &'a Checkpoint,
    pub learner_text: &'a str,
    pub category: TopicCategory,
    /// Learner turns at this checkpoint, including the current one.
    pub turns_at_checkpoint: u32,
}

/// Decides when a checkpoint's goal counts as met.
pub trait GoalPolicy: Send + Sync {
    fn is_satisfied(&self, context: &GoalContext<'_>) -> bool;
}

impl<F> GoalPolicy for F
where
    F: Fn(&GoalContext<'_>) -> bool + Send + Sync,
{
    fn is_satisfied(&self, context: &GoalContext<'_>) -> bool {
        self(context)
    }
}

/// Advances after a fixed number of accepted turns at each checkpoint.
/// A count of zero behaves like one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnsPerCheckpoint(pub u32);

impl Default for TurnsPerCheckpoint {
    fn default() -> Self {
        Self(1)
    }
}

impl GoalPolicy for TurnsPerCheckpoint {
    fn is_satisfied(&self, context: &GoalContext<'_>) -> bool {
        context.turns_at_checkpoint >= self.0.max(1)
    }
}

/// Process-wide collaborators shared by every engine.
#[derive(Clone)]
pub struct EngineServices {
    pub catalog: Arc<ScenarioCatalog>,
    pub responder: Arc<DialogueResponder>,
    pub feedback: FeedbackClient,
    pub playback: Arc<AudioPlaybackController>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub learner_turn: DialogueTurn,
    pub reply: DialogueTurn,
    pub category: TopicCategory,
    /// True when the responder fell back to its apology.
    pub degraded: bool,
    /// Index of the checkpoint this turn completed, if any.
    pub checkpoint_reached: Option<usize>,
    pub state: EngineState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Reset,
    /// The log only holds the seed turns; nothing to reset.
    Disabled,
}

/// A feedback request bound to the conversation it was taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackTicket {
    request: FeedbackRequest,
    epoch: u64,
    turn_id: TurnId,
}

impl FeedbackTicket {
    #[must_use]
    pub fn request(&self) -> &FeedbackRequest {
        &self.request
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The learner turn under evaluation.
    #[must_use]
    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackReport {
    /// The learner turn this feedback describes.
    pub turn_id: TurnId,
    /// The feedback, or [`FEEDBACK_FALLBACK`] when the call failed.
    pub text: String,
    pub failure: Option<ServiceErrorKind>,
}

impl FeedbackReport {
    fn from_outcome(turn_id: TurnId, outcome: Result<String, ServiceError>) -> Self {
        match outcome {
            Ok(text) => Self {
                turn_id,
                text,
                failure: None,
            },
            Err(err) => Self {
                turn_id,
                text: FEEDBACK_FALLBACK.to_string(),
                failure: Some(err.kind()),
            },
        }
    }
}

/// What a completed session hands to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionResult {
    pub scenario_id: ScenarioId,
    pub confidence_score: ConfidenceScore,
    pub learner_turns: usize,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProbe {
    pub status: ConnectionStatus,
    pub failure: Option<ServiceError>,
}

pub struct CheckpointScenarioEngine {
    services: EngineServices,
    policy: Arc<dyn GoalPolicy>,
    clock: Clock,
    surface: SurfaceId,
    events: Option<mpsc::Sender<SessionEvent>>,
    scenario: Option<Arc<Scenario>>,
    session: Option<SessionState>,
    state: EngineState,
    /// Connection status before a session exists.
    connection_status: ConnectionStatus,
    discarded: bool,
    last_feedback: Option<FeedbackReport>,
}

impl CheckpointScenarioEngine {
    /// Creates an engine in `NotStarted` that plays audio on `surface`.
    #[must_use]
    pub fn new(services: EngineServices, surface: SurfaceId) -> Self {
        Self {
            services,
            policy: Arc::new(TurnsPerCheckpoint::default()),
            clock: Clock::System,
            surface,
            events: None,
            scenario: None,
            session: None,
            state: EngineState::NotStarted,
            connection_status: ConnectionStatus::Unknown,
            discarded: false,
            last_feedback: None,
        }
    }

    #[must_use]
    pub fn with_goal_policy(mut self, policy: Arc<dyn GoalPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Session events are sent without waiting; a full channel drops them.
    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    #[must_use]
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn scenario(&self) -> Option<&Arc<Scenario>> {
        self.scenario.as_ref()
    }

    #[must_use]
    pub fn surface(&self) -> &SurfaceId {
        &self.surface
    }

    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    #[must_use]
    pub fn last_feedback(&self) -> Option<&FeedbackReport> {
        self.last_feedback.as_ref()
    }

    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.session
            .as_ref()
            .map_or(self.connection_status, SessionState::connection_status)
    }

    /// The checkpoint the learner is working on, if any.
    #[must_use]
    pub fn current_goal(&self) -> Option<&Checkpoint> {
        match self.state {
            EngineState::InProgress(index) => self.scenario.as_ref()?.checkpoint(index),
            _ => None,
        }
    }

    /// Loads `scenario_id` and seeds the conversation with its opening.
    ///
    /// # Errors
    ///
    /// `UnknownScenario` if the catalog does not know the id, `InvalidState`
    /// if a scenario was already started, `Discarded` after [`Self::discard`].
    pub fn start(&mut self, scenario_id: &ScenarioId) -> Result<&SessionState, EngineError> {
        self.ensure_live()?;
        self.require("start", matches!(self.state, EngineState::NotStarted))?;
        let scenario = self
            .services
            .catalog
            .get(scenario_id)
            .ok_or_else(|| EngineError::UnknownScenario(scenario_id.clone()))?;

        let mut session = SessionState::new(scenario_id.clone(), &scenario.opening, self.clock.now());
        session.set_connection_status(self.connection_status);
        info!(
            scenario = %scenario_id,
            checkpoints = scenario.checkpoint_count(),
            surface = %self.surface,
            "scenario started"
        );

        self.scenario = Some(scenario);
        self.state = EngineState::InProgress(0);
        Ok(self.session.insert(session))
    }

    /// Records the learner's line, obtains the counterpart's reply and
    /// advances the checkpoint when the goal policy is satisfied.
    ///
    /// # Errors
    ///
    /// `Validation(EmptyText)` for blank text, `InvalidState` outside
    /// `InProgress`. The log is unchanged on error.
    pub async fn submit_turn(&mut self, text: &str) -> Result<TurnOutcome, EngineError> {
        self.ensure_live()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        let EngineState::InProgress(index) = self.state else {
            return Err(self.invalid("submit_turn"));
        };
        let scenario = self.loaded_scenario("submit_turn")?;

        let reply = self
            .services
            .responder
            .respond(text, scenario.context.as_deref())
            .await?;

        let now = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            return Err(EngineError::InvalidState {
                operation: "submit_turn",
                state: self.state,
            });
        };
        let learner_turn = session.append(Speaker::User, text, now);
        let reply_turn = session.append(Speaker::Assistant, &reply.text, now);
        session.note_learner_turn();

        let satisfied = scenario.checkpoint(index).is_some_and(|checkpoint| {
            self.policy.is_satisfied(&GoalContext {
                scenario: &scenario,
                checkpoint,
                learner_text: text,
                category: reply.category,
                turns_at_checkpoint: session.turns_at_checkpoint(),
            })
        });

        let mut events = Vec::new();
        let mut checkpoint_reached = None;
        if satisfied {
            session.advance_checkpoint();
            checkpoint_reached = Some(index);
            events.push(SessionEvent::CheckpointReached { index });
            if session.checkpoint_index() >= scenario.checkpoint_count() {
                self.state = EngineState::AwaitingRating;
                events.push(SessionEvent::AwaitingRating);
            } else {
                self.state = EngineState::InProgress(session.checkpoint_index());
            }
        }
        debug!(
            scenario = %scenario.id,
            checkpoint = index,
            category = %reply.category,
            satisfied,
            "turn accepted"
        );
        for event in events {
            self.emit(event);
        }

        Ok(TurnOutcome {
            learner_turn,
            reply: reply_turn,
            category: reply.category,
            degraded: reply.degraded,
            checkpoint_reached,
            state: self.state,
        })
    }

    /// Guidance for the current checkpoint, or the generic hint.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside `InProgress`.
    pub fn request_guidance(&self) -> Result<&str, EngineError> {
        self.ensure_live()?;
        let EngineState::InProgress(index) = self.state else {
            return Err(self.invalid("request_guidance"));
        };
        let scenario = self.scenario.as_ref().ok_or_else(|| self.invalid("request_guidance"))?;
        Ok(self.services.catalog.guidance_or_default(&scenario.id, index))
    }

    /// Whether [`Self::reset_conversation`] would do anything.
    #[must_use]
    pub fn can_reset(&self) -> bool {
        !self.discarded
            && matches!(
                self.state,
                EngineState::InProgress(_) | EngineState::AwaitingRating
            )
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.conversation_log().len() > s.seed_len())
    }

    /// Clears the log back to the opening line(s) and returns to the first
    /// checkpoint. Feedback computed for the old conversation is dropped.
    ///
    /// # Errors
    ///
    /// `InvalidState` before start and after completion.
    pub fn reset_conversation(&mut self) -> Result<ResetOutcome, EngineError> {
        self.ensure_live()?;
        self.require(
            "reset_conversation",
            matches!(
                self.state,
                EngineState::InProgress(_) | EngineState::AwaitingRating
            ),
        )?;
        if !self.can_reset() {
            debug!(surface = %self.surface, "reset skipped, conversation is fresh");
            return Ok(ResetOutcome::Disabled);
        }
        let scenario = self.loaded_scenario("reset_conversation")?;
        let now = self.clock.now();
        if let Some(session) = self.session.as_mut() {
            session.reseed(&scenario.opening, now);
        }
        self.state = EngineState::InProgress(0);
        self.last_feedback = None;
        info!(scenario = %scenario.id, "conversation reset");
        self.emit(SessionEvent::ConversationReset);
        Ok(ResetOutcome::Reset)
    }

    /// Stores the learner's confidence and completes the session.
    ///
    /// # Errors
    ///
    /// `Validation(RatingOutOfRange)` for scores outside 1..=5, checked
    /// before the state; `InvalidState` outside `AwaitingRating`.
    pub fn submit_rating(&mut self, score: u8) -> Result<SessionResult, EngineError> {
        self.ensure_live()?;
        let score = ConfidenceScore::try_from(score)?;
        self.require(
            "submit_rating",
            matches!(self.state, EngineState::AwaitingRating),
        )?;
        let completed_at = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            return Err(EngineError::InvalidState {
                operation: "submit_rating",
                state: self.state,
            });
        };
        session.set_confidence_score(score);
        let result = SessionResult {
            scenario_id: session.scenario_id().clone(),
            confidence_score: score,
            learner_turns: session.learner_turns(),
            completed_at,
        };
        self.state = EngineState::Completed;
        info!(
            scenario = %result.scenario_id,
            confidence = score.value(),
            learner_turns = result.learner_turns,
            "session completed"
        );
        self.emit(SessionEvent::Completed { confidence: score });
        Ok(result)
    }

    /// Probes the feedback service. Allowed in every state; never touches
    /// the conversation or the checkpoint.
    ///
    /// # Errors
    ///
    /// Only `Discarded`. Probe failures are reported in the result.
    pub async fn test_connection(&mut self) -> Result<ConnectionProbe, EngineError> {
        self.ensure_live()?;
        self.set_connection_status(ConnectionStatus::Testing);

        let failure = self.services.feedback.probe().await.err();
        let status = if failure.is_some() {
            ConnectionStatus::Failed
        } else {
            ConnectionStatus::Connected
        };
        if let Some(err) = &failure {
            warn!(kind = ?err.kind(), error = %err, "connection test failed");
        }
        self.set_connection_status(status);
        Ok(ConnectionProbe { status, failure })
    }

    /// Snapshots the conversation for evaluation of the latest learner turn.
    ///
    /// # Errors
    ///
    /// `InvalidState` before start, `Validation(NoLearnerTurn)` when the
    /// learner has not spoken yet.
    pub fn prepare_feedback(&self) -> Result<FeedbackTicket, EngineError> {
        self.ensure_live()?;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| self.invalid("prepare_feedback"))?;
        let latest = session
            .last_learner_turn()
            .ok_or(ValidationError::NoLearnerTurn)?;
        let request = FeedbackRequest {
            conversation: session
                .conversation_log()
                .iter()
                .map(ConversationLine::from)
                .collect(),
            user_response: latest.text().to_string(),
            scenario_context: self.scenario.as_ref().and_then(|s| s.context.clone()),
        };
        Ok(FeedbackTicket {
            request,
            epoch: session.epoch(),
            turn_id: latest.id(),
        })
    }

    /// Applies a feedback result. Returns `None` and drops the result if the
    /// session was discarded or reset after the ticket was taken.
    ///
    /// `last_feedback` only ever describes the latest learner turn: a result
    /// for an older turn is returned to the caller but not stored.
    pub fn record_feedback(
        &mut self,
        ticket: FeedbackTicket,
        outcome: Result<String, ServiceError>,
    ) -> Option<FeedbackReport> {
        if self.discarded {
            debug!("dropping feedback for a discarded session");
            return None;
        }
        let epoch = self.session.as_ref().map(SessionState::epoch);
        if epoch != Some(ticket.epoch) {
            debug!(ticket = ticket.epoch, ?epoch, "dropping feedback for a reset conversation");
            return None;
        }
        let report = FeedbackReport::from_outcome(ticket.turn_id, outcome);
        let latest = self
            .session
            .as_ref()
            .and_then(SessionState::last_learner_turn)
            .map(DialogueTurn::id);
        if latest == Some(ticket.turn_id) {
            self.last_feedback = Some(report.clone());
        } else {
            debug!(turn = %ticket.turn_id, "feedback describes an older turn, not stored");
        }
        Some(report)
    }

    /// Evaluates the latest learner turn in one step.
    ///
    /// # Errors
    ///
    /// Same as [`Self::prepare_feedback`]. Remote failures are carried in
    /// the report.
    pub async fn evaluate_latest_turn(&mut self) -> Result<FeedbackReport, EngineError> {
        let ticket = self.prepare_feedback()?;
        let outcome = self.services.feedback.evaluate(ticket.request()).await;
        self.record_feedback(ticket, outcome)
            .ok_or(EngineError::Discarded)
    }

    /// Builds the playback request for a turn of the current conversation.
    ///
    /// # Errors
    ///
    /// `UnknownTurn` if the id is not in the log.
    pub fn playback_request(&self, turn_id: TurnId) -> Result<PlaybackRequest, EngineError> {
        self.ensure_live()?;
        let turn = self
            .session
            .as_ref()
            .and_then(|s| s.turn(turn_id))
            .ok_or(EngineError::UnknownTurn(turn_id))?;
        Ok(PlaybackRequest {
            text: turn.text().to_string(),
            speaker: turn.speaker(),
            turn_id: Some(turn_id),
        })
    }

    /// Speaks a turn on this session's surface.
    ///
    /// # Errors
    ///
    /// Same as [`Self::playback_request`]. Playback failures are carried in
    /// the outcome.
    pub async fn speak_turn(
        &self,
        turn_id: TurnId,
        sink: &dyn AudioSink,
    ) -> Result<PlaybackOutcome, EngineError> {
        let request = self.playback_request(turn_id)?;
        Ok(self.services.playback.play(&self.surface, request, sink).await)
    }

    #[must_use]
    pub fn turn_playback_phase(&self, turn_id: TurnId) -> PlaybackPhase {
        self.services.playback.turn_phase(&self.surface, turn_id)
    }

    /// Disposes of the session. Every later operation fails with
    /// `Discarded` and late results are dropped.
    pub fn discard(&mut self) {
        if !self.discarded {
            info!(surface = %self.surface, state = %self.state, "session discarded");
        }
        self.discarded = true;
        self.last_feedback = None;
        // Closing the channel lets the event consumer finish.
        self.events = None;
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.discarded {
            Err(EngineError::Discarded)
        } else {
            Ok(())
        }
    }

    fn require(&self, operation: &'static str, allowed: bool) -> Result<(), EngineError> {
        if allowed {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> EngineError {
        EngineError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn loaded_scenario(&self, operation: &'static str) -> Result<Arc<Scenario>, EngineError> {
        self.scenario.clone().ok_or_else(|| self.invalid(operation))
    }

    fn set_connection_status(&mut self, status: ConnectionStatus) {
        match self.session.as_mut() {
            Some(session) => session.set_connection_status(status),
            None => self.connection_status = status,
        }
        self.emit(SessionEvent::ConnectionChanged(status));
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            if let Err(err) = events.try_send(event) {
                warn!(error = %err, "failed to deliver session event");
            }
        }
    }
}
