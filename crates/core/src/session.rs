//! Per-session conversation state.
//!
//! A `SessionState` is created when a learner opens a scenario and is only
//! ever mutated by the `CheckpointScenarioEngine` that owns it. The
//! conversation log is append-only between explicit resets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::scenario::ScenarioId;

/// Who said a line of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The learner rehearsing the dialogue.
    User,
    /// The simulated counterpart.
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// Stable identifier of a turn within one session.
///
/// Identifiers are never reused, not even across a conversation reset, so a
/// stale id can never address a newer line.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnId(u64);

impl TurnId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TurnId({})", self.0)
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TurnId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(TurnId::new)
    }
}

/// One utterance in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogueTurn {
    id: TurnId,
    speaker: Speaker,
    text: String,
    created_at: DateTime<Utc>,
}

impl DialogueTurn {
    #[must_use]
    pub fn id(&self) -> TurnId {
        self.id
    }

    #[must_use]
    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Result of the most recent feedback-service reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Testing,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Unknown => "unknown",
            ConnectionStatus::Testing => "testing",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A learner's self-assessed confidence, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ConfidenceScore(u8);

impl ConfidenceScore {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    #[must_use]
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ConfidenceScore {
    type Error = ValidationError;

    fn try_from(score: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&score) {
            Ok(Self(score))
        } else {
            Err(ValidationError::RatingOutOfRange(score))
        }
    }
}

/// Mutable state of one practice session.
#[derive(Debug, Clone)]
pub struct SessionState {
    scenario_id: ScenarioId,
    checkpoint_index: usize,
    conversation_log: Vec<DialogueTurn>,
    seed_len: usize,
    connection_status: ConnectionStatus,
    confidence_score: Option<ConfidenceScore>,
    next_turn_id: u64,
    turns_at_checkpoint: u32,
    epoch: u64,
}

impl SessionState {
    /// Creates a session seeded with the scenario's opening line(s).
    pub(crate) fn new(scenario_id: ScenarioId, opening: &[String], now: DateTime<Utc>) -> Self {
        let mut state = Self {
            scenario_id,
            checkpoint_index: 0,
            conversation_log: Vec::with_capacity(opening.len() + 8),
            seed_len: opening.len(),
            connection_status: ConnectionStatus::Unknown,
            confidence_score: None,
            next_turn_id: 1,
            turns_at_checkpoint: 0,
            epoch: 0,
        };
        for line in opening {
            state.append(Speaker::Assistant, line, now);
        }
        state
    }

    #[must_use]
    pub fn scenario_id(&self) -> &ScenarioId {
        &self.scenario_id
    }

    #[must_use]
    pub fn checkpoint_index(&self) -> usize {
        self.checkpoint_index
    }

    #[must_use]
    pub fn conversation_log(&self) -> &[DialogueTurn] {
        &self.conversation_log
    }

    /// Number of seed turns the log starts with after opening or reset.
    #[must_use]
    pub fn seed_len(&self) -> usize {
        self.seed_len
    }

    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    #[must_use]
    pub fn confidence_score(&self) -> Option<ConfidenceScore> {
        self.confidence_score
    }

    /// Learner turns accepted since the current checkpoint became active.
    #[must_use]
    pub fn turns_at_checkpoint(&self) -> u32 {
        self.turns_at_checkpoint
    }

    /// Incremented on every reset; used to recognise results computed
    /// against an older version of the conversation.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn turn(&self, id: TurnId) -> Option<&DialogueTurn> {
        self.conversation_log.iter().find(|turn| turn.id == id)
    }

    #[must_use]
    pub fn last_learner_turn(&self) -> Option<&DialogueTurn> {
        self.conversation_log
            .iter()
            .rev()
            .find(|turn| turn.speaker == Speaker::User)
    }

    /// Learner turns currently in the log.
    #[must_use]
    pub fn learner_turns(&self) -> usize {
        self.conversation_log
            .iter()
            .filter(|turn| turn.speaker == Speaker::User)
            .count()
    }

    pub(crate) fn append(
        &mut self,
        speaker: Speaker,
        text: &str,
        now: DateTime<Utc>,
    ) -> DialogueTurn {
        let turn = DialogueTurn {
            id: TurnId::new(self.next_turn_id),
            speaker,
            text: text.to_string(),
            created_at: now,
        };
        self.next_turn_id += 1;
        self.conversation_log.push(turn.clone());
        turn
    }

    pub(crate) fn note_learner_turn(&mut self) {
        self.turns_at_checkpoint = self.turns_at_checkpoint.saturating_add(1);
    }

    pub(crate) fn advance_checkpoint(&mut self) {
        self.checkpoint_index += 1;
        self.turns_at_checkpoint = 0;
    }

    pub(crate) fn reseed(&mut self, opening: &[String], now: DateTime<Utc>) {
        self.conversation_log.clear();
        self.checkpoint_index = 0;
        self.turns_at_checkpoint = 0;
        self.seed_len = opening.len();
        self.epoch += 1;
        for line in opening {
            self.append(Speaker::Assistant, line, now);
        }
    }

    pub(crate) fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
    }

    pub(crate) fn set_confidence_score(&mut self, score: ConfidenceScore) {
        self.confidence_score = Some(score);
    }
}
