//! Audio playback with at most one active stream per surface.
//!
//! Every surface (typically one per session) is a small state machine:
//!
//! ```text
//! idle|failed --play--> loading --synthesised--> playing --sink done--> idle
//!                          |                        |
//!                          +------- failure --------+--> failed
//! ```
//!
//! The `idle|failed -> loading` step is a single check-and-set under the
//! controller mutex, so two requests can never both be accepted.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::feedback::DEFAULT_REMOTE_TIMEOUT;
use crate::protocol::{DEFAULT_SPEECH_MODEL, SpeechRequest};
use crate::session::{Speaker, TurnId};
use crate::speech::{SpeechSynthesizer, VoiceMap};

const EVENT_CAPACITY: usize = 64;

/// Identifies an output surface, i.e. one place audio can come out of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(String);

impl SurfaceId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The surface owned by a session.
    #[must_use]
    pub fn for_session(session: impl fmt::Display) -> Self {
        Self(format!("session-{session}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Loading,
    Playing,
    Failed,
}

impl PlaybackPhase {
    /// A busy surface rejects new requests.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, PlaybackPhase::Loading | PlaybackPhase::Playing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub text: String,
    pub speaker: Speaker,
    pub turn_id: Option<TurnId>,
}

/// A phase transition, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub surface: SurfaceId,
    pub turn_id: Option<TurnId>,
    pub phase: PlaybackPhase,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("audio output failed: {0}")]
pub struct SinkError(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaybackFailure {
    #[error("speech synthesis failed: {0}")]
    Synthesis(#[from] ServiceError),
    #[error(transparent)]
    Output(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Audio was synthesised and played to completion.
    Played,
    /// The surface was already loading or playing; nothing changed.
    Rejected { active_turn: Option<TurnId> },
    Failed(PlaybackFailure),
}

/// Where synthesised audio is played. `play` resolves on natural completion.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio: Vec<u8>) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    phase: PlaybackPhase,
    turn_id: Option<TurnId>,
}

pub struct AudioPlaybackController {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    voices: VoiceMap,
    model_id: String,
    timeout: Duration,
    surfaces: Mutex<HashMap<SurfaceId, Slot>>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl AudioPlaybackController {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            synthesizer,
            voices: VoiceMap::default(),
            model_id: DEFAULT_SPEECH_MODEL.to_string(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
            surfaces: Mutex::new(HashMap::new()),
            events,
        }
    }

    #[must_use]
    pub fn with_voices(mut self, voices: VoiceMap) -> Self {
        self.voices = voices;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn voices(&self) -> &VoiceMap {
        &self.voices
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn phase(&self, surface: &SurfaceId) -> PlaybackPhase {
        self.lock()
            .get(surface)
            .map(|slot| slot.phase)
            .unwrap_or_default()
    }

    /// The turn currently loading or playing on `surface`.
    #[must_use]
    pub fn active_turn(&self, surface: &SurfaceId) -> Option<TurnId> {
        self.lock()
            .get(surface)
            .filter(|slot| slot.phase.is_busy())
            .and_then(|slot| slot.turn_id)
    }

    /// Phase as seen from one turn's control: only the surface's current turn
    /// is ever non-idle.
    #[must_use]
    pub fn turn_phase(&self, surface: &SurfaceId, turn_id: TurnId) -> PlaybackPhase {
        self.lock()
            .get(surface)
            .filter(|slot| slot.turn_id == Some(turn_id))
            .map(|slot| slot.phase)
            .unwrap_or_default()
    }

    /// Returns a failed surface to idle once the failure has been shown.
    /// Returns `false` if the surface was not in the failed phase.
    pub fn acknowledge_failure(&self, surface: &SurfaceId) -> bool {
        let mut surfaces = self.lock();
        match surfaces.get_mut(surface) {
            Some(slot) if slot.phase == PlaybackPhase::Failed => {
                *slot = Slot::default();
                self.emit(surface, None, PlaybackPhase::Idle);
                true
            }
            _ => false,
        }
    }

    /// Synthesises `request` and plays it on `sink`, unless `surface` is busy.
    ///
    /// Never fails across this boundary; the outcome carries any failure.
    pub async fn play(
        &self,
        surface: &SurfaceId,
        request: PlaybackRequest,
        sink: &dyn AudioSink,
    ) -> PlaybackOutcome {
        if let Err(active_turn) = self.try_begin(surface, request.turn_id) {
            debug!(%surface, ?active_turn, "playback rejected, surface is busy");
            return PlaybackOutcome::Rejected { active_turn };
        }
        let guard = SlotGuard {
            controller: self,
            surface,
            armed: true,
        };

        let speech = SpeechRequest {
            text: request.text,
            voice_id: self.voices.voice_for(request.speaker).to_string(),
            model_id: self.model_id.clone(),
        };
        let audio =
            match tokio::time::timeout(self.timeout, self.synthesizer.synthesize(&speech)).await {
                Ok(Ok(audio)) => audio,
                Ok(Err(err)) => return guard.fail(err.into()),
                Err(_) => return guard.fail(ServiceError::Timeout(self.timeout).into()),
            };

        self.set_phase(surface, PlaybackPhase::Playing);
        match sink.play(audio).await {
            Ok(()) => {
                guard.finish();
                info!(%surface, turn_id = ?request.turn_id, "playback finished");
                PlaybackOutcome::Played
            }
            Err(err) => guard.fail(err.into()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SurfaceId, Slot>> {
        self.surfaces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_begin(&self, surface: &SurfaceId, turn_id: Option<TurnId>) -> Result<(), Option<TurnId>> {
        let mut surfaces = self.lock();
        let slot = surfaces.entry(surface.clone()).or_default();
        if slot.phase.is_busy() {
            return Err(slot.turn_id);
        }
        *slot = Slot {
            phase: PlaybackPhase::Loading,
            turn_id,
        };
        self.emit(surface, turn_id, PlaybackPhase::Loading);
        Ok(())
    }

    fn set_phase(&self, surface: &SurfaceId, phase: PlaybackPhase) {
        let mut surfaces = self.lock();
        let slot = surfaces.entry(surface.clone()).or_default();
        slot.phase = phase;
        if phase == PlaybackPhase::Idle {
            slot.turn_id = None;
        }
        let turn_id = slot.turn_id;
        self.emit(surface, turn_id, phase);
    }

    fn emit(&self, surface: &SurfaceId, turn_id: Option<TurnId>, phase: PlaybackPhase) {
        // No subscribers is fine.
        let _ = self.events.send(PlaybackEvent {
            surface: surface.clone(),
            turn_id,
            phase,
        });
    }
}

/// Returns the surface to idle if the play future is dropped mid-flight.
struct SlotGuard<'a> {
    controller: &'a AudioPlaybackController,
    surface: &'a SurfaceId,
    armed: bool,
}

impl SlotGuard<'_> {
    fn finish(mut self) {
        self.armed = false;
        self.controller.set_phase(self.surface, PlaybackPhase::Idle);
    }

    fn fail(mut self, failure: PlaybackFailure) -> PlaybackOutcome {
        self.armed = false;
        warn!(surface = %self.surface, error = %failure, "playback failed");
        self.controller.set_phase(self.surface, PlaybackPhase::Failed);
        PlaybackOutcome::Failed(failure)
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(surface = %self.surface, "playback cancelled");
            self.controller.set_phase(self.surface, PlaybackPhase::Idle);
        }
    }
}
