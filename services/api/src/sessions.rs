//! Live practice sessions, keyed by id.
//!
//! Each engine sits behind its own `tokio::sync::Mutex`, so requests on one
//! session are queued while independent sessions never contend. Sessions
//! nobody has touched for the idle TTL are discarded by a background sweep.

use rehearse_core::{CheckpointScenarioEngine, SessionEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::Instant;
use tracing::{Instrument, debug, info};
use uuid::Uuid;

use crate::state::AppState;

pub type SharedEngine = Arc<Mutex<CheckpointScenarioEngine>>;

/// Capacity of each session's event channel.
pub const EVENT_BUFFER: usize = 32;

/// Upper bound on the time between two idle sweeps.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    engine: SharedEngine,
    last_active: Instant,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: Uuid, engine: CheckpointScenarioEngine) -> SharedEngine {
        let shared = Arc::new(Mutex::new(engine));
        let entry = Entry {
            engine: shared.clone(),
            last_active: Instant::now(),
        };
        self.sessions.write().await.insert(id, entry);
        shared
    }

    /// Looks a session up and marks it as active.
    pub async fn get(&self, id: Uuid) -> Option<SharedEngine> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id)?;
        entry.last_active = Instant::now();
        Some(entry.engine.clone())
    }

    /// Removes a session. The engine is discarded so that any request still
    /// holding it sees `Discarded` and late results are dropped.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id);
        match removed {
            Some(entry) => {
                entry.engine.lock().await.discard();
                true
            }
            None => false,
        }
    }

    /// Discards every session idle for at least `ttl` and returns how many
    /// were evicted.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.sessions.write().await.retain(|id, entry| {
            let idle = now.duration_since(entry.last_active) >= ttl;
            if idle {
                expired.push((*id, entry.engine.clone()));
            }
            !idle
        });

        for (id, engine) in &expired {
            engine.lock().await.discard();
            info!(session_id = %id, "idle practice session evicted");
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Drains a session's events into the log until the engine is discarded or
/// dropped.
pub fn spawn_event_logger(id: Uuid, mut events: mpsc::Receiver<SessionEvent>) {
    let span = tracing::info_span!("session_events", session_id = %id);
    tokio::spawn(
        async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Completed { confidence } => {
                        info!(confidence = confidence.value(), "session completed");
                    }
                    other => debug!(event = ?other, "session event"),
                }
            }
            debug!("event channel closed");
        }
        .instrument(span),
    );
}

/// Periodically evicts sessions idle for longer than the configured TTL.
pub fn spawn_idle_sweeper(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let ttl = state.config.session_idle_ttl;
    let period = ttl.min(MAX_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = state.sessions.evict_idle(ttl).await;
            if evicted > 0 {
                let remaining = state.sessions.len().await;
                debug!(evicted, remaining, "idle sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_services, unconfigured_state};
    use rehearse_core::{EngineError, ScenarioId, SurfaceId};

    fn engine(id: Uuid) -> CheckpointScenarioEngine {
        CheckpointScenarioEngine::new(test_services(), SurfaceId::for_session(id))
    }

    #[tokio::test]
    async fn test_registry_insert_get_remove() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();

        let shared = registry.insert(id, engine(id)).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(id).await.is_some());
        assert!(registry.get(Uuid::new_v4()).await.is_none());

        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);
        assert!(registry.is_empty().await);

        let mut engine = shared.lock().await;
        assert!(engine.is_discarded());
        assert_eq!(
            engine.start(&ScenarioId::from("handover")).unwrap_err(),
            EngineError::Discarded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_are_evicted() {
        let registry = SessionRegistry::new();
        let ttl = Duration::from_secs(30 * 60);
        let (idle, active) = (Uuid::new_v4(), Uuid::new_v4());
        let idle_engine = registry.insert(idle, engine(idle)).await;
        registry.insert(active, engine(active)).await;

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        assert!(registry.get(active).await.is_some());
        assert_eq!(registry.evict_idle(ttl).await, 0);

        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        assert_eq!(registry.evict_idle(ttl).await, 1);

        assert_eq!(registry.len().await, 1);
        assert!(registry.get(idle).await.is_none());
        assert!(registry.get(active).await.is_some());
        assert!(idle_engine.lock().await.is_discarded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_empties_the_registry_and_stops_loggers() {
        let state = Arc::new(unconfigured_state(test_services()));
        let ttl = state.config.session_idle_ttl;

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let id = Uuid::new_v4();
            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            let mut engine = engine(id).with_events(tx);
            engine.start(&ScenarioId::from("handover")).unwrap();
            state.sessions.insert(id, engine).await;
            receivers.push(rx);
        }
        assert_eq!(state.sessions.len().await, 3);

        let sweeper = spawn_idle_sweeper(state.clone());
        tokio::time::sleep(ttl * 3).await;

        assert!(state.sessions.is_empty().await);
        for mut rx in receivers {
            while rx.try_recv().is_ok() {}
            assert!(rx.recv().await.is_none());
        }
        sweeper.abort();
    }
}
