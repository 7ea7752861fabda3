//! Scenario definitions and the guidance registry.
//!
//! Scenarios are immutable once loaded. The catalog is built once at startup,
//! either from the definitions embedded in this crate or from a JSON file, and
//! shared behind an `Arc` by every session.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Hint returned when no guidance is registered for a checkpoint.
pub const GENERIC_GUIDANCE: &str = "Acknowledge how the person feels before moving on. \
Listen actively, reflect back what you heard in your own words, and ask one open question at a time.";

const BUILTIN_SCENARIOS: &str = include_str!("../data/scenarios.json");

/// Identifier of a scenario, e.g. `handover`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioId(String);

impl ScenarioId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScenarioId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        };
        f.write_str(label)
    }
}

/// One ordered sub-goal of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub index: usize,
    pub goal: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub id: ScenarioId,
    pub title: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub tags: BTreeSet<String>,
    /// Free-text situation handed to the responder and the feedback service.
    pub context: Option<String>,
    /// Lines the counterpart opens with. These are the session's seed turns.
    pub opening: Vec<String>,
    pub checkpoints: Vec<Checkpoint>,
}

impl Scenario {
    #[must_use]
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    #[must_use]
    pub fn checkpoint(&self, index: usize) -> Option<&Checkpoint> {
        self.checkpoints.get(index)
    }
}

/// Errors raised while loading a scenario catalog.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("scenario `{0}` is defined more than once")]
    DuplicateId(ScenarioId),
    #[error("scenario `{0}` has no checkpoints")]
    NoCheckpoints(ScenarioId),
    #[error("scenario `{0}` has no opening line")]
    NoOpening(ScenarioId),
    #[error("checkpoint {index} of scenario `{scenario}` has an empty goal")]
    EmptyGoal { scenario: ScenarioId, index: usize },
    #[error("failed to read scenario file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    scenarios: Vec<ScenarioDefinition>,
}

#[derive(Debug, Deserialize)]
struct ScenarioDefinition {
    id: ScenarioId,
    title: String,
    category: String,
    #[serde(default)]
    difficulty: Difficulty,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    context: Option<String>,
    opening: Vec<String>,
    checkpoints: Vec<CheckpointDefinition>,
}

#[derive(Debug, Deserialize)]
struct CheckpointDefinition {
    goal: String,
    #[serde(default)]
    guidance: Option<String>,
}

/// The set of scenarios a deployment offers, plus guidance keyed by
/// `(scenario, checkpoint index)`.
#[derive(Debug, Clone, Default)]
pub struct ScenarioCatalog {
    scenarios: BTreeMap<ScenarioId, Arc<Scenario>>,
    guidance: HashMap<(ScenarioId, usize), String>,
}

impl ScenarioCatalog {
    /// Loads the scenarios that ship with this crate.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the embedded definitions are invalid.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json_str(BUILTIN_SCENARIOS)
    }

    /// Loads a catalog from a JSON file of the form `{"scenarios": [...]}`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the file cannot be read or is invalid.
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses and validates a JSON catalog.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` on malformed JSON, duplicate ids, or scenarios
    /// without checkpoints, opening lines, or goals.
    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        let mut catalog = Self::default();

        for definition in file.scenarios {
            let id = definition.id;
            if catalog.scenarios.contains_key(&id) {
                return Err(CatalogError::DuplicateId(id));
            }
            if definition.checkpoints.is_empty() {
                return Err(CatalogError::NoCheckpoints(id));
            }
            if definition.opening.iter().all(|line| line.trim().is_empty()) {
                return Err(CatalogError::NoOpening(id));
            }

            let mut checkpoints = Vec::with_capacity(definition.checkpoints.len());
            for (index, checkpoint) in definition.checkpoints.into_iter().enumerate() {
                let goal = checkpoint.goal.trim();
                if goal.is_empty() {
                    return Err(CatalogError::EmptyGoal {
                        scenario: id,
                        index,
                    });
                }
                if let Some(text) = checkpoint.guidance.filter(|g| !g.trim().is_empty()) {
                    catalog.guidance.insert((id.clone(), index), text);
                }
                checkpoints.push(Checkpoint {
                    index,
                    goal: goal.to_string(),
                });
            }

            let scenario = Scenario {
                id: id.clone(),
                title: definition.title,
                category: definition.category,
                difficulty: definition.difficulty,
                tags: definition.tags,
                context: definition.context.filter(|c| !c.trim().is_empty()),
                opening: definition
                    .opening
                    .into_iter()
                    .filter(|line| !line.trim().is_empty())
                    .collect(),
                checkpoints,
            };
            catalog.scenarios.insert(id, Arc::new(scenario));
        }

        Ok(catalog)
    }

    #[must_use]
    pub fn get(&self, id: &ScenarioId) -> Option<Arc<Scenario>> {
        self.scenarios.get(id).cloned()
    }

    /// Scenarios ordered by id.
    pub fn scenarios(&self) -> impl Iterator<Item = &Arc<Scenario>> {
        self.scenarios.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Guidance registered for a checkpoint, if any.
    #[must_use]
    pub fn guidance(&self, scenario: &ScenarioId, checkpoint: usize) -> Option<&str> {
        self.guidance
            .get(&(scenario.clone(), checkpoint))
            .map(String::as_str)
    }

    /// Guidance for a checkpoint, falling back to [`GENERIC_GUIDANCE`].
    #[must_use]
    pub fn guidance_or_default(&self, scenario: &ScenarioId, checkpoint: usize) -> &str {
        self.guidance(scenario, checkpoint)
            .unwrap_or(GENERIC_GUIDANCE)
    }
}
