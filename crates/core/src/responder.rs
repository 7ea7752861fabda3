//! Rule-based stand-in for the remote language model.
//!
//! The responder classifies the learner's utterance, picks a canned reply
//! from the matching pool and optionally paraphrases the scenario context in
//! front of it. A short randomised delay keeps the exchange feeling natural.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::classifier::{ResponseClassifier, TopicCategory};
use crate::content::{CONTEXT_PLACEHOLDER, DialogueContent};
use crate::error::ValidationError;

/// Side channel for failures that must not reach the caller.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, component: &'static str, error: &(dyn std::error::Error + 'static));
}

/// Default reporter: emits a `tracing` error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, component: &'static str, error: &(dyn std::error::Error + 'static)) {
        error!(component, error = %error, "internal failure while composing a reply");
    }
}

/// Bounds of the simulated response latency, sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyProfile {
    min: Duration,
    max: Duration,
}

impl LatencyProfile {
    /// Swaps the bounds if they are given in the wrong order.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    #[must_use]
    pub fn min(&self) -> Duration {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    fn sample(&self, rng: &mut StdRng) -> Duration {
        if self.min == self.max {
            self.min
        } else {
            rng.random_range(self.min..=self.max)
        }
    }
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self::new(Duration::from_millis(400), Duration::from_millis(1200))
    }
}

/// A composed reply together with the category it was drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub category: TopicCategory,
    /// Set when composition failed internally and the apology was returned.
    pub degraded: bool,
}

#[derive(Debug, Error)]
enum ComposeError {
    #[error("no canned replies configured for category `{0}`")]
    EmptyPool(TopicCategory),
    #[error("no context templates configured")]
    NoTemplates,
    #[error("random source is unavailable")]
    RandomSource,
}

pub struct DialogueResponder {
    content: Arc<DialogueContent>,
    rng: Mutex<StdRng>,
    latency: LatencyProfile,
    reporter: Arc<dyn ErrorReporter>,
}

impl DialogueResponder {
    /// Creates a responder with an OS-seeded random source, the default
    /// latency range and the tracing reporter.
    #[must_use]
    pub fn new(content: Arc<DialogueContent>) -> Self {
        Self {
            content,
            rng: Mutex::new(StdRng::from_os_rng()),
            latency: LatencyProfile::default(),
            reporter: Arc::new(TracingErrorReporter),
        }
    }

    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    #[must_use]
    pub fn with_latency(mut self, latency: LatencyProfile) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn content(&self) -> &DialogueContent {
        &self.content
    }

    /// Produces the counterpart's reply to `text`.
    ///
    /// Internal failures are reported through the [`ErrorReporter`] and
    /// answered with the apology text; they never surface as errors.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyText` if `text` is blank.
    pub async fn respond(&self, text: &str, context: Option<&str>) -> Result<Reply, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyText);
        }

        let category = ResponseClassifier::new(self.content.keywords()).classify(text);
        let delay = self.sample_latency();
        debug!(%category, delay_ms = delay.as_millis() as u64, "composing reply");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.compose(category, context) {
            Ok(text) => Ok(Reply {
                text,
                category,
                degraded: false,
            }),
            Err(err) => {
                self.reporter.report("dialogue_responder", &err);
                Ok(Reply {
                    text: self.content.apology().to_string(),
                    category,
                    degraded: true,
                })
            }
        }
    }

    fn sample_latency(&self) -> Duration {
        match self.rng.lock() {
            Ok(mut rng) => self.latency.sample(&mut rng),
            Err(_) => self.latency.min,
        }
    }

    fn compose(&self, category: TopicCategory, context: Option<&str>) -> Result<String, ComposeError> {
        let mut rng = self.rng.lock().map_err(|_| ComposeError::RandomSource)?;
        let base = self
            .content
            .pool(category)
            .choose(&mut *rng)
            .ok_or(ComposeError::EmptyPool(category))?;

        let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(base.clone());
        };
        let template = self
            .content
            .context_templates()
            .choose(&mut *rng)
            .ok_or(ComposeError::NoTemplates)?;

        Ok(format!(
            "{}{}",
            template.replace(CONTEXT_PLACEHOLDER, context),
            lowercase_first(base)
        ))
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
