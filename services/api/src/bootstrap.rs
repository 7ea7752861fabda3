//! Builds the service graph from a [`Config`].

use anyhow::Context;
use rehearse_core::feedback::HttpFeedbackService;
use rehearse_core::speech::HttpSpeechSynthesizer;
use rehearse_core::{
    AudioPlaybackController, DialogueContent, DialogueResponder, EngineServices, FeedbackClient,
    ScenarioCatalog, SpeechSynthesizer,
};
use std::sync::Arc;
use tracing::info;

use crate::boundary::{ElevenLabsSynthesizer, OpenAiFeedbackService};
use crate::config::Config;
use crate::prompts::{FEEDBACK_SYSTEM_PROMPT, load_prompts, require_prompt};
use crate::sessions::SessionRegistry;
use crate::state::AppState;

/// The in-process boundary implementations.
pub struct Boundaries {
    pub feedback: FeedbackClient,
    pub speech: Arc<dyn SpeechSynthesizer>,
}

pub fn build_boundaries(config: &Config) -> anyhow::Result<Boundaries> {
    let prompts = load_prompts(&config.prompts_path)?;
    let system_prompt = require_prompt(&prompts, FEEDBACK_SYSTEM_PROMPT)?;

    let openai = OpenAiFeedbackService::new(
        config.openai_api_key.as_deref(),
        config.feedback_model.clone(),
        system_prompt,
    );
    let speech = ElevenLabsSynthesizer::new(config.elevenlabs_api_key.clone(), config.remote_timeout)
        .context("Failed to build the speech client")?;

    Ok(Boundaries {
        feedback: FeedbackClient::new(Arc::new(openai)).with_timeout(config.remote_timeout),
        speech: Arc::new(speech),
    })
}

/// Wires the collaborators practice sessions share.
///
/// Sessions reach a boundary over HTTP when its endpoint is configured and
/// in-process otherwise. `seed` makes the counterpart's replies repeatable.
pub fn build_engine_services(
    config: &Config,
    boundaries: &Boundaries,
    seed: Option<u64>,
) -> anyhow::Result<EngineServices> {
    let catalog = match &config.scenarios_path {
        Some(path) => ScenarioCatalog::from_path(path)
            .with_context(|| format!("Failed to load scenarios from {:?}", path))?,
        None => ScenarioCatalog::builtin().context("Built-in scenarios are invalid")?,
    };
    let content = match &config.content_path {
        Some(path) => DialogueContent::from_path(path)
            .with_context(|| format!("Failed to load dialogue content from {:?}", path))?,
        None => DialogueContent::builtin().context("Built-in dialogue content is invalid")?,
    };
    info!(scenarios = catalog.len(), "scenario catalog loaded");

    let responder = DialogueResponder::new(Arc::new(content)).with_latency(config.response_latency);
    let responder = match seed {
        Some(seed) => responder.with_seed(seed),
        None => responder,
    };

    let feedback = match &config.feedback_endpoint {
        Some(endpoint) => {
            info!(%endpoint, "sessions use the remote feedback boundary");
            FeedbackClient::new(Arc::new(HttpFeedbackService::new(
                endpoint.clone(),
                config.remote_timeout,
            )?))
            .with_timeout(config.remote_timeout)
        }
        None => boundaries.feedback.clone(),
    };

    let speech: Arc<dyn SpeechSynthesizer> = match &config.speech_endpoint {
        Some(endpoint) => {
            info!(%endpoint, "sessions use the remote speech boundary");
            Arc::new(HttpSpeechSynthesizer::new(endpoint.clone(), config.remote_timeout)?)
        }
        None => boundaries.speech.clone(),
    };
    let playback = AudioPlaybackController::new(speech)
        .with_voices(config.voices.clone())
        .with_model(config.tts_model.clone())
        .with_timeout(config.remote_timeout);

    Ok(EngineServices {
        catalog: Arc::new(catalog),
        responder: Arc::new(responder),
        feedback,
        playback: Arc::new(playback),
    })
}

pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let boundaries = build_boundaries(&config)?;
    let services = build_engine_services(&config, &boundaries, None)?;
    Ok(AppState {
        config: Arc::new(config),
        services,
        feedback_boundary: boundaries.feedback,
        speech_boundary: boundaries.speech,
        sessions: SessionRegistry::new(),
    })
}
