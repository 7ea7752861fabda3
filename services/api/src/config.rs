use rehearse_core::responder::LatencyProfile;
use rehearse_core::speech::VoiceMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
///
/// Missing API keys are not an error here: each boundary call reports them
/// as a configuration failure so the learner sees an actionable message.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub feedback_model: String,
    pub tts_model: String,
    pub voices: VoiceMap,
    /// When set, sessions reach the feedback boundary over HTTP.
    pub feedback_endpoint: Option<String>,
    /// When set, sessions reach the speech boundary over HTTP.
    pub speech_endpoint: Option<String>,
    pub remote_timeout: Duration,
    /// Sessions untouched for this long are discarded.
    pub session_idle_ttl: Duration,
    pub response_latency: LatencyProfile,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub scenarios_path: Option<PathBuf>,
    pub content_path: Option<PathBuf>,
}

/// Reads a variable, treating blank values as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Default for `SESSION_IDLE_TTL_SECS`.
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Reads a positive number of seconds, falling back to `default` when unset.
fn positive_secs(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match optional_var(name) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{raw}' is not a positive number of seconds"),
            )),
        },
        None => Ok(default),
    }
}

/// Parses `min-max` or a single value, both in milliseconds.
fn parse_latency(raw: &str) -> Result<LatencyProfile, String> {
    let parse = |part: &str| {
        part.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| format!("'{part}' is not a number of milliseconds: {e}"))
    };
    match raw.split_once('-') {
        Some((min, max)) => Ok(LatencyProfile::new(parse(min)?, parse(max)?)),
        None => Ok(LatencyProfile::fixed(parse(raw)?)),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = optional_var("OPENAI_API_KEY");
        let elevenlabs_api_key = optional_var("ELEVENLABS_API_KEY");

        let feedback_model =
            optional_var("FEEDBACK_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let tts_model = optional_var("TTS_MODEL")
            .unwrap_or_else(|| rehearse_core::protocol::DEFAULT_SPEECH_MODEL.to_string());

        let default_voices = VoiceMap::default();
        let voices = VoiceMap {
            assistant: optional_var("ASSISTANT_VOICE_ID").unwrap_or(default_voices.assistant),
            learner: optional_var("LEARNER_VOICE_ID").unwrap_or(default_voices.learner),
        };

        let feedback_endpoint = optional_var("FEEDBACK_ENDPOINT");
        let speech_endpoint = optional_var("SPEECH_ENDPOINT");

        let remote_timeout = positive_secs(
            "REMOTE_TIMEOUT_SECS",
            rehearse_core::feedback::DEFAULT_REMOTE_TIMEOUT,
        )?;
        let session_idle_ttl = positive_secs("SESSION_IDLE_TTL_SECS", DEFAULT_SESSION_IDLE_TTL)?;

        let response_latency = match optional_var("RESPONSE_LATENCY_MS") {
            Some(raw) => parse_latency(&raw)
                .map_err(|e| ConfigError::InvalidValue("RESPONSE_LATENCY_MS".to_string(), e))?,
            None => LatencyProfile::default(),
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));
        let scenarios_path = optional_var("SCENARIOS_PATH").map(PathBuf::from);
        let content_path = optional_var("CONTENT_PATH").map(PathBuf::from);

        Ok(Self {
            bind_address,
            openai_api_key,
            elevenlabs_api_key,
            feedback_model,
            tts_model,
            voices,
            feedback_endpoint,
            speech_endpoint,
            remote_timeout,
            session_idle_ttl,
            response_latency,
            log_level,
            prompts_path,
            scenarios_path,
            content_path,
        })
    }
}
