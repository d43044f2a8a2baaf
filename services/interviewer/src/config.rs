//! Application configuration.
//!
//! Settings come from environment variables (and a `.env` file when present) and are
//! collected into one `Config` that is handed to the adapters at startup.

use interview_core::{
    Mode, OrchestratorOptions, OutputChannel, PersonalityPolicy, Revelation, Settings, Shortcut,
    Timeouts,
};
use secrecy::SecretString;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

use crate::openai::DEFAULT_BASE_URL;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "gpt-4o-mini-transcribe";
pub const DEFAULT_SPEECH_MODEL: &str = "tts-1";
pub const DEFAULT_SPEECH_VOICE: &str = "alloy";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HISTORY_WINDOW: usize = 8;

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: SecretString,
    pub openai_base_url: String,
    pub chat_model: String,
    pub transcription_model: String,
    pub speech_model: String,
    pub speech_voice: String,
    pub request_timeout: Duration,
    pub history_window: usize,
    pub shortcut: Shortcut,
    pub policy: PersonalityPolicy,
    pub stream_replies: bool,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// * `OPENAI_API_KEY`: required.
    /// * `OPENAI_BASE_URL`: defaults to the public OpenAI endpoint.
    /// * `CHAT_MODEL`, `TRANSCRIPTION_MODEL`, `SPEECH_MODEL`, `SPEECH_VOICE`: model choices.
    /// * `REQUEST_TIMEOUT_SECS`: transcription, synthesis and non-streamed reply timeout.
    /// * `HISTORY_WINDOW`: trailing messages sent with each prompt.
    /// * `RECORDING_SHORTCUT`: e.g. `cmd+y` or `ctrl+shift+r`.
    /// * `OUTPUT_CHANNEL`, `INTERVIEW_MODE`, `REVELATION`: the personality policy.
    /// * `STREAM_REPLIES`: `true` to stream model replies.
    /// * `INPUT_DEVICE`, `OUTPUT_DEVICE`: audio device names, default devices otherwise.
    /// * `RUST_LOG`: log level, defaults to `INFO`.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. Ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let openai_api_key = var("OPENAI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let policy = PersonalityPolicy {
            mode: parse_or("INTERVIEW_MODE", var("INTERVIEW_MODE"), Mode::default())?,
            revelation: parse_or("REVELATION", var("REVELATION"), Revelation::default())?,
            channel: parse_or("OUTPUT_CHANNEL", var("OUTPUT_CHANNEL"), OutputChannel::default())?,
        };

        let history_window: usize =
            parse_or("HISTORY_WINDOW", var("HISTORY_WINDOW"), DEFAULT_HISTORY_WINDOW)?;
        if history_window == 0 {
            return Err(ConfigError::InvalidValue(
                "HISTORY_WINDOW".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let timeout_secs: u64 = parse_or(
            "REQUEST_TIMEOUT_SECS",
            var("REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        let stream_replies = match var("STREAM_REPLIES") {
            None => true,
            Some(value) => parse_flag(&value).ok_or_else(|| {
                ConfigError::InvalidValue("STREAM_REPLIES".to_string(), value.clone())
            })?,
        };

        Ok(Self {
            openai_api_key,
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            chat_model: var("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            transcription_model: var("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            speech_model: var("SPEECH_MODEL").unwrap_or_else(|| DEFAULT_SPEECH_MODEL.to_string()),
            speech_voice: var("SPEECH_VOICE").unwrap_or_else(|| DEFAULT_SPEECH_VOICE.to_string()),
            request_timeout: Duration::from_secs(timeout_secs),
            history_window,
            shortcut: parse_or(
                "RECORDING_SHORTCUT",
                var("RECORDING_SHORTCUT"),
                Shortcut::platform_default(),
            )?,
            policy,
            stream_replies,
            input_device: var("INPUT_DEVICE"),
            output_device: var("OUTPUT_DEVICE"),
            log_level,
        })
    }

    /// Initial user preferences for a new orchestrator.
    pub fn settings(&self) -> Settings {
        Settings {
            shortcut: self.shortcut.clone(),
            policy: self.policy,
            stream_replies: self.stream_replies,
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            history_window: self.history_window,
            timeouts: Timeouts {
                transcription: self.request_timeout,
                reply_idle: self.request_timeout,
                synthesis: self.request_timeout,
            },
        }
    }
}

fn parse_or<T>(name: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match value {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
