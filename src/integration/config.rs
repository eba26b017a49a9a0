//! Configuration for the chat controller
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes.

use crate::transcription::{TranscriptionOptions, DEFAULT_LANGUAGE};
use crate::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_MAX_TITLE_LENGTH: usize = 50;
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// How much history goes out with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// The whole conversation.
    #[default]
    Full,
    /// Only the newest user message.
    LatestOnly,
}

/// Per-user defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub name: Option<String>,
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub speech_model: Option<String>,
    pub speech_voice: Option<String>,
    pub speech_speed: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub endpoint: String,
    pub default_language: String,
    pub default_temperature: f32,
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::transcription::http::DEFAULT_ENDPOINT.to_string(),
            default_language: DEFAULT_LANGUAGE.to_string(),
            default_temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

impl TranscriptionConfig {
    pub fn default_options(&self) -> TranscriptionOptions {
        TranscriptionOptions {
            language: self.default_language.clone(),
            temperature: self.default_temperature,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Read each completed reply aloud.
    pub auto_play: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::speech::tts::DEFAULT_SPEECH_ENDPOINT.to_string(),
            api_key: None,
            auto_play: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub max_title_length: usize,
    pub default_model: String,
    pub default_system_prompt: String,
    pub default_instructions: String,
    pub history: HistoryMode,
    /// Capacity of the fragment channel between transport and assembler.
    pub fragment_buffer: usize,
    /// Topic handed to the transport with each exchange.
    pub topic: Option<String>,
    pub user: UserSettings,
    pub transcription: TranscriptionConfig,
    pub speech: SpeechConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_title_length: DEFAULT_MAX_TITLE_LENGTH,
            default_model: DEFAULT_MODEL.to_string(),
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_instructions: String::new(),
            history: HistoryMode::Full,
            fragment_buffer: 64,
            topic: None,
            user: UserSettings::default(),
            transcription: TranscriptionConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// `<config dir>/parley/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("parley").join("config.toml"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ParleyError::ConfigError(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ParleyError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the default file when present, defaults otherwise.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                debug!("No configuration file; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn with_max_title_length(mut self, max: usize) -> Self {
        self.max_title_length = max;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_default_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.default_system_prompt = prompt.into();
        self
    }

    pub fn with_history(mut self, history: HistoryMode) -> Self {
        self.history = history;
        self
    }

    pub fn with_user(mut self, user: UserSettings) -> Self {
        self.user = user;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_auto_play(mut self, auto_play: bool) -> Self {
        self.speech.auto_play = auto_play;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_title_length == 0 {
            return Err(ParleyError::ConfigError(
                "max_title_length must be greater than 0".into(),
            ));
        }
        if self.fragment_buffer == 0 {
            return Err(ParleyError::ConfigError(
                "fragment_buffer must be greater than 0".into(),
            ));
        }
        if self.default_model.trim().is_empty() {
            return Err(ParleyError::ConfigError("default_model is required".into()));
        }
        if self.transcription.endpoint.trim().is_empty() {
            return Err(ParleyError::ConfigError(
                "transcription.endpoint is required".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.transcription.default_temperature) {
            return Err(ParleyError::ConfigError(format!(
                "transcription.default_temperature out of range: {}",
                self.transcription.default_temperature
            )));
        }
        if let Some(speed) = self.user.speech_speed {
            if !(0.25..=4.0).contains(&speed) {
                return Err(ParleyError::ConfigError(format!(
                    "user.speech_speed out of range: {}",
                    speed
                )));
            }
        }
        Ok(())
    }
}
