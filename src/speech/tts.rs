//! Text-to-speech over HTTP
//!
//! Replies are synthesized remotely and returned as WAV. Audio is keyed by a
//! speech identifier so unchanged text with unchanged voice settings is never
//! synthesized twice.

use crate::audio::wav::{decode_wav, downmix_to_mono};
use crate::{ParleyError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_SPEECH_ENDPOINT: &str = "https://api.openai.com/v1/audio/speech";

/// Voice settings for read-aloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSettings {
    pub model: String,
    pub voice: String,
    pub speed: f32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
        }
    }
}

impl SpeechSettings {
    /// User values where set, defaults otherwise.
    pub fn from_user(model: Option<&str>, voice: Option<&str>, speed: Option<f32>) -> Self {
        let defaults = Self::default();
        Self {
            model: model
                .filter(|m| !m.trim().is_empty())
                .map(str::to_string)
                .unwrap_or(defaults.model),
            voice: voice
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .unwrap_or(defaults.voice),
            speed: speed.filter(|s| *s > 0.0).unwrap_or(defaults.speed),
        }
    }
}

/// Synthesized speech (f32, mono)
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SpeechAudio {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Weighted sum of UTF-16 code units, kept below 65535.
pub fn content_checksum(content: &str) -> u32 {
    content
        .encode_utf16()
        .enumerate()
        .fold(0u64, |acc, (i, unit)| {
            (acc + unit as u64 * (i as u64 + 1)) % 65535
        }) as u32
}

/// `<checksum>-<model>-<voice>-<speed>`
pub fn speech_identifier(content: &str, settings: &SpeechSettings) -> String {
    format!(
        "{}-{}-{}-{}",
        content_checksum(content),
        settings.model,
        settings.voice,
        settings.speed
    )
}

static CODE_FENCE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)```.*?```").ok());

/// Remove fenced code blocks; nobody wants source code read aloud.
pub fn prepare_for_speech(content: &str) -> String {
    match CODE_FENCE.as_ref() {
        Some(fence) => fence.replace_all(content, "").into_owned(),
        None => content.to_string(),
    }
}

#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn synthesize(&self, text: &str, settings: &SpeechSettings) -> Result<SpeechAudio>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpSpeechClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSpeechClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = if key.trim().is_empty() { None } else { Some(key) };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self)
    }
}

impl Default for HttpSpeechClient {
    fn default() -> Self {
        Self::new(DEFAULT_SPEECH_ENDPOINT)
    }
}

#[async_trait]
impl SpeechService for HttpSpeechClient {
    async fn synthesize(&self, text: &str, settings: &SpeechSettings) -> Result<SpeechAudio> {
        let body = SpeechRequest {
            model: &settings.model,
            input: text,
            voice: &settings.voice,
            speed: settings.speed,
            response_format: "wav",
        };

        debug!(
            "Requesting speech for {} chars ({}/{})",
            text.len(),
            settings.model,
            settings.voice
        );

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ParleyError::SpeechError(format!("Speech HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(ParleyError::SpeechError(format!(
                "Speech synthesis failed with status {}: {}",
                status, error_text
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ParleyError::SpeechError(format!("Failed to read speech audio: {}", e)))?;

        let (samples, sample_rate, channels) = decode_wav(&bytes)?;
        let audio = SpeechAudio {
            samples: downmix_to_mono(&samples, channels as usize),
            sample_rate,
        };
        info!("Synthesized {:.1}s of speech", audio.duration_secs());
        Ok(audio)
    }
}
