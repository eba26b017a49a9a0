//! Remote transcription collaborator
//!
//! The audio pipeline hands a packaged [`AudioAsset`] to a
//! [`TranscriptionService`] and turns the returned text into a user message
//! after [`normalize_transcript`] strips subtitle markup.

pub mod http;

pub use http::HttpTranscriptionClient;

use crate::audio::AudioAsset;
use crate::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LANGUAGE: &str = "es";

/// Options sent alongside every asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionOptions {
    pub language: String,
    pub temperature: f32,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            temperature: 0.0,
        }
    }
}

impl TranscriptionOptions {
    /// Settings values win; blanks fall back to the defaults.
    pub fn resolve(
        language: Option<&str>,
        temperature: Option<f32>,
        defaults: &TranscriptionOptions,
    ) -> Self {
        let language = language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(&defaults.language)
            .to_string();
        Self {
            language,
            temperature: temperature.unwrap_or(defaults.temperature),
        }
    }
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Raw transcript for `asset`, or `None` when the service heard nothing.
    async fn transcribe(
        &self,
        asset: &AudioAsset,
        options: &TranscriptionOptions,
    ) -> Result<Option<String>>;
}

static TIMESTAMP_RANGE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^\d{2}:\d{2}:\d{2}\.\d{3} --> \d{2}:\d{2}:\d{2}\.\d{3}$").ok()
});

fn is_cue_timing(line: &str) -> bool {
    TIMESTAMP_RANGE
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(line))
}

const MARKER_PREFIX: &str = "WEBVTT";

/// Drop the WEBVTT marker and cue timing lines, join the rest with spaces.
pub fn normalize_transcript(raw: &str) -> String {
    raw.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.starts_with(MARKER_PREFIX) && !is_cue_timing(line))
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}
