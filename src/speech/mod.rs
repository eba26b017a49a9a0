//! Text-to-speech for assistant replies
//!
//! This module provides:
//! - Remote synthesis with a speech identifier cache key
//! - The read-aloud player and its playback seam

pub mod read_aloud;
pub mod tts;

pub use read_aloud::{AudioSink, ReadAloud, ReadAloudState};
pub use tts::{
    content_checksum, prepare_for_speech, speech_identifier, HttpSpeechClient, SpeechAudio,
    SpeechService, SpeechSettings,
};
