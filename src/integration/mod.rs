//! Integration layer connecting the chat components to a host
//!
//! Provides the [`ChatController`] and its configuration.

pub mod config;
pub mod controller;

pub use config::{ControllerConfig, HistoryMode, SpeechConfig, TranscriptionConfig, UserSettings};
pub use controller::{ChatController, ChatControllerBuilder, ExchangeOutcome};
