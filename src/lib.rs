pub mod audio;
pub mod conversation;
pub mod integration;
pub mod messages;
pub mod notify;
pub mod quote;
pub mod settings;
pub mod speech;
pub mod stream;
pub mod telemetry;
pub mod transcription;

pub use integration::{ChatController, ChatControllerBuilder, ControllerConfig, ExchangeOutcome};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ParleyError {
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    #[error("Media access error: {0}")]
    MediaAccessError(String),

    #[error("Transcription error: {0}")]
    TranscriptionError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Conversation store error: {0}")]
    StoreError(String),

    #[error("Speech error: {0}")]
    SpeechError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("An exchange is already in progress")]
    ExchangeInProgress,

    #[error("Conversation {0} not found")]
    ConversationNotFound(i64),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Audio processing error: {0}")]
    AudioProcessingError(String),
}

impl From<std::io::Error> for ParleyError {
    fn from(e: std::io::Error) -> Self {
        ParleyError::IOError(e.to_string())
    }
}

impl From<stream::TransportError> for ParleyError {
    fn from(e: stream::TransportError) -> Self {
        ParleyError::TransportError(e.to_string())
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(e: serde_json::Error) -> Self {
        ParleyError::SerializationError(e.to_string())
    }
}

impl ParleyError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Hardware/permission problems need user intervention
            ParleyError::AudioDeviceError(_) => false,
            ParleyError::MediaAccessError(_) => false,
            // The user can simply re-record or resend
            ParleyError::TranscriptionError(_) => true,
            ParleyError::TransportError(_) => true,
            ParleyError::StoreError(_) => true,
            ParleyError::SpeechError(_) => true,
            ParleyError::ConfigError(_) => false,
            ParleyError::InvalidState(_) => true,
            ParleyError::InvalidInput(_) => true,
            ParleyError::ExchangeInProgress => true,
            ParleyError::ConversationNotFound(_) => true,
            ParleyError::SerializationError(_) => false,
            ParleyError::IOError(_) => false,
            ParleyError::AudioProcessingError(_) => true,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            ParleyError::AudioDeviceError(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            ParleyError::MediaAccessError(reason) => reason.clone(),
            ParleyError::TranscriptionError(_) => {
                "Speech recognition failed. Please record again.".to_string()
            }
            ParleyError::TransportError(_) => {
                "The assistant could not answer. Please try again.".to_string()
            }
            ParleyError::StoreError(_) => "Could not save the conversation.".to_string(),
            ParleyError::SpeechError(_) => {
                "Read-aloud failed. The reply is still shown as text.".to_string()
            }
            ParleyError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            ParleyError::InvalidState(_) => "That action is not available right now.".to_string(),
            ParleyError::InvalidInput(_) => "Please enter a message.".to_string(),
            ParleyError::ExchangeInProgress => {
                "Please wait for the current reply to finish.".to_string()
            }
            ParleyError::ConversationNotFound(id) => format!("Conversation {} not found.", id),
            ParleyError::SerializationError(_) => {
                "Stored conversation data is corrupted.".to_string()
            }
            ParleyError::IOError(_) => "File system error occurred.".to_string(),
            ParleyError::AudioProcessingError(_) => {
                "Audio processing failed. Please try again.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
