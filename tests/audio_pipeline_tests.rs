//! Voice input tests: microphone access, recording, transcription and the
//! hand-off of transcripts to the chat controller.

use async_trait::async_trait;
use crossbeam_channel::Sender;
use futures::StreamExt;
use parking_lot::Mutex;
use parley::audio::{
    AssetFormat, AudioAsset, CaptureDevice, CaptureState, MediaAccess, MediaAccessError,
};
use parley::integration::{
    ChatController, ChatControllerBuilder, ControllerConfig, ExchangeOutcome,
};
use parley::settings::{ChatSettings, InMemorySettingsStore};
use parley::stream::{StreamTransport, TransportError};
use parley::transcription::{normalize_transcript, TranscriptionOptions, TranscriptionService};
use parley::{ParleyError, Result};
use std::sync::Arc;

/// Device that emits a fixed set of chunks when stopped.
struct ScriptedDevice {
    chunks: Vec<Vec<u8>>,
    sink: Option<Sender<Vec<u8>>>,
}

impl CaptureDevice for ScriptedDevice {
    fn format(&self) -> AssetFormat {
        AssetFormat::Webm
    }

    fn start(&mut self, chunks: Sender<Vec<u8>>) -> Result<()> {
        self.sink = Some(chunks);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.take() {
            for chunk in &self.chunks {
                let _ = sink.send(chunk.clone());
            }
        }
        Ok(())
    }
}

enum Access {
    Granted,
    Denied,
    Unsupported,
}

#[async_trait]
impl MediaAccess for Access {
    async fn request_microphone(
        &self,
    ) -> std::result::Result<Box<dyn CaptureDevice>, MediaAccessError> {
        match self {
            Access::Granted => Ok(Box::new(ScriptedDevice {
                chunks: vec![vec![1, 2], vec![3]],
                sink: None,
            })),
            Access::Denied => Err(MediaAccessError::PermissionDenied),
            Access::Unsupported => Err(MediaAccessError::Unsupported),
        }
    }
}

/// Returns a canned reply and remembers what it was asked.
struct CannedTranscriber {
    reply: Result<Option<String>>,
    seen: Mutex<Vec<(String, usize, TranscriptionOptions)>>,
}

impl CannedTranscriber {
    fn new(reply: Result<Option<String>>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TranscriptionService for CannedTranscriber {
    async fn transcribe(
        &self,
        asset: &AudioAsset,
        options: &TranscriptionOptions,
    ) -> Result<Option<String>> {
        self.seen
            .lock()
            .push((asset.file_name(), asset.bytes.len(), options.clone()));
        self.reply.clone()
    }
}

fn controller(
    access: Access,
    transcriber: Arc<CannedTranscriber>,
    settings: InMemorySettingsStore,
) -> ChatController {
    let transport = StreamTransport::new(|_| {
        let reply = Ok::<String, TransportError>("Entendido".to_string());
        futures::stream::iter(vec![reply]).boxed()
    });
    ChatControllerBuilder::new()
        .with_config(ControllerConfig::default())
        .with_transport(Arc::new(transport))
        .with_settings_store(Arc::new(settings))
        .with_media_access(Arc::new(access))
        .with_transcriber(transcriber)
        .build()
        .unwrap()
}

#[test]
fn test_subtitle_markup_is_stripped() {
    let raw = "WEBVTT\n\n00:00:00.000 --> 00:00:02.500\nHola mundo\n";
    assert_eq!(normalize_transcript(raw), "Hola mundo");
}

#[tokio::test]
async fn test_transcript_is_sent_as_user_message() {
    let transcriber = CannedTranscriber::new(Ok(Some(
        "WEBVTT\n\n00:00:00.000 --> 00:00:02.500\nHola mundo\n".to_string(),
    )));
    let controller = controller(Access::Granted, transcriber.clone(), InMemorySettingsStore::new());

    assert_eq!(controller.capture_state(), Some(CaptureState::Idle));
    controller.init_microphone().await.unwrap();
    assert_eq!(controller.capture_state(), Some(CaptureState::Ready));

    controller.start_recording().unwrap();
    assert_eq!(controller.capture_state(), Some(CaptureState::Recording));

    let outcome = controller.stop_recording().await.unwrap();
    assert_eq!(outcome, Some(ExchangeOutcome::Completed { message_id: Some(2) }));
    assert_eq!(controller.capture_state(), Some(CaptureState::Ready));

    let messages = controller.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "Hola mundo");
    assert_eq!(messages[1].content, "Entendido");
    assert_eq!(controller.conversation().await.unwrap().title, "Hola mundo");

    let seen = transcriber.seen.lock();
    assert_eq!(seen.len(), 1);
    let (file_name, size, options) = &seen[0];
    assert!(file_name.starts_with("file"));
    assert!(file_name.ends_with(".webm"));
    assert_eq!(*size, 3);
    assert_eq!(options.language, "es");
    assert_eq!(options.temperature, 0.0);
}

#[tokio::test]
async fn test_failed_submission_returns_to_ready() {
    let transcriber = CannedTranscriber::new(Err(ParleyError::TranscriptionError(
        "HTTP 500".into(),
    )));
    let controller = controller(Access::Granted, transcriber, InMemorySettingsStore::new());
    controller.init_microphone().await.unwrap();

    controller.start_recording().unwrap();
    let outcome = controller.stop_recording().await.unwrap();

    assert_eq!(outcome, None);
    assert_eq!(controller.capture_state(), Some(CaptureState::Ready));
    assert!(controller.messages().is_empty());
    assert!(controller.conversation().await.is_none());

    // A new recording can start right away
    controller.start_recording().unwrap();
    assert_eq!(controller.capture_state(), Some(CaptureState::Recording));
}

#[tokio::test]
async fn test_blank_transcript_is_not_sent() {
    let transcriber = CannedTranscriber::new(Ok(Some(
        "WEBVTT\n\n00:00:00.000 --> 00:00:01.000\n   \n".to_string(),
    )));
    let controller = controller(Access::Granted, transcriber, InMemorySettingsStore::new());
    controller.init_microphone().await.unwrap();

    assert_eq!(controller.toggle_recording().await.unwrap(), None);
    assert_eq!(controller.capture_state(), Some(CaptureState::Recording));
    assert_eq!(controller.toggle_recording().await.unwrap(), None);
    assert_eq!(controller.capture_state(), Some(CaptureState::Ready));
    assert!(controller.messages().is_empty());
}

#[tokio::test]
async fn test_settings_choose_transcription_options() {
    let settings = InMemorySettingsStore::new();
    settings.put(
        ChatSettings::new(3, "English practice")
            .with_language("en")
            .with_temperature(0.4),
    );
    let transcriber = CannedTranscriber::new(Ok(Some("Hello".to_string())));
    let controller = controller(Access::Granted, transcriber.clone(), settings);
    controller.bind_settings_group(Some(3)).await.unwrap();
    controller.init_microphone().await.unwrap();

    controller.start_recording().unwrap();
    controller.stop_recording().await.unwrap();

    let seen = transcriber.seen.lock();
    assert_eq!(seen[0].2.language, "en");
    assert_eq!(seen[0].2.temperature, 0.4);
}

#[tokio::test]
async fn test_permission_denied_shows_banner() {
    let transcriber = CannedTranscriber::new(Ok(None));
    let controller = controller(Access::Denied, transcriber, InMemorySettingsStore::new());

    let result = controller.init_microphone().await;
    assert!(matches!(result, Err(ParleyError::MediaAccessError(_))));
    assert_eq!(
        controller.error_banner().as_deref(),
        Some("Failed to access the microphone")
    );
    assert_eq!(controller.capture_state(), Some(CaptureState::Idle));
    assert!(matches!(
        controller.start_recording(),
        Err(ParleyError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_unsupported_environment_banner() {
    let transcriber = CannedTranscriber::new(Ok(None));
    let controller = controller(Access::Unsupported, transcriber, InMemorySettingsStore::new());

    assert!(controller.init_microphone().await.is_err());
    assert_eq!(
        controller.error_banner().as_deref(),
        Some("This environment does not support media device access")
    );
}

#[tokio::test]
async fn test_stop_without_recording_is_rejected() {
    let transcriber = CannedTranscriber::new(Ok(Some("unused".into())));
    let controller = controller(Access::Granted, transcriber.clone(), InMemorySettingsStore::new());
    controller.init_microphone().await.unwrap();

    assert!(matches!(
        controller.stop_recording().await,
        Err(ParleyError::InvalidState(_))
    ));
    assert!(transcriber.seen.lock().is_empty());
}
