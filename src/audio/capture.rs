//! Audio capture pipeline
//!
//! State machine: `Idle → Ready → Recording → Transcribing → Ready`.
//! The device session, recorder state and buffered chunks are owned here and
//! nowhere else. `Transcribing` covers the time between `stop` and the
//! settlement of `submit`, so only one asset is ever in flight.

use super::asset::{AssetFormat, AudioAsset};
use crate::transcription::{normalize_transcript, TranscriptionOptions, TranscriptionService};
use crate::{ParleyError, Result};
use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const MICROPHONE_ACCESS_FAILED: &str = "Failed to access the microphone";
pub const MEDIA_ACCESS_UNSUPPORTED: &str = "This environment does not support media device access";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Ready,
    Recording,
    Transcribing,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaAccessError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Media device access unsupported")]
    Unsupported,

    #[error("Microphone device error: {0}")]
    Device(String),
}

impl MediaAccessError {
    /// Text for the persistent inline banner.
    pub fn banner(&self) -> &'static str {
        match self {
            MediaAccessError::Unsupported => MEDIA_ACCESS_UNSUPPORTED,
            MediaAccessError::PermissionDenied | MediaAccessError::Device(_) => {
                MICROPHONE_ACCESS_FAILED
            }
        }
    }
}

/// Hosting environment's grant of a microphone handle.
#[async_trait]
pub trait MediaAccess: Send + Sync {
    async fn request_microphone(
        &self,
    ) -> std::result::Result<Box<dyn CaptureDevice>, MediaAccessError>;
}

/// A granted microphone session.
///
/// `start` begins delivering chunks on the channel; `stop` must deliver any
/// pending chunk before it returns.
pub trait CaptureDevice: Send {
    fn format(&self) -> AssetFormat;
    fn start(&mut self, chunks: Sender<Vec<u8>>) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

struct Session {
    state: CaptureState,
    device: Option<Box<dyn CaptureDevice>>,
    incoming: Option<Receiver<Vec<u8>>>,
    chunks: Vec<Vec<u8>>,
    banner: Option<String>,
}

pub struct AudioCapturePipeline {
    media: Arc<dyn MediaAccess>,
    transcriber: Arc<dyn TranscriptionService>,
    session: Mutex<Session>,
}

impl AudioCapturePipeline {
    pub fn new(media: Arc<dyn MediaAccess>, transcriber: Arc<dyn TranscriptionService>) -> Self {
        Self {
            media,
            transcriber,
            session: Mutex::new(Session {
                state: CaptureState::Idle,
                device: None,
                incoming: None,
                chunks: Vec::new(),
                banner: None,
            }),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.session.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    /// Media-access failure shown to the user, if any.
    pub fn banner(&self) -> Option<String> {
        self.session.lock().banner.clone()
    }

    /// Ask the environment for a microphone. `Idle → Ready` on success; on
    /// failure the banner is set and the pipeline stays `Idle`.
    pub async fn initialize(&self) -> Result<()> {
        if self.state() != CaptureState::Idle {
            debug!("Capture pipeline already initialized");
            return Ok(());
        }

        match self.media.request_microphone().await {
            Ok(device) => {
                let mut session = self.session.lock();
                if session.state != CaptureState::Idle {
                    return Ok(());
                }
                session.device = Some(device);
                session.state = CaptureState::Ready;
                session.banner = None;
                info!("Microphone granted");
                Ok(())
            }
            Err(e) => {
                error!("Failed to access the microphone: {}", e);
                let banner = e.banner();
                self.session.lock().banner = Some(banner.to_string());
                Err(ParleyError::MediaAccessError(banner.to_string()))
            }
        }
    }

    /// Begin recording. The device is started outside the session lock.
    pub fn start(&self) -> Result<()> {
        let mut device = {
            let mut session = self.session.lock();
            if session.state != CaptureState::Ready {
                return Err(ParleyError::InvalidState(format!(
                    "Cannot start recording while {:?}",
                    session.state
                )));
            }
            // Held out of the session until started; a concurrent start finds none
            session
                .device
                .take()
                .ok_or_else(|| ParleyError::InvalidState("No microphone session".into()))?
        };

        let (tx, rx) = unbounded();
        let started = device.start(tx);

        let mut guard = self.session.lock();
        let session = &mut *guard;
        session.device = Some(device);
        started?;

        session.incoming = Some(rx);
        session.chunks.clear();
        session.state = CaptureState::Recording;
        info!("Recording started");
        Ok(())
    }

    /// Stop recording and package every buffered chunk into one asset.
    ///
    /// The pipeline reads `Transcribing` while the device flushes, so a second
    /// stop or start is refused without waiting on the device.
    pub fn stop(&self) -> Result<AudioAsset> {
        let (mut device, incoming) = {
            let mut session = self.session.lock();
            if session.state != CaptureState::Recording {
                return Err(ParleyError::InvalidState(format!(
                    "Cannot stop recording while {:?}",
                    session.state
                )));
            }
            let Some(device) = session.device.take() else {
                session.state = CaptureState::Ready;
                return Err(ParleyError::InvalidState("No microphone session".into()));
            };
            session.state = CaptureState::Transcribing;
            (device, session.incoming.take())
        };

        if let Err(e) = device.stop() {
            warn!("Microphone did not stop cleanly: {}", e);
        }
        let format = device.format();

        let mut guard = self.session.lock();
        let session = &mut *guard;
        session.device = Some(device);
        if let Some(rx) = incoming {
            session.chunks.extend(rx.try_iter());
        }

        let packaged = AudioAsset::from_chunks(&session.chunks, format);
        session.chunks.clear();

        match packaged {
            Ok(asset) => {
                info!("Recording stopped: {} ({} bytes)", asset.file_name(), asset.bytes.len());
                Ok(asset)
            }
            Err(e) => {
                session.state = CaptureState::Ready;
                Err(e)
            }
        }
    }

    /// Send an asset for transcription and return the normalized transcript.
    ///
    /// Failures are logged, never raised; the pipeline always ends `Ready`,
    /// even when the returned future is dropped before it settles.
    pub async fn submit(&self, asset: AudioAsset, options: &TranscriptionOptions) -> Option<String> {
        if self.state() != CaptureState::Transcribing {
            warn!("Ignoring submit outside of a finished recording");
            return None;
        }

        let settle = SettleOnDrop(&self.session);
        debug!("Submitting {} with {:?}", asset.file_name(), options);
        let result = self.transcriber.transcribe(&asset, options).await;
        drop(settle);

        match result {
            Ok(Some(raw)) => {
                let transcript = normalize_transcript(&raw);
                if transcript.is_empty() {
                    info!("Transcript was empty after normalization");
                    None
                } else {
                    Some(transcript)
                }
            }
            Ok(None) => None,
            Err(e) => {
                error!("Failed to send recording: {}", e);
                None
            }
        }
    }

    pub async fn stop_and_transcribe(&self, options: &TranscriptionOptions) -> Result<Option<String>> {
        let asset = self.stop()?;
        Ok(self.submit(asset, options).await)
    }
}

/// Returns a `Transcribing` session to `Ready` when dropped.
struct SettleOnDrop<'a>(&'a Mutex<Session>);

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        let mut session = self.0.lock();
        if session.state == CaptureState::Transcribing {
            session.state = CaptureState::Ready;
        }
    }
}
