//! Microphone capture, recording packaging and playback devices.

pub mod asset;
pub mod capture;
#[cfg(feature = "audio-io")]
pub mod input;
#[cfg(feature = "audio-io")]
pub mod output;
pub mod resampler;
pub mod wav;

pub use asset::{AssetFormat, AudioAsset};
pub use capture::{
    AudioCapturePipeline, CaptureDevice, CaptureState, MediaAccess, MediaAccessError,
};
#[cfg(feature = "audio-io")]
pub use input::{CpalCaptureDevice, CpalMediaAccess};
#[cfg(feature = "audio-io")]
pub use output::CpalAudioSink;
pub use resampler::{resample_audio, AudioResampler};
pub use wav::{decode_wav, encode_wav};
