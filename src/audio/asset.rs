use super::wav::pcm16_chunks_to_wav;
use crate::Result;
use chrono::Utc;
use uuid::Uuid;

/// Container of the captured chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFormat {
    /// Encoded container chunks; packaged by concatenation.
    Webm,
    /// Raw 16-bit little-endian PCM chunks; packaged into a WAV file.
    Wav { sample_rate: u32, channels: u16 },
}

impl AssetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AssetFormat::Webm => "webm",
            AssetFormat::Wav { .. } => "wav",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            AssetFormat::Webm => "audio/webm;codecs=opus",
            AssetFormat::Wav { .. } => "audio/wav",
        }
    }
}

/// One recording, ready to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioAsset {
    pub name: String,
    pub format: AssetFormat,
    pub bytes: Vec<u8>,
}

impl AudioAsset {
    pub fn new(name: impl Into<String>, format: AssetFormat, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            format,
            bytes,
        }
    }

    /// Merge buffered chunks into a single named asset.
    pub fn from_chunks(chunks: &[Vec<u8>], format: AssetFormat) -> Result<Self> {
        let bytes = match format {
            AssetFormat::Webm => chunks.concat(),
            AssetFormat::Wav {
                sample_rate,
                channels,
            } => pcm16_chunks_to_wav(chunks, sample_rate, channels)?,
        };
        Ok(Self::new(generate_name(), format, bytes))
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.format.extension())
    }

    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// `file<epoch millis><0..=99999>`
fn generate_name() -> String {
    let suffix = Uuid::new_v4().as_u128() % 100_000;
    format!("file{}{}", Utc::now().timestamp_millis(), suffix)
}
