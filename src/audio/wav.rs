use crate::{ParleyError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use tracing::debug;

fn spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Encode f32 samples (-1.0..=1.0) as an in-memory 16-bit WAV file
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec(sample_rate, channels))
        .map_err(|e| ParleyError::AudioProcessingError(format!("Failed to create WAV writer: {}", e)))?;

    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| ParleyError::AudioProcessingError(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| ParleyError::AudioProcessingError(format!("Failed to finalize WAV data: {}", e)))?;

    Ok(cursor.into_inner())
}

/// Wrap raw 16-bit little-endian PCM chunks in a WAV header
pub fn pcm16_chunks_to_wav(chunks: &[Vec<u8>], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec(sample_rate, channels))
        .map_err(|e| ParleyError::AudioProcessingError(format!("Failed to create WAV writer: {}", e)))?;

    let mut pending: Option<u8> = None;
    for byte in chunks.iter().flatten().copied() {
        match pending.take() {
            None => pending = Some(byte),
            Some(low) => writer
                .write_sample(i16::from_le_bytes([low, byte]))
                .map_err(|e| ParleyError::AudioProcessingError(format!("Failed to write sample: {}", e)))?,
        }
    }
    if pending.is_some() {
        debug!("Dropping trailing odd byte from PCM stream");
    }

    writer
        .finalize()
        .map_err(|e| ParleyError::AudioProcessingError(format!("Failed to finalize WAV data: {}", e)))?;

    Ok(cursor.into_inner())
}

/// Decode an in-memory WAV file
///
/// # Returns
/// * Tuple of (samples, sample_rate, channels)
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32, u16)> {
    let mut reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| ParleyError::AudioProcessingError(format!("Failed to open WAV data: {}", e)))?;

    let spec = reader.spec();
    debug!(
        "Decoding WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let read_err = |e: hound::Error| ParleyError::AudioProcessingError(format!("Failed to read sample: {}", e));

    let samples: Result<Vec<f32>> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader.samples::<f32>().map(|s| s.map_err(read_err)).collect(),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32).map_err(read_err))
            .collect(),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8_388_608.0).map_err(read_err))
            .collect(),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / i32::MAX as f32).map_err(read_err))
            .collect(),
        (_, bits) => {
            return Err(ParleyError::AudioProcessingError(format!(
                "Unsupported bit depth: {}",
                bits
            )))
        }
    };

    Ok((samples?, spec.sample_rate, spec.channels))
}

/// Convert f32 samples to 16-bit little-endian PCM bytes
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes())
        .collect()
}

/// Average interleaved frames down to mono
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_encode_decode_wav() {
        let sample_rate = 16000;
        let samples: Vec<f32> = (0..1600)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect();

        let bytes = encode_wav(&samples, sample_rate, 1).unwrap();
        let (decoded, rate, channels) = decode_wav(&bytes).unwrap();

        assert_eq!(rate, sample_rate);
        assert_eq!(channels, 1);
        assert_eq!(decoded.len(), samples.len());
        for (original, read) in samples.iter().zip(decoded.iter()) {
            assert!((original - read).abs() < 0.001);
        }
    }

    #[test]
    fn test_pcm_chunks_split_across_boundaries() {
        let pcm = f32_to_pcm16_le(&[0.25, -0.5, 0.75]);
        // Split mid-sample to exercise the carry-over byte
        let chunks = vec![pcm[..3].to_vec(), pcm[3..].to_vec()];

        let bytes = pcm16_chunks_to_wav(&chunks, 8000, 1).unwrap();
        let (decoded, rate, _) = decode_wav(&bytes).unwrap();

        assert_eq!(rate, 8000);
        assert_eq!(decoded.len(), 3);
        assert!((decoded[1] + 0.5).abs() < 0.001);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_wav(b"not a wav file").is_err());
    }

    #[test]
    fn test_downmix() {
        let stereo = vec![0.5, 0.3, 0.7, 0.1];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.4).abs() < 0.001);
        assert!((mono[1] - 0.4).abs() < 0.001);
        assert_eq!(downmix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }
}
