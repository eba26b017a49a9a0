use crate::{ParleyError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

const CHUNK_FRAMES: usize = 1024;

/// Sample-rate converter for interleaved audio.
///
/// Used to bring device capture down to the transcription rate and to bring
/// synthesized speech up to the output device rate.
pub struct AudioResampler {
    inner: SincFixedIn<f32>,
    ratio: f64,
    channels: usize,
}

impl AudioResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(ParleyError::ConfigError(
                "Sample rates must be greater than 0".into(),
            ));
        }
        if channels == 0 {
            return Err(ParleyError::ConfigError(
                "Number of channels must be greater than 0".into(),
            ));
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, channels as usize)
            .map_err(|e| {
                ParleyError::AudioProcessingError(format!("Failed to create resampler: {}", e))
            })?;

        debug!(
            "Created resampler: {} Hz -> {} Hz, {} channels",
            input_rate, output_rate, channels
        );

        Ok(Self {
            inner,
            ratio,
            channels: channels as usize,
        })
    }

    /// Resample interleaved samples. The final partial chunk is zero padded
    /// and the padding's share of the output is dropped.
    pub fn resample(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let total_frames = input.len() / self.channels;
        let mut output =
            Vec::with_capacity((total_frames as f64 * self.ratio * 1.1) as usize * self.channels);

        let mut offset = 0;
        while offset < total_frames {
            let frames = (total_frames - offset).min(CHUNK_FRAMES);

            let mut planar = vec![vec![0.0f32; CHUNK_FRAMES]; self.channels];
            for frame in 0..frames {
                let base = (offset + frame) * self.channels;
                for (ch, lane) in planar.iter_mut().enumerate() {
                    lane[frame] = input[base + ch];
                }
            }

            let processed = self.inner.process(&planar, None).map_err(|e| {
                ParleyError::AudioProcessingError(format!("Resampling failed: {}", e))
            })?;

            let produced = processed[0].len();
            let keep = if frames < CHUNK_FRAMES {
                ((frames as f64) * self.ratio).ceil() as usize
            } else {
                produced
            };

            for frame in 0..keep.min(produced) {
                for lane in &processed {
                    output.push(lane[frame]);
                }
            }

            offset += frames;
        }

        Ok(output)
    }
}

/// One-shot resampling; returns the input unchanged when rates match.
pub fn resample_audio(
    input: &[f32],
    input_rate: u32,
    output_rate: u32,
    channels: u16,
) -> Result<Vec<f32>> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }
    AudioResampler::new(input_rate, output_rate, channels)?.resample(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameters() {
        assert!(AudioResampler::new(0, 48000, 1).is_err());
        assert!(AudioResampler::new(16000, 0, 1).is_err());
        assert!(AudioResampler::new(16000, 48000, 0).is_err());
    }

    #[test]
    fn test_upsampling_grows_output() {
        let input: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.01).sin()).collect();
        let output = resample_audio(&input, 16000, 48000, 1).unwrap();
        assert!(output.len() > input.len() * 2);
    }

    #[test]
    fn test_downsampling_shrinks_output() {
        let input: Vec<f32> = (0..3072).map(|i| (i as f32 * 0.01).sin()).collect();
        let output = resample_audio(&input, 48000, 16000, 1).unwrap();
        assert!(!output.is_empty());
        assert!(output.len() < input.len());
    }

    #[test]
    fn test_same_rate_is_passthrough() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_audio(&input, 24000, 24000, 1).unwrap(), input);
    }

    #[test]
    fn test_empty_input() {
        let mut resampler = AudioResampler::new(16000, 48000, 1).unwrap();
        assert!(resampler.resample(&[]).unwrap().is_empty());
    }
}
