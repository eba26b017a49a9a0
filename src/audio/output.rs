//! Speech playback through cpal
//!
//! Every `play` opens the default output device on its own thread, resamples
//! the speech to the device rate and feeds the stream until the buffer runs
//! dry or `stop` is called.

use super::resampler::resample_audio;
use crate::speech::{AudioSink, SpeechAudio};
use crate::{ParleyError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Default)]
pub struct CpalAudioSink {
    // Bumped by every play/stop; a playback thread exits once it is stale
    generation: Arc<AtomicU64>,
    playing: Arc<AtomicBool>,
}

impl CpalAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn open_output() -> Result<(cpal::Device, cpal::StreamConfig)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| ParleyError::AudioDeviceError("No output device available".into()))?;

        info!(
            "Using output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = device
            .default_output_config()
            .map_err(|e| ParleyError::AudioDeviceError(format!("Failed to get output config: {}", e)))?
            .into();
        Ok((device, config))
    }

    fn run(
        samples: Vec<f32>,
        source_rate: u32,
        generation: u64,
        current: Arc<AtomicU64>,
        playing: Arc<AtomicBool>,
        on_finished: Box<dyn FnOnce() + Send>,
    ) {
        let played = match Self::play_blocking(samples, source_rate, generation, &current) {
            Ok(()) => true,
            Err(e) => {
                error!("Speech playback failed: {}", e);
                false
            }
        };

        if current.load(Ordering::SeqCst) == generation {
            playing.store(false, Ordering::SeqCst);
            if played {
                on_finished();
            }
        }
    }

    fn play_blocking(samples: Vec<f32>, source_rate: u32, generation: u64, current: &AtomicU64) -> Result<()> {
        let (device, config) = Self::open_output()?;
        let channels = config.channels as usize;
        let device_rate = config.sample_rate.0;

        let samples = resample_audio(&samples, source_rate, device_rate, 1)?;
        let queue = Arc::new(Mutex::new(VecDeque::from(samples)));
        let feed = Arc::clone(&queue);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = feed.lock();
                    for frame in data.chunks_mut(channels) {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                |err| error!("Audio output stream error: {}", err),
                None,
            )
            .map_err(|e| ParleyError::AudioDeviceError(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| ParleyError::AudioDeviceError(format!("Failed to start output stream: {}", e)))?;

        while !queue.lock().is_empty() {
            if current.load(Ordering::SeqCst) != generation {
                debug!("Playback interrupted");
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        // Let the device drain its last buffer
        std::thread::sleep(POLL_INTERVAL * 5);
        Ok(())
    }
}

impl AudioSink for CpalAudioSink {
    fn play(&self, audio: &SpeechAudio, on_finished: Box<dyn FnOnce() + Send>) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.playing.store(true, Ordering::SeqCst);

        let samples = audio.samples.clone();
        let source_rate = audio.sample_rate;
        let current = Arc::clone(&self.generation);
        let playing = Arc::clone(&self.playing);

        std::thread::Builder::new()
            .name("parley-playback".into())
            .spawn(move || Self::run(samples, source_rate, generation, current, playing, on_finished))
            .map_err(|e| ParleyError::AudioDeviceError(format!("Failed to spawn playback thread: {}", e)))?;
        Ok(())
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_without_playback() {
        let sink = CpalAudioSink::new();
        assert!(!sink.is_playing());
        sink.stop();
        assert!(!sink.is_playing());
    }
}
