//! Microphone capture through cpal
//!
//! `cpal::Stream` is not `Send`, so each recording owns its stream on a
//! dedicated thread driven over a control channel.

use super::asset::AssetFormat;
use super::capture::{CaptureDevice, MediaAccess, MediaAccessError};
use super::wav::{downmix_to_mono, f32_to_pcm16_le};
use crate::{ParleyError, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Grants the host's default input device.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalMediaAccess;

#[async_trait]
impl MediaAccess for CpalMediaAccess {
    async fn request_microphone(
        &self,
    ) -> std::result::Result<Box<dyn CaptureDevice>, MediaAccessError> {
        let device = tokio::task::spawn_blocking(CpalCaptureDevice::open)
            .await
            .map_err(|e| MediaAccessError::Device(format!("Device probe failed: {}", e)))??;
        Ok(Box::new(device))
    }
}

enum Control {
    Stop(Sender<()>),
}

struct Worker {
    control: Sender<Control>,
    handle: JoinHandle<()>,
}

pub struct CpalCaptureDevice {
    sample_rate: u32,
    channels: u16,
    worker: Option<Worker>,
}

impl CpalCaptureDevice {
    /// Probe the default input device.
    pub fn open() -> std::result::Result<Self, MediaAccessError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(MediaAccessError::Unsupported)?;

        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = device
            .default_input_config()
            .map_err(|e| MediaAccessError::Device(format!("Failed to get input config: {}", e)))?;

        Ok(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            worker: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn run(
        chunks: Sender<Vec<u8>>,
        ready: Sender<Result<()>>,
        control: crossbeam_channel::Receiver<Control>,
    ) {
        let stream = match Self::build_stream(chunks) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        // Block until told to stop; dropping the stream ends the callbacks
        let ack = match control.recv() {
            Ok(Control::Stop(ack)) => Some(ack),
            Err(_) => None,
        };
        drop(stream);
        debug!("Input stream closed");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn build_stream(chunks: Sender<Vec<u8>>) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| ParleyError::AudioDeviceError("No input device available".into()))?;
        let config: cpal::StreamConfig = device
            .default_input_config()
            .map_err(|e| ParleyError::AudioDeviceError(format!("Failed to get input config: {}", e)))?
            .into();
        let channels = config.channels as usize;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix_to_mono(data, channels);
                    if chunks.send(f32_to_pcm16_le(&mono)).is_err() {
                        debug!("Chunk receiver closed");
                    }
                },
                |err| error!("Audio input stream error: {}", err),
                None,
            )
            .map_err(|e| ParleyError::AudioDeviceError(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| ParleyError::AudioDeviceError(format!("Failed to start input stream: {}", e)))?;
        Ok(stream)
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn format(&self) -> AssetFormat {
        AssetFormat::Wav {
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }

    fn start(&mut self, chunks: Sender<Vec<u8>>) -> Result<()> {
        if self.worker.is_some() {
            warn!("Already recording");
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded(1);
        let (control_tx, control_rx) = bounded(1);
        let handle = std::thread::Builder::new()
            .name("parley-capture".into())
            .spawn(move || Self::run(chunks, ready_tx, control_rx))
            .map_err(|e| ParleyError::AudioDeviceError(format!("Failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker {
                    control: control_tx,
                    handle,
                });
                info!(
                    "Started audio capture ({} Hz, {} channel(s) mixed to mono)",
                    self.sample_rate, self.channels
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(ParleyError::AudioDeviceError(
                "Capture thread exited before starting".into(),
            )),
        }
    }

    fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = bounded(1);
        if worker.control.send(Control::Stop(ack_tx)).is_err() {
            return Err(ParleyError::AudioDeviceError("Capture thread already gone".into()));
        }
        if ack_rx.recv_timeout(STOP_TIMEOUT).is_err() {
            return Err(ParleyError::AudioDeviceError(
                "Capture thread did not acknowledge stop".into(),
            ));
        }
        let _ = worker.handle.join();
        info!("Stopped audio capture");
        Ok(())
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        let _ = CaptureDevice::stop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_capture_cycle_when_device_present() {
        // Skips on machines without an input device
        let Ok(mut device) = CpalCaptureDevice::open() else {
            return;
        };
        assert!(device.sample_rate() > 0);
        assert!(matches!(device.format(), AssetFormat::Wav { channels: 1, .. }));

        let (tx, _rx) = unbounded();
        if device.start(tx).is_ok() {
            assert!(device.stop().is_ok());
        }
    }
}
