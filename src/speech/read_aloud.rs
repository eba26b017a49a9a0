//! Read-aloud player
//!
//! `Idle → Loading → Playing → Idle`. The last synthesized audio is cached
//! under its speech identifier and replayed without a new request. Hosts
//! watch [`ReadAloud::subscribe`] to animate while audio plays.

use super::tts::{prepare_for_speech, speech_identifier, SpeechAudio, SpeechService, SpeechSettings};
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Playback device seam.
pub trait AudioSink: Send + Sync {
    /// Start playing; `on_finished` runs once playback reaches the end.
    fn play(&self, audio: &SpeechAudio, on_finished: Box<dyn FnOnce() + Send>) -> Result<()>;

    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAloudState {
    Idle,
    Loading,
    Playing,
}

struct Shared {
    state: ReadAloudState,
    cached: Option<(String, SpeechAudio)>,
    // Bumped on every start/stop so stale completions are ignored
    generation: u64,
}

pub struct ReadAloud {
    service: Arc<dyn SpeechService>,
    sink: Arc<dyn AudioSink>,
    shared: Arc<Mutex<Shared>>,
    playing: Arc<watch::Sender<bool>>,
}

impl ReadAloud {
    pub fn new(service: Arc<dyn SpeechService>, sink: Arc<dyn AudioSink>) -> Self {
        let (playing, _) = watch::channel(false);
        Self {
            service,
            sink,
            shared: Arc::new(Mutex::new(Shared {
                state: ReadAloudState::Idle,
                cached: None,
                generation: 0,
            })),
            playing: Arc::new(playing),
        }
    }

    pub fn state(&self) -> ReadAloudState {
        self.shared.lock().state
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }

    /// Identifier of the cached audio, if any.
    pub fn cached_identifier(&self) -> Option<String> {
        self.shared.lock().cached.as_ref().map(|(id, _)| id.clone())
    }

    /// Stop when playing, start otherwise. Ignored while loading.
    pub async fn toggle(&self, content: &str, settings: &SpeechSettings) -> Result<()> {
        match self.state() {
            ReadAloudState::Playing => {
                self.stop();
                Ok(())
            }
            ReadAloudState::Loading => {
                debug!("Read-aloud still loading; toggle ignored");
                Ok(())
            }
            ReadAloudState::Idle => self.play(content, settings).await,
        }
    }

    pub async fn play(&self, content: &str, settings: &SpeechSettings) -> Result<()> {
        let identifier = speech_identifier(content, settings);

        let (cached, generation) = {
            let mut shared = self.shared.lock();
            match shared.state {
                ReadAloudState::Loading => return Ok(()),
                ReadAloudState::Playing => {
                    self.sink.stop();
                    shared.generation += 1;
                    shared.state = ReadAloudState::Idle;
                }
                ReadAloudState::Idle => {}
            }

            let cached = shared
                .cached
                .as_ref()
                .filter(|(id, _)| *id == identifier)
                .map(|(_, audio)| audio.clone());
            if cached.is_none() {
                shared.state = ReadAloudState::Loading;
            }
            (cached, shared.generation)
        };

        let audio = match cached {
            Some(audio) => {
                debug!("Replaying cached speech {}", identifier);
                audio
            }
            None => {
                self.playing.send_replace(false);
                let _loading = LoadingGuard {
                    shared: &self.shared,
                    generation,
                };
                let text = prepare_for_speech(content);
                match self.service.synthesize(&text, settings).await {
                    Ok(audio) => {
                        let mut shared = self.shared.lock();
                        shared.cached = Some((identifier.clone(), audio.clone()));
                        if shared.generation != generation {
                            debug!("Read-aloud stopped while loading");
                            return Ok(());
                        }
                        shared.state = ReadAloudState::Idle;
                        audio
                    }
                    Err(e) => {
                        error!("Error fetching audio: {}", e);
                        let mut shared = self.shared.lock();
                        if shared.generation == generation {
                            shared.state = ReadAloudState::Idle;
                        }
                        return Err(e);
                    }
                }
            }
        };

        self.start_playback(audio)
    }

    fn start_playback(&self, audio: SpeechAudio) -> Result<()> {
        let generation = {
            let mut shared = self.shared.lock();
            shared.generation += 1;
            shared.state = ReadAloudState::Playing;
            shared.generation
        };
        self.playing.send_replace(true);

        let shared = Arc::clone(&self.shared);
        let playing = Arc::clone(&self.playing);
        let on_finished = Box::new(move || {
            let mut guard = shared.lock();
            if guard.generation == generation && guard.state == ReadAloudState::Playing {
                guard.state = ReadAloudState::Idle;
                drop(guard);
                playing.send_replace(false);
                debug!("Read-aloud finished");
            }
        });

        info!("Reading aloud {:.1}s of audio", audio.duration_secs());
        if let Err(e) = self.sink.play(&audio, on_finished) {
            error!("Audio playback failed: {}", e);
            self.reset_to_idle();
            return Err(e);
        }
        Ok(())
    }

    pub fn stop(&self) {
        let was_active = {
            let shared = self.shared.lock();
            shared.state != ReadAloudState::Idle
        };
        if was_active {
            self.sink.stop();
            self.reset_to_idle();
            info!("Read-aloud stopped");
        }
    }

    fn reset_to_idle(&self) {
        {
            let mut shared = self.shared.lock();
            shared.generation += 1;
            shared.state = ReadAloudState::Idle;
        }
        self.playing.send_replace(false);
    }
}

/// Drops a `Loading` state that its synthesis request never settled.
struct LoadingGuard<'a> {
    shared: &'a Mutex<Shared>,
    generation: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        if shared.generation == self.generation && shared.state == ReadAloudState::Loading {
            shared.state = ReadAloudState::Idle;
        }
    }
}
