//! Chat controller
//!
//! Wires the stream assembler, conversation synchronizer, capture pipeline
//! and read-aloud player around one message list:
//!
//! ```text
//! text / transcript -> start conversation -> append user message
//!     -> transport streams fragments -> assembler folds them -> persist
//! ```
//!
//! The message list lives behind a short-lived lock that is never held
//! across an await. Exchanges are single-flight: typed input is refused
//! while one runs, transcripts wait for it to settle.

use super::config::{ControllerConfig, HistoryMode};
use crate::audio::{AudioCapturePipeline, CaptureState, MediaAccess};
use crate::conversation::{
    first_non_empty, Conversation, ConversationSeed, ConversationStore, ConversationSynchronizer,
    InMemoryConversationStore, InstructionSources, SyncOutcome,
};
use crate::messages::{FileRef, Message, MessageList, MessageType, Role};
use crate::notify::{Notifier, TracingNotifier};
use crate::quote::{quote_selection, InputBuffer};
use crate::settings::{ChatSettings, InMemorySettingsStore, SettingsStore, SettingsWatcher};
use crate::speech::{AudioSink, HttpSpeechClient, ReadAloud, SpeechService, SpeechSettings};
use crate::stream::{
    ChatTransport, CompletionRequest, ExchangeContext, StreamAssembler, StreamState, TransportError,
};
use crate::transcription::{HttpTranscriptionClient, TranscriptionOptions, TranscriptionService};
use crate::{ParleyError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RETRY_HINT: &str = "Please try again.";
const NOT_FOUND_TITLE: &str = "Conversation not found";

/// How an exchange ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// Terminal signal processed. `message_id` is the completed reply, if the
    /// exchange produced one.
    Completed { message_id: Option<u64> },
    /// Classified transport failure, shown as an error reply.
    ClientError { message_id: u64, reason: String },
    Cancelled,
    /// Unclassified failure, handed to the notifier.
    Failed { reason: String },
}

struct ControllerState {
    messages: MessageList,
    assembler: StreamAssembler,
    bound_group: Option<i64>,
    chat_settings: Option<ChatSettings>,
    input: InputBuffer,
}

pub struct ChatController {
    config: ControllerConfig,
    transport: Arc<dyn ChatTransport>,
    settings_store: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<ControllerState>,
    sync: AsyncMutex<ConversationSynchronizer>,
    exchange: AsyncMutex<()>,
    cancel: Mutex<Option<CancellationToken>>,
    capture: Option<Arc<AudioCapturePipeline>>,
    read_aloud: Option<Arc<ReadAloud>>,
}

impl ChatController {
    pub fn builder(transport: Arc<dyn ChatTransport>) -> ChatControllerBuilder {
        ChatControllerBuilder::new().with_transport(transport)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // ---- accessors ----

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.to_vec()
    }

    pub fn stream_state(&self) -> StreamState {
        self.state.lock().assembler.state().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().assembler.is_loading()
    }

    pub fn pending_input(&self) -> String {
        self.state.lock().input.text().to_string()
    }

    pub fn bound_group(&self) -> Option<i64> {
        self.state.lock().bound_group
    }

    pub async fn conversation(&self) -> Option<Conversation> {
        self.sync.lock().await.active().cloned()
    }

    /// Bound settings, or the fallback used when no group is bound.
    pub fn effective_settings(&self) -> ChatSettings {
        let state = self.state.lock();
        state
            .chat_settings
            .clone()
            .unwrap_or_else(|| ChatSettings::fallback(self.effective_model_locked(&state)))
    }

    /// Bound settings model, then the user's model, then the default.
    pub fn effective_model(&self) -> String {
        self.effective_model_locked(&self.state.lock())
    }

    // ---- sending ----

    /// Send typed input. Refused with [`ParleyError::ExchangeInProgress`]
    /// while another exchange runs.
    pub async fn send_text(&self, text: &str, attachments: Vec<FileRef>) -> Result<ExchangeOutcome> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(ParleyError::InvalidInput("Message is empty".into()));
        }
        let slot = self
            .exchange
            .try_lock()
            .map_err(|_| ParleyError::ExchangeInProgress)?;
        self.run_send(text, attachments, slot).await
    }

    /// Send whatever is staged in the input buffer.
    pub async fn send_pending_input(&self) -> Result<ExchangeOutcome> {
        let text = self.pending_input();
        self.send_text(&text, Vec::new()).await
    }

    /// Send a transcript; waits for an in-flight exchange to settle first.
    pub async fn send_transcript(&self, transcript: &str) -> Result<ExchangeOutcome> {
        if transcript.trim().is_empty() {
            return Err(ParleyError::InvalidInput("Transcript is empty".into()));
        }
        let slot = self.exchange.lock().await;
        self.run_send(transcript, Vec::new(), slot).await
    }

    async fn run_send(
        &self,
        text: &str,
        attachments: Vec<FileRef>,
        _slot: AsyncMutexGuard<'_, ()>,
    ) -> Result<ExchangeOutcome> {
        let record = {
            let seed = self.conversation_seed(text, &attachments);
            self.sync.lock().await.start_conversation(seed).await?
        };

        let request = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.assembler.begin_exchange()?;
            let id = state
                .messages
                .append(Role::User, MessageType::Normal, text, attachments);
            state.input.clear();
            debug!("Appended user message {} to conversation {}", id, record.id);
            self.build_request(state, &record)
        };

        self.persist().await;
        Ok(self.run_exchange(request).await)
    }

    fn conversation_seed(&self, text: &str, attachments: &[FileRef]) -> ConversationSeed {
        let state = self.state.lock();
        ConversationSeed {
            message: text.to_string(),
            attachments: attachments.to_vec(),
            group_id: state.bound_group,
            model_id: self.effective_model_locked(&state),
            instructions: InstructionSources {
                conversation: None,
                settings: state.chat_settings.as_ref().and_then(|s| s.instructions.clone()),
                user: self.config.user.instructions.clone(),
                global_default: self.config.default_system_prompt.clone(),
                fallback: self.config.default_instructions.clone(),
            },
        }
    }

    fn effective_model_locked(&self, state: &ControllerState) -> String {
        first_non_empty([
            state.chat_settings.as_ref().and_then(|s| s.model.as_deref()),
            self.config.user.model.as_deref(),
            Some(self.config.default_model.as_str()),
        ])
    }

    fn build_request(&self, state: &ControllerState, record: &Conversation) -> CompletionRequest {
        let system_prompt = first_non_empty([
            Some(record.system_prompt.as_str()),
            state.chat_settings.as_ref().and_then(|s| s.instructions.as_deref()),
            self.config.user.instructions.as_deref(),
            Some(self.config.default_system_prompt.as_str()),
            Some(self.config.default_instructions.as_str()),
        ]);

        let mut messages = vec![Message::system(system_prompt)];
        match self.config.history {
            HistoryMode::Full => messages.extend(
                state
                    .messages
                    .as_slice()
                    .iter()
                    .filter(|m| !m.is_error())
                    .cloned(),
            ),
            HistoryMode::LatestOnly => messages.extend(state.messages.last().cloned()),
        }

        let settings = state
            .chat_settings
            .clone()
            .unwrap_or_else(|| ChatSettings::fallback(self.effective_model_locked(state)));

        CompletionRequest {
            settings,
            messages,
            context: ExchangeContext {
                is_first_message: state.assembler.state().is_first_message,
                user_name: self.config.user.name.clone(),
                topic: self.config.topic.clone(),
            },
        }
    }

    async fn run_exchange(&self, request: CompletionRequest) -> ExchangeOutcome {
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let (tx, rx) = mpsc::channel(self.config.fragment_buffer);
        let transport = self.transport.stream_completion(request, tx, cancel.clone());
        let consume = async {
            let mut rx = rx;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => {
                        let Some(fragment) = next else { break };
                        let terminal = fragment.is_terminal;
                        {
                            let mut guard = self.state.lock();
                            let state = &mut *guard;
                            state.assembler.handle_fragment(&mut state.messages, fragment);
                        }
                        self.persist().await;
                        if terminal {
                            break;
                        }
                    }
                }
            }
        };

        let (result, ()) = tokio::join!(transport, consume);
        *self.cancel.lock() = None;

        let cancelled = cancel.is_cancelled() || matches!(result, Err(TransportError::Cancelled));
        let outcome = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let outcome = match result {
                Ok(_) if !cancelled => {
                    state.assembler.finish(&state.messages, true);
                    let trailing = state.messages.last().map(|m| m.id);
                    let message_id = state
                        .assembler
                        .state()
                        .last_completed_message_id
                        .filter(|id| Some(*id) == trailing);
                    ExchangeOutcome::Completed { message_id }
                }
                Ok(_) | Err(TransportError::Cancelled) => {
                    info!("Exchange cancelled");
                    ExchangeOutcome::Cancelled
                }
                Err(TransportError::Client(reason)) => {
                    warn!("Transport reported: {}", reason);
                    let message_id = state
                        .assembler
                        .fail_with_client_error(&mut state.messages, &reason);
                    ExchangeOutcome::ClientError { message_id, reason }
                }
                Err(TransportError::Unexpected(reason)) => {
                    error!("Exchange failed: {}", reason);
                    ExchangeOutcome::Failed { reason }
                }
            };

            // Terminal bookkeeping exactly once, whatever happened above
            state.assembler.finish(&state.messages, false);
            state.assembler.end_exchange();
            outcome
        };

        if let ExchangeOutcome::Failed { reason } = &outcome {
            self.notifier.unexpected_error(reason, RETRY_HINT);
        }

        self.persist().await;

        if let ExchangeOutcome::Completed {
            message_id: Some(id),
        } = &outcome
        {
            if self.config.speech.auto_play {
                self.spawn_read_aloud(*id);
            }
        }

        outcome
    }

    /// Signal the in-flight exchange to stop. Returns `false` when idle.
    pub fn cancel_current(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                info!("Cancellation requested");
                true
            }
            None => false,
        }
    }

    async fn persist(&self) -> Option<SyncOutcome> {
        let snapshot = self.state.lock().messages.clone();
        match self.sync.lock().await.observe(&snapshot).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Failed to persist conversation: {}", e);
                None
            }
        }
    }

    // ---- conversation lifecycle ----

    /// Cancel any exchange and start over with an empty list.
    pub async fn new_conversation(&self) {
        self.cancel_current();
        let _slot = self.exchange.lock().await;
        self.reset_conversation().await;
    }

    async fn reset_conversation(&self) {
        {
            let mut state = self.state.lock();
            state.messages.clear();
            state.input.clear();
            state.assembler.reset();
        }
        self.persist().await;
        info!("Started a new conversation");
    }

    /// Load a stored conversation and make it the live one.
    pub async fn open_conversation(&self, id: i64) -> Result<()> {
        self.cancel_current();
        let _slot = self.exchange.lock().await;

        let store = Arc::clone(self.sync.lock().await.store());
        let Some(record) = store.get_conversation_by_id(id).await? else {
            let error = ParleyError::ConversationNotFound(id);
            self.notifier.error(&error.to_string(), NOT_FOUND_TITLE);
            self.reset_conversation().await;
            return Err(error);
        };

        let messages = store.get_messages(&record).await?;
        if messages.is_empty() {
            warn!("Possible state problem: conversation {} has no messages", id);
            self.reset_conversation().await;
            return Ok(());
        }

        let list = MessageList::from_messages(messages);
        {
            let mut state = self.state.lock();
            state.messages = list.clone();
            state.input.clear();
            state.assembler.clear_completion();
        }
        self.sync.lock().await.bind(record, &list);
        info!("Opened conversation {} ({} messages)", id, list.len());
        Ok(())
    }

    // ---- settings ----

    /// Bind (or with `None`, unbind) a settings group.
    pub async fn bind_settings_group(&self, group_id: Option<i64>) -> Result<()> {
        self.state.lock().bound_group = group_id;
        match group_id {
            Some(group_id) => self.refresh_settings(group_id).await,
            None => {
                self.state.lock().chat_settings = None;
                Ok(())
            }
        }
    }

    async fn refresh_settings(&self, group_id: i64) -> Result<()> {
        let fetched = self.settings_store.chat_settings(group_id).await.map_err(|e| {
            error!("Failed to fetch chat settings: {}", e);
            e
        })?;

        let mut state = self.state.lock();
        // Ignore a result for a group that was unbound meanwhile
        if state.bound_group == Some(group_id) {
            if fetched.is_none() {
                warn!("No chat settings for group {}", group_id);
            }
            state.chat_settings = fetched;
            debug!("Chat settings refreshed for group {}", group_id);
        }
        Ok(())
    }

    /// Subscribe to settings changes. Dropping the watcher unsubscribes.
    pub fn watch_settings(self: &Arc<Self>) -> SettingsWatcher {
        let mut events = self.settings_store.subscribe();
        let controller = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            loop {
                let concerns_bound = match events.recv().await {
                    Ok(event) => controller
                        .upgrade()
                        .map(|c| (event.concerns(c.bound_group()), c)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} settings notifications", skipped);
                        controller.upgrade().map(|c| (true, c))
                    }
                    Err(RecvError::Closed) => None,
                };

                let Some((refresh, controller)) = concerns_bound else {
                    break;
                };
                if let (true, Some(group_id)) = (refresh, controller.bound_group()) {
                    let _ = controller.refresh_settings(group_id).await;
                }
            }
            debug!("Settings watcher stopped");
        });

        SettingsWatcher::new(task)
    }

    // ---- voice input ----

    fn capture(&self) -> Result<&Arc<AudioCapturePipeline>> {
        self.capture
            .as_ref()
            .ok_or_else(|| ParleyError::InvalidState("No microphone configured".into()))
    }

    pub fn capture_state(&self) -> Option<CaptureState> {
        self.capture.as_ref().map(|c| c.state())
    }

    /// Media-access banner text, if access failed.
    pub fn error_banner(&self) -> Option<String> {
        self.capture.as_ref().and_then(|c| c.banner())
    }

    pub async fn init_microphone(&self) -> Result<()> {
        self.capture()?.initialize().await
    }

    pub fn start_recording(&self) -> Result<()> {
        self.capture()?.start()
    }

    /// Stop recording, transcribe and send the transcript.
    ///
    /// Returns `Ok(None)` when nothing was sent; transcription failures are
    /// logged and never surface here.
    pub async fn stop_recording(&self) -> Result<Option<ExchangeOutcome>> {
        let capture = Arc::clone(self.capture()?);
        let options = self.transcription_options();
        let Some(transcript) = capture.stop_and_transcribe(&options).await? else {
            return Ok(None);
        };
        info!("Sending transcript ({} chars)", transcript.len());
        self.send_transcript(&transcript).await.map(Some)
    }

    pub async fn toggle_recording(&self) -> Result<Option<ExchangeOutcome>> {
        if self.capture()?.is_recording() {
            self.stop_recording().await
        } else {
            self.start_recording().map(|()| None)
        }
    }

    fn transcription_options(&self) -> TranscriptionOptions {
        let state = self.state.lock();
        let settings = state.chat_settings.as_ref();
        TranscriptionOptions::resolve(
            settings.and_then(|s| s.language.as_deref()),
            settings.and_then(|s| s.temperature),
            &self.config.transcription.default_options(),
        )
    }

    // ---- selection quote ----

    /// Stage a quoted selection in the pending input. Returns `false` for a
    /// blank selection.
    pub fn stage_quote(&self, selection: &str) -> bool {
        match quote_selection(selection) {
            Some(quoted) => {
                self.state.lock().input.paste(&quoted);
                true
            }
            None => false,
        }
    }

    // ---- read-aloud ----

    fn speech_settings(&self) -> SpeechSettings {
        let user = &self.config.user;
        SpeechSettings::from_user(
            user.speech_model.as_deref(),
            user.speech_voice.as_deref(),
            user.speech_speed,
        )
    }

    fn message_content(&self, message_id: u64) -> Result<String> {
        self.state
            .lock()
            .messages
            .get(message_id)
            .map(|m| m.content.clone())
            .ok_or_else(|| ParleyError::InvalidInput(format!("No message {}", message_id)))
    }

    /// Toggle read-aloud for one message.
    pub async fn read_aloud(&self, message_id: u64) -> Result<()> {
        let player = self
            .read_aloud
            .as_ref()
            .ok_or_else(|| ParleyError::InvalidState("Read-aloud is not configured".into()))?;
        let content = self.message_content(message_id)?;
        player.toggle(&content, &self.speech_settings()).await
    }

    pub fn stop_read_aloud(&self) {
        if let Some(player) = &self.read_aloud {
            player.stop();
        }
    }

    pub fn is_audio_playing(&self) -> bool {
        self.read_aloud.as_ref().is_some_and(|p| p.is_playing())
    }

    /// "Audio playing" updates for the host, if read-aloud is configured.
    pub fn subscribe_audio_playing(&self) -> Option<watch::Receiver<bool>> {
        self.read_aloud.as_ref().map(|p| p.subscribe())
    }

    fn spawn_read_aloud(&self, message_id: u64) {
        let Some(player) = self.read_aloud.clone() else {
            return;
        };
        let Ok(content) = self.message_content(message_id) else {
            return;
        };
        let settings = self.speech_settings();
        tokio::spawn(async move {
            if let Err(e) = player.play(&content, &settings).await {
                warn!("Auto read-aloud failed: {}", e);
            }
        });
    }
}

/// Builder for [`ChatController`]. Only the transport is required; stores
/// default to in-memory ones and notifications go to the log.
#[derive(Default)]
pub struct ChatControllerBuilder {
    config: ControllerConfig,
    transport: Option<Arc<dyn ChatTransport>>,
    conversation_store: Option<Arc<dyn ConversationStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    media: Option<Arc<dyn MediaAccess>>,
    transcriber: Option<Arc<dyn TranscriptionService>>,
    speech: Option<Arc<dyn SpeechService>>,
    sink: Option<Arc<dyn AudioSink>>,
}

impl ChatControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversation_store = Some(store);
        self
    }

    pub fn with_settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Enable voice input. Without an explicit transcriber the HTTP client
    /// from the configuration is used.
    pub fn with_media_access(mut self, media: Arc<dyn MediaAccess>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn TranscriptionService>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Enable read-aloud through `sink`. Without an explicit speech service
    /// the HTTP client from the configuration is used.
    pub fn with_audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_speech_service(mut self, speech: Arc<dyn SpeechService>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn build(self) -> Result<ChatController> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| ParleyError::ConfigError("A chat transport is required".into()))?;

        let conversation_store = self
            .conversation_store
            .unwrap_or_else(|| Arc::new(InMemoryConversationStore::new()));
        let settings_store = self
            .settings_store
            .unwrap_or_else(|| Arc::new(InMemorySettingsStore::new()));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));

        let capture = match self.media {
            Some(media) => {
                let transcriber = match self.transcriber {
                    Some(transcriber) => transcriber,
                    None => Arc::new(HttpTranscriptionClient::with_timeout(
                        self.config.transcription.endpoint.clone(),
                        self.config.transcription.timeout(),
                    )?),
                };
                Some(Arc::new(AudioCapturePipeline::new(media, transcriber)))
            }
            None => None,
        };

        let read_aloud = match self.sink {
            Some(sink) => {
                let speech = match self.speech {
                    Some(speech) => speech,
                    None => {
                        let mut client = HttpSpeechClient::new(self.config.speech.endpoint.clone());
                        if let Some(key) = &self.config.speech.api_key {
                            client = client.with_api_key(key.clone());
                        }
                        Arc::new(client)
                    }
                };
                Some(Arc::new(ReadAloud::new(speech, sink)))
            }
            None => None,
        };

        let sync = ConversationSynchronizer::new(
            conversation_store,
            Arc::clone(&settings_store),
            self.config.max_title_length,
        );

        info!(
            "Chat controller ready (voice input: {}, read-aloud: {})",
            capture.is_some(),
            read_aloud.is_some()
        );

        Ok(ChatController {
            config: self.config,
            transport,
            settings_store,
            notifier,
            state: Mutex::new(ControllerState {
                messages: MessageList::new(),
                assembler: StreamAssembler::new(),
                bound_group: None,
                chat_settings: None,
                input: InputBuffer::new(),
            }),
            sync: AsyncMutex::new(sync),
            exchange: AsyncMutex::new(()),
            cancel: Mutex::new(None),
            capture,
            read_aloud,
        })
    }
}
