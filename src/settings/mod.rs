//! Chat settings collaborator with explicit publish/subscribe
//!
//! Settings groups ("custom chats") carry their own instructions, model and
//! transcription options. Changes are announced on a broadcast channel; a
//! [`SettingsWatcher`] holds the subscription and unsubscribes on drop.

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    pub id: i64,
    pub author: String,
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub show_in_sidebar: bool,
}

impl ChatSettings {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            author: "user".to_string(),
            name: name.into(),
            model: None,
            instructions: None,
            language: None,
            temperature: None,
            show_in_sidebar: false,
        }
    }

    /// Settings used when no group is bound.
    pub fn fallback(model: impl Into<String>) -> Self {
        Self {
            id: 0,
            author: "system".to_string(),
            name: "default".to_string(),
            model: Some(model.into()),
            instructions: None,
            language: None,
            temperature: None,
            show_in_sidebar: false,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Change notification. `group_id == None` means "anything may have changed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsChanged {
    pub group_id: Option<i64>,
}

impl SettingsChanged {
    /// Whether a listener bound to `bound` has to re-fetch.
    pub fn concerns(&self, bound: Option<i64>) -> bool {
        match (self.group_id, bound) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(changed), Some(bound)) => changed == bound,
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn chat_settings(&self, group_id: i64) -> Result<Option<ChatSettings>>;

    /// Mark a settings group as listed in the sidebar.
    async fn set_show_in_sidebar(&self, group_id: i64, visible: bool) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<SettingsChanged>;
}

#[derive(Debug, Clone)]
pub struct InMemorySettingsStore {
    groups: Arc<RwLock<HashMap<i64, ChatSettings>>>,
    events: broadcast::Sender<SettingsChanged>,
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            groups: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Insert or replace a group and announce the change.
    pub fn put(&self, settings: ChatSettings) {
        let group_id = settings.id;
        self.groups.write().insert(group_id, settings);
        self.notify(Some(group_id));
    }

    pub fn get(&self, group_id: i64) -> Option<ChatSettings> {
        self.groups.read().get(&group_id).cloned()
    }

    pub fn notify(&self, group_id: Option<i64>) {
        // No receivers is not an error
        let _ = self.events.send(SettingsChanged { group_id });
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn chat_settings(&self, group_id: i64) -> Result<Option<ChatSettings>> {
        Ok(self.get(group_id))
    }

    async fn set_show_in_sidebar(&self, group_id: i64, visible: bool) -> Result<()> {
        if let Some(settings) = self.groups.write().get_mut(&group_id) {
            settings.show_in_sidebar = visible;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingsChanged> {
        self.events.subscribe()
    }
}

/// Live settings subscription. Dropping it stops the listener task.
#[derive(Debug)]
pub struct SettingsWatcher {
    task: JoinHandle<()>,
}

impl SettingsWatcher {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SettingsWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
