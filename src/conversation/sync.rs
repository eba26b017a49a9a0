//! Conversation synchronizer
//!
//! Keeps the live conversation binding consistent with the in-memory message
//! list: a non-empty list always has a backing record, the empty list has
//! none, and every change to the list is persisted under the record's id.

use super::record::{derive_title, first_non_empty, Conversation, ConversationIdSource};
use super::store::ConversationStore;
use crate::messages::{FileRef, MessageList};
use crate::settings::SettingsStore;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Instruction sources, most specific first.
#[derive(Debug, Clone, Default)]
pub struct InstructionSources {
    pub conversation: Option<String>,
    pub settings: Option<String>,
    pub user: Option<String>,
    pub global_default: String,
    pub fallback: String,
}

impl InstructionSources {
    pub fn resolve(&self) -> String {
        first_non_empty([
            self.conversation.as_deref(),
            self.settings.as_deref(),
            self.user.as_deref(),
            Some(self.global_default.as_str()),
            Some(self.fallback.as_str()),
        ])
    }
}

/// Everything needed to create a conversation for an outgoing message.
#[derive(Debug, Clone)]
pub struct ConversationSeed {
    pub message: String,
    pub attachments: Vec<FileRef>,
    /// Settings group the exchange is scoped to, if any.
    pub group_id: Option<i64>,
    pub model_id: String,
    pub instructions: InstructionSources,
}

/// Result of observing the message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The list is empty; the live binding was dropped.
    Cleared,
    /// The list was written to the store.
    Persisted,
    /// Same content as the last write; nothing to do.
    Unchanged,
    /// Non-empty list without a binding (only possible before a send).
    Unbound,
}

pub struct ConversationSynchronizer {
    store: Arc<dyn ConversationStore>,
    settings: Arc<dyn SettingsStore>,
    ids: ConversationIdSource,
    max_title_length: usize,
    active: Option<Conversation>,
    last_snapshot: Option<String>,
}

impl ConversationSynchronizer {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        settings: Arc<dyn SettingsStore>,
        max_title_length: usize,
    ) -> Self {
        Self {
            store,
            settings,
            ids: ConversationIdSource::new(),
            max_title_length,
            active: None,
            last_snapshot: None,
        }
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Create and persist a conversation before any message is appended.
    ///
    /// Returns the existing binding unchanged when one is already active, so
    /// repeated calls never create duplicates or retitle.
    pub async fn start_conversation(&mut self, seed: ConversationSeed) -> Result<Conversation> {
        if let Some(existing) = &self.active {
            debug!("Conversation {} already active", existing.id);
            return Ok(existing.clone());
        }

        let id = self.ids.next_id();
        let title = derive_title(&seed.message, self.max_title_length);
        let system_prompt = seed.instructions.resolve();
        let record = Conversation::new(id, seed.group_id, title, seed.model_id, system_prompt);

        self.store.add_conversation(&record).await?;
        info!(
            "Started conversation {} ({:?}, {} attachment(s))",
            record.id,
            record.title,
            seed.attachments.len()
        );

        if let Some(group_id) = seed.group_id {
            if let Err(e) = self.settings.set_show_in_sidebar(group_id, true).await {
                warn!("Failed to list group {} in sidebar: {}", group_id, e);
            }
        }

        self.active = Some(record.clone());
        self.last_snapshot = None;
        Ok(record)
    }

    /// Bind an already stored conversation (e.g. when reopening one).
    pub fn bind(&mut self, record: Conversation, messages: &MessageList) {
        self.last_snapshot = messages.to_json().ok();
        self.active = Some(record);
    }

    /// Drop the live binding. Stored history is not touched.
    pub fn clear(&mut self) {
        if let Some(record) = self.active.take() {
            debug!("Released conversation {}", record.id);
        }
        self.last_snapshot = None;
    }

    /// React to the current message list.
    pub async fn observe(&mut self, messages: &MessageList) -> Result<SyncOutcome> {
        if messages.is_empty() {
            self.clear();
            return Ok(SyncOutcome::Cleared);
        }

        let Some(record) = self.active.as_mut() else {
            return Ok(SyncOutcome::Unbound);
        };

        let snapshot = messages.to_json()?;
        if self.last_snapshot.as_deref() == Some(snapshot.as_str()) {
            return Ok(SyncOutcome::Unchanged);
        }

        self.store
            .update_conversation(record, messages.as_slice())
            .await?;
        record.serialized_messages = snapshot.clone();
        self.last_snapshot = Some(snapshot);
        debug!("Persisted {} message(s) for {}", messages.len(), record.id);
        Ok(SyncOutcome::Persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::InMemoryConversationStore;
    use crate::messages::{MessageType, Role};
    use crate::settings::{ChatSettings, InMemorySettingsStore};

    fn seed(message: &str, group_id: Option<i64>) -> ConversationSeed {
        ConversationSeed {
            message: message.to_string(),
            attachments: vec![],
            group_id,
            model_id: "test-model".to_string(),
            instructions: InstructionSources {
                global_default: "You are helpful.".to_string(),
                fallback: "Answer.".to_string(),
                ..Default::default()
            },
        }
    }

    fn synchronizer() -> (
        ConversationSynchronizer,
        InMemoryConversationStore,
        InMemorySettingsStore,
    ) {
        let store = InMemoryConversationStore::new();
        let settings = InMemorySettingsStore::new();
        let sync =
            ConversationSynchronizer::new(Arc::new(store.clone()), Arc::new(settings.clone()), 50);
        (sync, store, settings)
    }

    #[test]
    fn test_instruction_precedence() {
        let mut sources = InstructionSources {
            global_default: "global".into(),
            fallback: "fallback".into(),
            ..Default::default()
        };
        assert_eq!(sources.resolve(), "global");

        sources.user = Some("user".into());
        assert_eq!(sources.resolve(), "user");

        sources.settings = Some("   ".into());
        assert_eq!(sources.resolve(), "user");

        sources.conversation = Some("conversation".into());
        assert_eq!(sources.resolve(), "conversation");
    }

    #[tokio::test]
    async fn test_start_persists_before_messages() {
        let (mut sync, store, _) = synchronizer();
        let record = sync.start_conversation(seed("Hello\nworld", None)).await.unwrap();

        assert_eq!(record.title, "Hello");
        assert_eq!(record.system_prompt, "You are helpful.");
        let stored = store.get_conversation_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(stored.serialized_messages, "[]");
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (mut sync, store, _) = synchronizer();
        let first = sync.start_conversation(seed("First", None)).await.unwrap();
        let second = sync.start_conversation(seed("Second", None)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.title, "First");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_group_scoped_conversation_listed_in_sidebar() {
        let (mut sync, _, settings) = synchronizer();
        settings.put(ChatSettings::new(9, "Physics"));

        let record = sync.start_conversation(seed("Hi", Some(9))).await.unwrap();
        assert_eq!(record.group_id, Some(9));
        assert!(settings.get(9).unwrap().show_in_sidebar);
    }

    #[tokio::test]
    async fn test_observe_skips_unchanged_lists() {
        let (mut sync, store, _) = synchronizer();
        sync.start_conversation(seed("Hi", None)).await.unwrap();

        let mut messages = MessageList::new();
        messages.append(Role::User, MessageType::Normal, "Hi", vec![]);

        assert_eq!(sync.observe(&messages).await.unwrap(), SyncOutcome::Persisted);
        let writes = store.write_count();
        assert_eq!(sync.observe(&messages).await.unwrap(), SyncOutcome::Unchanged);
        assert_eq!(store.write_count(), writes);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_list_clears_binding() {
        let (mut sync, store, _) = synchronizer();
        let record = sync.start_conversation(seed("Hi", None)).await.unwrap();

        assert_eq!(
            sync.observe(&MessageList::new()).await.unwrap(),
            SyncOutcome::Cleared
        );
        assert!(sync.active().is_none());
        // History stays in the store
        assert!(store.get_conversation_by_id(record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unbound_list_is_reported() {
        let (mut sync, store, _) = synchronizer();
        let mut messages = MessageList::new();
        messages.append(Role::User, MessageType::Normal, "Hi", vec![]);

        assert_eq!(sync.observe(&messages).await.unwrap(), SyncOutcome::Unbound);
        assert_eq!(store.write_count(), 0);
    }
}
