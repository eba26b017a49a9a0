use super::record::Conversation;
use crate::messages::Message;
use crate::{ParleyError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Persistence collaborator for conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn add_conversation(&self, record: &Conversation) -> Result<()>;

    /// Replace the stored message sequence of `record`.
    async fn update_conversation(&self, record: &Conversation, messages: &[Message]) -> Result<()>;

    async fn get_conversation_by_id(&self, id: i64) -> Result<Option<Conversation>>;

    async fn get_messages(&self, record: &Conversation) -> Result<Vec<Message>> {
        decode_messages(record)
    }
}

/// Parse the serialized message sequence of a record.
pub fn decode_messages(record: &Conversation) -> Result<Vec<Message>> {
    if record.serialized_messages.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&record.serialized_messages).map_err(|e| {
        ParleyError::SerializationError(format!(
            "Conversation {} has unreadable messages: {}",
            record.id, e
        ))
    })
}

/// Thread-safe in-memory conversation store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConversationStore {
    records: Arc<RwLock<BTreeMap<i64, Conversation>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored records, oldest first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.records.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of add/update calls that reached the store.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn add_conversation(&self, record: &Conversation) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records.write().insert(record.id, record.clone());
        Ok(())
    }

    async fn update_conversation(&self, record: &Conversation, messages: &[Message]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut updated = record.clone();
        updated.serialized_messages = serde_json::to_string(messages)?;
        self.records.write().insert(updated.id, updated);
        Ok(())
    }

    async fn get_conversation_by_id(&self, id: i64) -> Result<Option<Conversation>> {
        Ok(self.records.read().get(&id).cloned())
    }
}
