//! Directory-backed conversation store
//!
//! Directory structure:
//! ```text
//! base_dir/
//! └── conversations/
//!     ├── 1700000000000.json
//!     └── 1700000000001.json
//! ```

use super::record::Conversation;
use super::store::ConversationStore;
use crate::messages::Message;
use crate::{ParleyError, Result};
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const CONVERSATIONS_DIR: &str = "conversations";

/// One JSON file per conversation, written atomically (temp file + rename).
#[derive(Debug, Clone)]
pub struct JsonDirConversationStore {
    dir: PathBuf,
}

impl JsonDirConversationStore {
    /// Store under the platform data directory (e.g. `~/.local/share/parley`).
    pub async fn default_location() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| ParleyError::ConfigError("No data directory on this platform".into()))?
            .join("parley");
        Self::new(base).await
    }

    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = base_dir.as_ref().join(CONVERSATIONS_DIR);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))
            .map_err(store_error)?;
        Ok(Self { dir })
    }

    pub fn conversations_dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn write_record(&self, record: &Conversation) -> anyhow::Result<()> {
        let path = self.path_for(record.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(record).context("Failed to encode conversation")?;

        fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;

        debug!("Persisted conversation {} to {}", record.id, path.display());
        Ok(())
    }

    async fn read_record(&self, id: i64) -> anyhow::Result<Option<Conversation>> {
        let path = self.path_for(id);
        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let record = serde_json::from_slice(&body)
            .with_context(|| format!("Corrupted conversation file {}", path.display()))?;
        Ok(Some(record))
    }
}

fn store_error(e: anyhow::Error) -> ParleyError {
    ParleyError::StoreError(format!("{:#}", e))
}

#[async_trait]
impl ConversationStore for JsonDirConversationStore {
    async fn add_conversation(&self, record: &Conversation) -> Result<()> {
        self.write_record(record).await.map_err(store_error)
    }

    async fn update_conversation(&self, record: &Conversation, messages: &[Message]) -> Result<()> {
        let mut updated = record.clone();
        updated.serialized_messages = serde_json::to_string(messages)?;
        self.write_record(&updated).await.map_err(store_error)
    }

    async fn get_conversation_by_id(&self, id: i64) -> Result<Option<Conversation>> {
        self.read_record(id).await.map_err(store_error)
    }
}
