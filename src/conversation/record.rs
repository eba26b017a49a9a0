//! Persisted conversation record and the helpers used to create one

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// A stored conversation.
///
/// `serialized_messages` holds the JSON-encoded message sequence. The title is
/// derived once from the first message and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub group_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub model_id: String,
    pub system_prompt: String,
    pub serialized_messages: String,
}

impl Conversation {
    pub fn new(
        id: i64,
        group_id: Option<i64>,
        title: impl Into<String>,
        model_id: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        let created_at = Utc
            .timestamp_millis_opt(id)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id,
            group_id,
            created_at,
            title: title.into(),
            model_id: model_id.into(),
            system_prompt: system_prompt.into(),
            serialized_messages: "[]".to_string(),
        }
    }
}

/// Title from the seed message: leading whitespace dropped, cut at the first
/// line break or at `max_len` characters, whichever comes first.
pub fn derive_title(message: &str, max_len: usize) -> String {
    let trimmed = message.trim_start();
    let first_line = trimmed.split('\n').next().unwrap_or_default();
    first_line.chars().take(max_len).collect()
}

/// First candidate that is present and not blank, or an empty string.
pub fn first_non_empty<'a, I>(candidates: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_default()
}

/// Creation-time derived conversation ids.
///
/// Ids are epoch milliseconds, bumped when two conversations are created
/// within the same millisecond.
#[derive(Debug, Default)]
pub struct ConversationIdSource {
    last: AtomicI64,
}

impl ConversationIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(current + 1);
            match self
                .last
                .compare_exchange(current, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}
