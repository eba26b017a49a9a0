use super::types::{FileRef, Message, MessageType, Role};

/// Append-mostly ordered message sequence.
///
/// Only two mutations exist: [`MessageList::append`] and
/// [`MessageList::update_last`]. Earlier elements are never touched again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageList {
    messages: Vec<Message>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a list from persisted messages.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Id the next appended message will receive: one past the highest id held.
    pub fn next_id(&self) -> u64 {
        self.messages.iter().map(|m| m.id).max().unwrap_or(0) + 1
    }

    /// Append a new message and return its id.
    pub fn append(
        &mut self,
        role: Role,
        message_type: MessageType,
        content: impl Into<String>,
        attachments: Vec<FileRef>,
    ) -> u64 {
        let id = self.next_id();
        self.messages
            .push(Message::new(id, role, message_type, content).with_attachments(attachments));
        id
    }

    /// Append a streamed assistant message seeded with its first fragment.
    pub fn append_streamed(&mut self, content: impl Into<String>, attachments: Vec<FileRef>) -> u64 {
        let id = self.append(Role::Assistant, MessageType::Normal, content, attachments);
        if let Some(last) = self.messages.last_mut() {
            last.is_newly_streamed = true;
        }
        id
    }

    /// Apply `f` to the trailing message. Returns `None` on an empty list.
    pub fn update_last<R>(&mut self, f: impl FnOnce(&mut Message) -> R) -> Option<R> {
        self.messages.last_mut().map(f)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: u64) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.messages)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_messages(serde_json::from_str(json)?))
    }
}
