use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Normal,
    Error,
}

/// Reference to a file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub id: Option<i64>,
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl FileRef {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            mime_type: mime_type.into(),
            source_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// 1-based, monotonic within a conversation. Prompt-only system
    /// messages carry id 0.
    pub id: u64,
    pub role: Role,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<FileRef>,
    #[serde(default)]
    pub is_newly_streamed: bool,
}

impl Message {
    pub fn new(id: u64, role: Role, message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            message_type,
            content: content.into(),
            attachments: Vec::new(),
            is_newly_streamed: false,
        }
    }

    /// A system prompt prepended to an outgoing request. Never stored.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(0, Role::System, MessageType::Normal, content)
    }

    pub fn with_attachments(mut self, attachments: Vec<FileRef>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }
}
