//! Conversation records, persistence and the synchronizer that keeps them
//! in step with the message list.

pub mod json_store;
pub mod record;
pub mod store;
pub mod sync;

pub use json_store::JsonDirConversationStore;
pub use record::{derive_title, first_non_empty, Conversation, ConversationIdSource};
pub use store::{decode_messages, ConversationStore, InMemoryConversationStore};
pub use sync::{ConversationSeed, ConversationSynchronizer, InstructionSources, SyncOutcome};
