pub mod list;
pub mod types;

pub use list::MessageList;
pub use types::{FileRef, Message, MessageType, Role};
