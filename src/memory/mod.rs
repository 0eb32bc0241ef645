//! Conversation Memory
//!
//! Keeps a bounded window of recent messages per conversation so answers
//! can refer back to earlier turns. Idle conversations expire.

pub mod janitor;
pub mod store;

pub use janitor::MemoryJanitor;
pub use store::{ConversationMemory, ConversationMessage, MemoryConfig, MemoryStats, MessageRole};
