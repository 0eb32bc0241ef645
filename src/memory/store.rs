//! Conversation history storage
//!
//! Per-conversation message buffers behind a single lock, with window
//! trimming on append and TTL eviction of idle conversations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Human,
    Assistant,
    System,
}

/// A single message in the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Configuration for conversation memory
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Messages served per conversation
    pub window_size: usize,
    /// Idle time after which a conversation is evicted
    pub ttl: Duration,
    /// How often the eviction pass runs
    pub cleanup_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Aggregate counters for the admin surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub active_conversations: usize,
    pub total_messages: usize,
}

#[derive(Debug)]
struct ConversationEntry {
    messages: Vec<ConversationMessage>,
    last_access: Instant,
}

/// Shared conversation store.
///
/// Stored length never exceeds `2 * window_size`; once an append pushes it
/// past that, only the newest `window_size` messages are kept.
pub struct ConversationMemory {
    config: MemoryConfig,
    conversations: Mutex<HashMap<String, ConversationEntry>>,
}

impl ConversationMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    /// Newest `window_size` messages, oldest first. Empty for unknown ids.
    pub async fn get_history(&self, conversation_id: &str) -> Vec<ConversationMessage> {
        let mut conversations = self.conversations.lock().await;

        let Some(entry) = conversations.get_mut(conversation_id) else {
            return Vec::new();
        };
        entry.last_access = Instant::now();

        let start = entry.messages.len().saturating_sub(self.config.window_size);
        entry.messages[start..].to_vec()
    }

    pub async fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: impl Into<String>,
    ) {
        let mut conversations = self.conversations.lock().await;
        let now = Instant::now();

        let entry = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationEntry {
                messages: Vec::new(),
                last_access: now,
            });
        entry.messages.push(ConversationMessage::new(role, content));
        entry.last_access = now;

        let max_stored = self.config.window_size * 2;
        if entry.messages.len() > max_stored {
            let excess = entry.messages.len() - self.config.window_size;
            entry.messages.drain(..excess);
        }
    }

    /// Record a question and its answer, in that order.
    pub async fn add_exchange(&self, conversation_id: &str, user_text: &str, ai_text: &str) {
        self.add_message(conversation_id, MessageRole::Human, user_text)
            .await;
        self.add_message(conversation_id, MessageRole::Assistant, ai_text)
            .await;
    }

    pub async fn clear(&self, conversation_id: &str) {
        self.conversations.lock().await.remove(conversation_id);
    }

    pub async fn clear_all(&self) {
        self.conversations.lock().await.clear();
    }

    pub async fn stats(&self) -> MemoryStats {
        let conversations = self.conversations.lock().await;
        MemoryStats {
            active_conversations: conversations.len(),
            total_messages: conversations.values().map(|e| e.messages.len()).sum(),
        }
    }

    /// Drop every conversation idle for longer than the TTL. Returns the
    /// number removed.
    pub async fn evict_stale(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;

        let mut conversations = self.conversations.lock().await;
        let before = conversations.len();
        conversations.retain(|_, entry| now.duration_since(entry.last_access) <= ttl);
        let removed = before - conversations.len();

        if removed > 0 {
            debug!("Evicted {} stale conversations", removed);
        }
        removed
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}
