//! Background eviction of idle conversations
//!
//! A cancellable periodic task: one eviction pass per cleanup interval,
//! stopped explicitly at shutdown.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::ConversationMemory;

pub struct MemoryJanitor {
    memory: Arc<ConversationMemory>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl MemoryJanitor {
    /// Spawn the eviction loop. The first pass runs one full interval after
    /// start.
    pub fn start(memory: Arc<ConversationMemory>) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(eviction_loop(memory.clone(), cancel.clone()));

        info!(
            window_size = memory.window_size(),
            ttl_secs = memory.config().ttl.as_secs(),
            "Conversation memory started"
        );

        Self {
            memory,
            cancel,
            handle,
        }
    }

    /// Stop the eviction loop and drop every conversation.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Memory janitor task ended abnormally: {}", e);
        }
        self.memory.clear_all().await;
        info!("Conversation memory cleared");
    }
}

async fn eviction_loop(memory: Arc<ConversationMemory>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(memory.config().cleanup_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval fires immediately on the first tick
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                memory.evict_stale().await;
            }
            _ = cancel.cancelled() => {
                debug!("Memory janitor shutting down");
                break;
            }
        }
    }
}
