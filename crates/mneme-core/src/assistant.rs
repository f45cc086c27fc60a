//! ============================================================================
//! Assistant - Memory-augmented response pipeline
//! ============================================================================
//! Wires the pieces into one respond() flow:
//! 1. Recall diverse long-term memories relevant to the query
//! 2. Snapshot the requester's short-term window
//! 3. Build the prompt and ask the chat model
//! 4. Store the user message and the reply in long-term memory
//! 5. Record the exchange in the short-term window
//!
//! Retrieval failures degrade to an empty context so a flaky backend never
//! blocks the reply. Storage and completion failures fail the exchange; the
//! caller decides how to apologize, and nothing is stored for it.
//! ============================================================================

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::llm::ChatClient;
use crate::memory::{ChatContext, MemoryManager, Role, SessionWindows};

/// Author name under which the assistant's replies are stored
pub const BOT_AUTHOR: &str = "mneme";

/// A conversational assistant with long- and short-term memory
pub struct Assistant {
    memory: Arc<MemoryManager>,
    sessions: SessionWindows,
    chat: RwLock<ChatClient>,
}

impl Assistant {
    pub fn new(memory: Arc<MemoryManager>, sessions: SessionWindows, chat: ChatClient) -> Self {
        Self {
            memory,
            sessions,
            chat: RwLock::new(chat),
        }
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn sessions(&self) -> &SessionWindows {
        &self.sessions
    }

    pub async fn active_model(&self) -> String {
        self.chat.read().await.model().to_string()
    }

    /// Switch the chat model for all subsequent replies
    pub async fn switch_model(&self, model: &str) {
        self.chat.write().await.set_model(model);
    }

    /// Answer `text` from `user` with full memory context, then remember
    /// the exchange.
    pub async fn respond(&self, user: &str, text: &str) -> Result<String> {
        // A failed recall degrades to zero context rather than blocking the
        // reply; zero context is a valid prompt input
        let long_term = match self.memory.recall(text, user).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!("Failed to recall memories, answering without context: {}", e);
                Vec::new()
            }
        };
        debug!("Recalled {} long-term message(s) for {}", long_term.len(), user);

        let mut context = ChatContext::new(user);
        context.long_term = long_term;
        context.short_term = self.sessions.snapshot(user);
        let prompt = context.build_prompt(text);

        let reply = self.chat.read().await.complete(&prompt).await?;

        // Stored only after a successful reply, so a failed exchange leaves
        // no trace in memory
        self.memory
            .remember(text, user, Role::User)
            .await
            .context("Failed to store user message")?;
        self.memory
            .remember(&reply, BOT_AUTHOR, Role::Bot)
            .await
            .context("Failed to store reply")?;
        self.sessions.record_exchange(user, text, &reply);

        Ok(reply)
    }
}
