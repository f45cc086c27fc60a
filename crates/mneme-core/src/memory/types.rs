//! ============================================================================
//! Memory Types - Records, context bundles, and errors
//! ============================================================================
//! Core data types shared across the memory pipeline:
//! - MessageRecord: a stored conversation message with its embedding
//! - ScoredCandidate: a retrieval candidate with raw and adjusted distances
//! - ChatContext: assembled long-term + short-term context for prompting
//! - MemoryError: failures surfaced by storage, indexing, and embedding
//! ============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Roles
// ============================================================================

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    /// Label used when rendering prompt context
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Bot => "Bot",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "bot" | "assistant" => Ok(Role::Bot),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

// ============================================================================
// Message records
// ============================================================================

/// A single stored conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Monotonically increasing storage id (assigned by the store)
    pub id: i64,
    /// Position of this message's vector in the index, in insertion order
    pub slot: u64,
    pub content: String,
    pub author: String,
    pub role: Role,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    /// Embedding of `content`; empty when loaded without vectors
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

impl MessageRecord {
    pub fn new(content: String, author: String, role: Role) -> Self {
        Self {
            id: 0,
            slot: 0,
            content,
            author,
            role,
            timestamp: Utc::now().timestamp(),
            embedding: Vec::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A retrieval candidate that survived ranking
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub record: MessageRecord,
    /// Squared-euclidean distance reported by the index
    pub raw_distance: f32,
    /// Raw distance minus affinity and recency bonuses
    pub effective_distance: f32,
}

/// Aggregate counts over the store and index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_messages: u64,
    pub user_messages: u64,
    pub bot_messages: u64,
    pub indexed_vectors: u64,
    pub dimension: usize,
}

// ============================================================================
// Conversation context
// ============================================================================

/// One turn of the live conversation window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            role: Role::Bot,
            content: content.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Everything the assistant knows when answering one query
#[derive(Debug, Clone)]
pub struct ChatContext {
    /// User the context was assembled for
    pub user: String,
    /// Diverse long-term messages, in retrieval order
    pub long_term: Vec<MessageRecord>,
    /// Recent turns of the live conversation, oldest first
    pub short_term: Vec<ConversationTurn>,
}

impl ChatContext {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            long_term: Vec::new(),
            short_term: Vec::new(),
        }
    }

    /// Render retrieved long-term messages as prompt lines
    pub fn format_long_term(&self) -> String {
        self.long_term
            .iter()
            .map(|record| format!("{}: {}", record.role.display_name(), record.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the short-term window as prompt lines
    pub fn format_short_term(&self) -> String {
        self.short_term
            .iter()
            .map(|turn| format!("{}: {}", turn.role.display_name(), turn.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Assemble the full prompt for a query, skipping empty sections
    pub fn build_prompt(&self, query: &str) -> String {
        let mut prompt = String::new();

        if !self.long_term.is_empty() {
            prompt.push_str("Relevant memories:\n");
            prompt.push_str(&self.format_long_term());
            prompt.push_str("\n\n");
        }

        if !self.short_term.is_empty() {
            prompt.push_str("Current conversation:\n");
            prompt.push_str(&self.format_short_term());
            prompt.push_str("\n\n");
        }

        prompt.push_str(&format!("Query: {}\nAnswer:", query));
        prompt
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures raised by the memory subsystem
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding request timed out after {0}s")]
    EmbeddingTimeout(u64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Index snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("bot".parse::<Role>().unwrap(), Role::Bot);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Bot);
        assert!("wizard".parse::<Role>().is_err());
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Bot.to_string(), "bot");
    }

    #[test]
    fn test_record_builder() {
        let record = MessageRecord::new("hello".to_string(), "alice".to_string(), Role::User)
            .with_embedding(vec![0.1, 0.2])
            .with_timestamp(1_700_000_000);
        assert_eq!(record.content, "hello");
        assert_eq!(record.author, "alice");
        assert_eq!(record.role, Role::User);
        assert_eq!(record.timestamp, 1_700_000_000);
        assert_eq!(record.embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_prompt_skips_empty_sections() {
        let ctx = ChatContext::new("alice");
        let prompt = ctx.build_prompt("what's up?");
        assert!(!prompt.contains("Relevant memories"));
        assert!(!prompt.contains("Current conversation"));
        assert!(prompt.ends_with("Query: what's up?\nAnswer:"));
    }

    #[test]
    fn test_prompt_includes_context() {
        let mut ctx = ChatContext::new("alice");
        ctx.long_term.push(
            MessageRecord::new("I love hiking".to_string(), "alice".to_string(), Role::User),
        );
        ctx.short_term.push(ConversationTurn::user("hi"));
        ctx.short_term.push(ConversationTurn::bot("hello!"));

        let prompt = ctx.build_prompt("any trail ideas?");
        assert!(prompt.contains("Relevant memories:\nUser: I love hiking"));
        assert!(prompt.contains("Current conversation:\nUser: hi\nBot: hello!"));
        assert!(prompt.ends_with("Query: any trail ideas?\nAnswer:"));
    }
}
