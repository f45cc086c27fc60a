//! ============================================================================
//! MNEME-CORE: Conversational memory engine
//! ============================================================================
//! This crate handles all backend logic for the Mneme assistant:
//! - Long-term memory: durable message store + vector index + retrieval
//! - Short-term memory: rolling per-user conversation windows
//! - Embedding and chat completion clients
//! - The respond() pipeline tying retrieval, prompting, and storage together
//! ============================================================================

pub mod assistant;
pub mod config;
pub mod embeddings;
pub mod llm;
pub mod memory;

// Re-export main types for convenience
pub use assistant::{Assistant, BOT_AUTHOR};
pub use config::{ChatConfig, Config, EmbeddingConfig, MemoryConfig, RetrievalConfig};
pub use embeddings::{
    create_embedding_service, Embedder, EmbeddingService, DEFAULT_EMBEDDING_DIM,
    DEFAULT_EMBEDDING_MODEL,
};
pub use llm::{ChatClient, ChatMessage, DEFAULT_CHAT_MODEL};
pub use memory::{
    ChatContext, ConversationTurn, MemoryError, MemoryManager, MemoryStats, MessageRecord,
    MessageStore, RecallOptions, Role, ScoredCandidate, SessionWindows, ShortTermWindow,
};
