//! ============================================================================
//! Memory Module - Long- and short-term conversation memory
//! ============================================================================
//! Vector-based long-term memory over the full message history, plus rolling
//! per-user short-term windows.
//!
//! ## Features
//! - Durable message store with embeddings, index rebuildable on demand
//! - Exact nearest-neighbor search over every stored message
//! - Per-user re-ranking (author affinity, recency) with a relevance cutoff
//! - Diversified results so near-duplicates never crowd the context
//!
//! ## Architecture
//! ```text
//! Query → Embed → Index Search (2k) → Resolve via Store
//!                                           ↓
//!                         Rank: affinity + recency, threshold
//!                                           ↓
//!                         Diversify: cluster / greedy, cap at k
//!                                           ↓
//!                                  k context messages
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use mneme_core::memory::{MemoryManager, MessageStore, Role};
//!
//! let store = MessageStore::open(&config.db_path())?;
//! let manager = MemoryManager::open(store, embedder, config.memory_config())?;
//!
//! // Remember a message
//! manager.remember("I live in Lisbon", "alice", Role::User).await?;
//!
//! // Recall context for a query
//! let memories = manager.recall("where do I live?", "alice").await?;
//! ```
//! ============================================================================

mod diversify;
mod index;
mod manager;
mod ranker;
mod store;
mod types;
mod window;

// Re-export public types
pub use diversify::{cosine_similarity, DEFAULT_CLUSTER_SEED};
pub use index::{SearchHit, VectorIndex};
pub use manager::{MemoryManager, RecallOptions};
pub use store::MessageStore;
pub use types::{
    ChatContext, ConversationTurn, MemoryError, MemoryStats, MessageRecord, Role, ScoredCandidate,
};
pub use window::{
    SessionWindows, ShortTermWindow, DEFAULT_MAX_SESSIONS, DEFAULT_WINDOW_EXCHANGES,
};
