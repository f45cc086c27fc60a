//! ============================================================================
//! Configuration - Environment-driven settings for Mneme
//! ============================================================================
//! All retrieval knobs are plain data so deployments can tune them without
//! code changes. Defaults read from the environment (loaded by the binary
//! via dotenv) and fall back to sensible constants.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::embeddings::{DEFAULT_EMBEDDING_DIM, DEFAULT_EMBEDDING_MODEL};
use crate::llm::DEFAULT_CHAT_MODEL;
use crate::memory::{DEFAULT_CLUSTER_SEED, DEFAULT_MAX_SESSIONS, DEFAULT_WINDOW_EXCHANGES};

/// Knobs for the long-term retrieval pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Final number of long-term messages injected as context
    pub k: usize,
    /// Candidates with an effective distance at or above this are dropped
    pub distance_threshold: f32,
    /// Distance bonus for messages authored by the requesting user
    pub user_affinity_bonus: f32,
    /// Maximum recency bonus; decays linearly to zero over 24 hours
    pub recency_weight: f32,
    /// Two results with cosine similarity at or above this never co-occur
    pub similarity_cutoff: f32,
    /// Fixed seed for the clustering diversifier, for reproducible retrieval
    pub cluster_seed: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 6,
            distance_threshold: 0.7,
            user_affinity_bonus: 0.5,
            recency_weight: 0.2,
            similarity_cutoff: 0.92,
            cluster_seed: DEFAULT_CLUSTER_SEED,
        }
    }
}

/// Embeddings API settings (OpenAI-compatible endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Vector dimension produced by `model`; fixed per index lifetime
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIM,
        }
    }
}

/// Chat-completions API settings (Mistral-compatible endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("MISTRAL_API_KEY").ok(),
            base_url: "https://api.mistral.ai/v1".to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.7,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the message database and index snapshot
    pub data_dir: PathBuf,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    /// Short-term window size, in user/bot exchanges
    pub window_exchanges: usize,
    /// Cap on concurrently tracked per-user sessions
    pub max_sessions: usize,
    /// Upper bound on a single embedding call during an append
    pub embed_timeout_secs: u64,
    /// How often the background task persists the index snapshot
    pub snapshot_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = if let Ok(dir) = std::env::var("MNEME_DATA_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::home_dir()
                .map(|home| home.join(".mneme"))
                .unwrap_or_else(|| PathBuf::from(".mneme"))
        };

        Self {
            data_dir,
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            chat: ChatConfig::default(),
            window_exchanges: DEFAULT_WINDOW_EXCHANGES,
            max_sessions: DEFAULT_MAX_SESSIONS,
            embed_timeout_secs: 30,
            snapshot_interval_secs: 60,
        }
    }
}

impl Config {
    /// Path of the SQLite message database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("messages.db")
    }

    /// Path of the serialized vector index snapshot
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.bin")
    }

    /// Create the data directory if it does not exist yet
    pub fn ensure_data_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }

    /// Settings consumed by the memory manager
    pub fn memory_config(&self) -> MemoryConfig {
        MemoryConfig {
            retrieval: self.retrieval.clone(),
            index_path: Some(self.index_path()),
            embed_timeout: Duration::from_secs(self.embed_timeout_secs),
        }
    }
}

/// Subset of settings the memory manager needs
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub retrieval: RetrievalConfig,
    /// Snapshot location; `None` disables index persistence entirely
    pub index_path: Option<PathBuf>,
    pub embed_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            index_path: None,
            embed_timeout: Duration::from_secs(30),
        }
    }
}
