//! ============================================================================
//! Memory Manager - Orchestrates storage, indexing, and retrieval
//! ============================================================================
//! Owns the message store and the vector index and keeps them in lockstep:
//! - remember(): embed, persist, then index, as one serialized append
//! - recall(): embed the query, over-fetch nearest neighbors, re-rank per
//!   user, and diversify down to k results
//! - snapshots: the index is saved lazily in the background and rebuilt
//!   from the store whenever the snapshot is missing or stale
//!
//! Reads run concurrently; appends serialize on the index write lock. A
//! failed append leaves both the store and the index untouched.
//! ============================================================================

use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{MemoryConfig, RetrievalConfig};
use crate::embeddings::Embedder;

use super::diversify::select_diverse;
use super::index::VectorIndex;
use super::ranker::rank_candidates;
use super::store::MessageStore;
use super::types::{MemoryError, MemoryStats, MessageRecord, Role, ScoredCandidate};

/// Per-call retrieval overrides
#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    /// Result count; defaults to the configured k
    pub k: Option<usize>,
    /// Drop bot-authored messages before ranking
    pub ignore_bot: bool,
}

/// Long-term conversational memory
pub struct MemoryManager {
    store: MessageStore,
    index: RwLock<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    retrieval: RetrievalConfig,
    index_path: Option<PathBuf>,
    /// Set on every append, cleared by the background persister
    dirty: AtomicBool,
    embed_timeout: Duration,
}

impl MemoryManager {
    /// Open the manager over an existing store, loading the index snapshot
    /// when it matches the store and rebuilding it otherwise.
    pub fn open(
        store: MessageStore,
        embedder: Arc<dyn Embedder>,
        config: MemoryConfig,
    ) -> Result<Self, MemoryError> {
        let dimension = embedder.dimension();
        let stored = store.count()?;

        let index = match config.index_path.as_deref().filter(|p| p.exists()) {
            Some(path) => match VectorIndex::load(path) {
                Ok(index) if index.dimension() == dimension && index.len() == stored => {
                    info!("Loaded index snapshot with {} vectors", index.len());
                    index
                }
                Ok(index) => {
                    warn!(
                        "Index snapshot is stale ({} vectors of dim {}, store has {}), rebuilding",
                        index.len(),
                        index.dimension(),
                        stored
                    );
                    index_from_store(&store, dimension)?
                }
                Err(e) => {
                    warn!("Failed to load index snapshot: {}, rebuilding", e);
                    index_from_store(&store, dimension)?
                }
            },
            None => index_from_store(&store, dimension)?,
        };

        Ok(Self {
            store,
            index: RwLock::new(index),
            embedder,
            retrieval: config.retrieval,
            index_path: config.index_path,
            dirty: AtomicBool::new(false),
            embed_timeout: config.embed_timeout,
        })
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Embed `content` and append it to both the store and the index.
    /// The returned record carries its assigned id and slot.
    pub async fn remember(
        &self,
        content: &str,
        author: &str,
        role: Role,
    ) -> Result<MessageRecord, MemoryError> {
        let embedding = self.embed_with_timeout(content).await?;

        let mut index = self.index.write().await;
        if embedding.len() != index.dimension() {
            return Err(MemoryError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedding.len(),
            });
        }

        let slot = index.len();
        let mut record = MessageRecord::new(content.to_string(), author.to_string(), role)
            .with_embedding(embedding);
        record.slot = slot;

        // Store first: if the insert fails the index is untouched, and the
        // add below cannot fail once the dimension is checked.
        record.id = self.store.insert(&record)?;
        let assigned = index.add(&record.embedding)?;
        debug_assert_eq!(assigned, slot);
        drop(index);

        self.dirty.store(true, Ordering::Release);
        debug!(id = record.id, slot, author = %record.author, "Stored message");
        Ok(record)
    }

    /// Retrieve up to k diverse messages relevant to `query` for `requester`
    pub async fn recall(
        &self,
        query: &str,
        requester: &str,
    ) -> Result<Vec<MessageRecord>, MemoryError> {
        self.recall_with(query, requester, RecallOptions::default()).await
    }

    pub async fn recall_with(
        &self,
        query: &str,
        requester: &str,
        options: RecallOptions,
    ) -> Result<Vec<MessageRecord>, MemoryError> {
        let scored = self.recall_scored(query, requester, options).await?;
        Ok(scored.into_iter().map(|c| c.record).collect())
    }

    /// Full retrieval pipeline, keeping the scores for inspection
    pub async fn recall_scored(
        &self,
        query: &str,
        requester: &str,
        options: RecallOptions,
    ) -> Result<Vec<ScoredCandidate>, MemoryError> {
        let k = options.k.unwrap_or(self.retrieval.k);
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embed_with_timeout(query).await?;

        // Over-fetch so ranking and diversification have room to drop
        let hits = {
            let index = self.index.read().await;
            index.search(&embedding, k * 2)?
        };
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get_by_slot(hit.slot)? {
                Some(record) => resolved.push((hit, record)),
                None => warn!("Indexed slot {} has no stored message, skipping", hit.slot),
            }
        }

        let now = Utc::now().timestamp();
        let ranked = rank_candidates(resolved, requester, now, &self.retrieval, options.ignore_bot);
        Ok(select_diverse(
            &ranked,
            k,
            self.retrieval.similarity_cutoff,
            self.retrieval.cluster_seed,
        ))
    }

    /// The most recent messages in chronological order, across all users.
    /// Holds the index read lock so an in-flight append is never observed
    /// half-done.
    pub async fn recent(&self, limit: usize) -> Result<Vec<MessageRecord>, MemoryError> {
        let _index = self.index.read().await;
        self.store.recent(limit)
    }

    pub async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        let index = self.index.read().await;
        Ok(MemoryStats {
            total_messages: self.store.count()?,
            user_messages: self.store.count_by_role(Role::User)?,
            bot_messages: self.store.count_by_role(Role::Bot)?,
            indexed_vectors: index.len(),
            dimension: index.dimension(),
        })
    }

    /// Discard the in-memory index and rebuild it from the store
    pub async fn rebuild_index(&self) -> Result<u64, MemoryError> {
        let mut index = self.index.write().await;
        *index = index_from_store(&self.store, self.embedder.dimension())?;
        let len = index.len();
        drop(index);
        self.dirty.store(true, Ordering::Release);
        Ok(len)
    }

    /// Write the current index snapshot to disk, if persistence is enabled.
    /// The index is cloned under the read lock and saved outside it, so
    /// appends never wait on disk I/O.
    pub async fn flush(&self) -> Result<(), MemoryError> {
        if let Some(path) = &self.index_path {
            let snapshot = self.index.read().await.clone();
            snapshot.save(path)?;
            debug!("Persisted index snapshot ({} vectors)", snapshot.len());
        }
        Ok(())
    }

    /// Spawn the background task that lazily persists the index. Appends
    /// never wait for it; a failed save re-marks the index dirty so the next
    /// tick retries.
    pub fn spawn_persister(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.dirty.swap(false, Ordering::AcqRel) {
                    if let Err(e) = self.flush().await {
                        warn!("Failed to persist index snapshot: {}", e);
                        self.dirty.store(true, Ordering::Release);
                    }
                }
            }
        })
    }

    async fn embed_with_timeout(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        tokio::time::timeout(self.embed_timeout, self.embedder.embed(text))
            .await
            .map_err(|_| MemoryError::EmbeddingTimeout(self.embed_timeout.as_secs()))?
    }
}

/// Rebuild the index by re-adding stored embeddings in slot order, which
/// reproduces the original slot assignment.
fn index_from_store(store: &MessageStore, dimension: usize) -> Result<VectorIndex, MemoryError> {
    let mut index = VectorIndex::new(dimension);
    for (slot, embedding) in store.embeddings_in_slot_order()? {
        let assigned = index.add(&embedding)?;
        if assigned != slot {
            warn!("Rebuild assigned slot {} to a message stored at slot {}", assigned, slot);
        }
    }
    if !index.is_empty() {
        info!("Rebuilt index with {} vectors", index.len());
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StaticEmbedder {
        dimension: usize,
        vectors: HashMap<String, Vec<f32>>,
    }

    impl StaticEmbedder {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                vectors: HashMap::new(),
            }
        }

        fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.vectors.insert(text.to_string(), vector);
            self
        }
    }

    #[async_trait]
    impl Embedder for StaticEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| MemoryError::Embedding(format!("no vector for {:?}", text)))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, MemoryError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![0.0, 0.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn greeting_embedder() -> StaticEmbedder {
        StaticEmbedder::new(3)
            .with("hello", vec![1.0, 0.0, 0.0])
            .with("hello there", vec![0.95, 0.3122, 0.0])
            .with("goodbye", vec![0.6, 0.8, 0.0])
            .with("hi", vec![0.999, 0.0447, 0.0])
    }

    fn manager_with(embedder: StaticEmbedder, retrieval: RetrievalConfig) -> MemoryManager {
        let store = MessageStore::open_in_memory().unwrap();
        let config = MemoryConfig {
            retrieval,
            index_path: None,
            embed_timeout: Duration::from_secs(5),
        };
        MemoryManager::open(store, Arc::new(embedder), config).unwrap()
    }

    #[tokio::test]
    async fn test_remember_assigns_monotonic_slots() {
        let manager = manager_with(greeting_embedder(), RetrievalConfig::default());

        let first = manager.remember("hello", "alice", Role::User).await.unwrap();
        let second = manager.remember("goodbye", "alice", Role::User).await.unwrap();
        let third = manager.remember("hi", "mneme", Role::Bot).await.unwrap();

        assert_eq!(first.slot, 0);
        assert_eq!(second.slot, 1);
        assert_eq!(third.slot, 2);
        assert!(first.id < second.id && second.id < third.id);

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.indexed_vectors, 3);
        assert_eq!(stats.user_messages, 2);
        assert_eq!(stats.bot_messages, 1);
        assert_eq!(stats.dimension, 3);
    }

    #[tokio::test]
    async fn test_recent_returns_latest_in_chronological_order() {
        let manager = manager_with(greeting_embedder(), RetrievalConfig::default());

        manager.remember("hello", "alice", Role::User).await.unwrap();
        manager.remember("goodbye", "alice", Role::User).await.unwrap();
        manager.remember("hi", "mneme", Role::Bot).await.unwrap();

        let recent = manager.recent(2).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["goodbye", "hi"]);
    }

    #[tokio::test]
    async fn test_recall_keeps_relevant_and_diverse_messages() {
        let mut retrieval = RetrievalConfig::default();
        retrieval.k = 2;
        let manager = manager_with(greeting_embedder(), retrieval);

        manager.remember("hello", "alice", Role::User).await.unwrap();
        manager.remember("hello there", "alice", Role::User).await.unwrap();
        manager.remember("goodbye", "alice", Role::User).await.unwrap();

        let results = manager.recall("hi", "alice").await.unwrap();
        assert_eq!(results.len(), 2);

        let contents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        assert!(contents.contains(&"goodbye"));
        let greetings = contents
            .iter()
            .filter(|c| **c == "hello" || **c == "hello there")
            .count();
        assert_eq!(greetings, 1);
    }

    #[tokio::test]
    async fn test_every_search_hit_resolves_to_a_stored_message() {
        // Permissive thresholds so nothing is filtered: all appends must
        // come back with distinct slots and their stored content
        let mut retrieval = RetrievalConfig::default();
        retrieval.k = 3;
        retrieval.distance_threshold = 100.0;
        retrieval.similarity_cutoff = 1.01;
        let manager = manager_with(greeting_embedder(), retrieval);

        manager.remember("hello", "alice", Role::User).await.unwrap();
        manager.remember("hello there", "alice", Role::User).await.unwrap();
        manager.remember("goodbye", "alice", Role::User).await.unwrap();

        let scored = manager
            .recall_scored("hi", "alice", RecallOptions::default())
            .await
            .unwrap();
        assert_eq!(scored.len(), 3);

        let mut slots: Vec<u64> = scored.iter().map(|c| c.record.slot).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);
        for candidate in &scored {
            let stored = manager
                .store()
                .get_by_slot(candidate.record.slot)
                .unwrap()
                .unwrap();
            assert_eq!(stored.content, candidate.record.content);
        }
    }

    #[tokio::test]
    async fn test_recall_on_empty_memory_is_empty() {
        let manager = manager_with(greeting_embedder(), RetrievalConfig::default());
        let results = manager.recall("hi", "alice").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_recall_can_ignore_bot_messages() {
        let embedder = StaticEmbedder::new(3)
            .with("cats are great", vec![1.0, 0.0, 0.0])
            .with("indeed, cats", vec![0.8, 0.6, 0.0])
            .with("cats?", vec![0.9, 0.1, 0.0]);
        let manager = manager_with(embedder, RetrievalConfig::default());

        manager.remember("cats are great", "alice", Role::User).await.unwrap();
        manager.remember("indeed, cats", "mneme", Role::Bot).await.unwrap();

        let both = manager
            .recall_with("cats?", "alice", RecallOptions::default())
            .await
            .unwrap();
        assert_eq!(both.len(), 2);

        let options = RecallOptions {
            k: None,
            ignore_bot: true,
        };
        let users_only = manager.recall_with("cats?", "alice", options).await.unwrap();
        assert_eq!(users_only.len(), 1);
        assert_eq!(users_only[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_failed_append_leaves_nothing_behind() {
        let embedder = StaticEmbedder::new(3)
            .with("good", vec![1.0, 0.0, 0.0])
            .with("bad", vec![1.0, 0.0]);
        let manager = manager_with(embedder, RetrievalConfig::default());

        let err = manager.remember("bad", "alice", Role::User).await.unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { expected: 3, actual: 2 }));

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.indexed_vectors, 0);

        manager.remember("good", "alice", Role::User).await.unwrap();
        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.indexed_vectors, 1);
    }

    #[tokio::test]
    async fn test_slow_embedding_times_out() {
        let store = MessageStore::open_in_memory().unwrap();
        let config = MemoryConfig {
            retrieval: RetrievalConfig::default(),
            index_path: None,
            embed_timeout: Duration::from_millis(50),
        };
        let manager = MemoryManager::open(store, Arc::new(SlowEmbedder), config).unwrap();

        let err = manager.remember("anything", "alice", Role::User).await.unwrap_err();
        assert!(matches!(err, MemoryError::EmbeddingTimeout(_)));
        assert_eq!(manager.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_reload_matches_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("messages.db");
        let index_path = dir.path().join("index.bin");
        let config = MemoryConfig {
            retrieval: RetrievalConfig::default(),
            index_path: Some(index_path.clone()),
            embed_timeout: Duration::from_secs(5),
        };

        {
            let store = MessageStore::open(&db_path).unwrap();
            let manager =
                MemoryManager::open(store, Arc::new(greeting_embedder()), config.clone()).unwrap();
            manager.remember("hello", "alice", Role::User).await.unwrap();
            manager.remember("goodbye", "alice", Role::User).await.unwrap();
            manager.flush().await.unwrap();
        }
        assert!(index_path.exists());

        // Reopen from the snapshot
        let store = MessageStore::open(&db_path).unwrap();
        let from_snapshot =
            MemoryManager::open(store, Arc::new(greeting_embedder()), config.clone()).unwrap();

        // Reopen once more with no snapshot, forcing a rebuild
        let store = MessageStore::open(&db_path).unwrap();
        let rebuild_config = MemoryConfig {
            index_path: None,
            ..config
        };
        let from_rebuild =
            MemoryManager::open(store, Arc::new(greeting_embedder()), rebuild_config).unwrap();

        let a = from_snapshot.recall("hi", "alice").await.unwrap();
        let b = from_rebuild.recall("hi", "alice").await.unwrap();
        assert_eq!(a.len(), b.len());
        let ids_a: Vec<i64> = a.iter().map(|r| r.id).collect();
        let ids_b: Vec<i64> = b.iter().map(|r| r.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_persister_writes_snapshot_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("index.bin");
        let store = MessageStore::open_in_memory().unwrap();
        let config = MemoryConfig {
            retrieval: RetrievalConfig::default(),
            index_path: Some(index_path.clone()),
            embed_timeout: Duration::from_secs(5),
        };
        let manager =
            Arc::new(MemoryManager::open(store, Arc::new(greeting_embedder()), config).unwrap());

        let persister = Arc::clone(&manager).spawn_persister(Duration::from_millis(10));
        manager.remember("hello", "alice", Role::User).await.unwrap();

        // Plenty of ticks for the background save to land
        tokio::time::sleep(Duration::from_millis(300)).await;
        persister.abort();

        let snapshot = VectorIndex::load(&index_path).unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_index_restores_search() {
        let manager = manager_with(greeting_embedder(), RetrievalConfig::default());
        manager.remember("hello", "alice", Role::User).await.unwrap();
        manager.remember("goodbye", "alice", Role::User).await.unwrap();

        let rebuilt = manager.rebuild_index().await.unwrap();
        assert_eq!(rebuilt, 2);

        let results = manager.recall("hi", "alice").await.unwrap();
        assert!(!results.is_empty());
    }
}
