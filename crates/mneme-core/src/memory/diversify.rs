//! ============================================================================
//! Diversifier - Near-duplicate suppression over ranked candidates
//! ============================================================================
//! Collapses redundant retrieval results so the final k messages cover
//! different facets of the history:
//! - Few candidates (<= k): greedy scan keeping items dissimilar to all
//!   previously kept ones
//! - Many candidates (> k): k-means clustering, one representative per
//!   cluster, topped up greedily; falls back to the greedy scan when
//!   clustering degenerates
//!
//! Two results whose cosine similarity reaches the cutoff never co-occur,
//! regardless of which path produced them. Clustering is seeded, so the
//! same candidate set always selects the same messages.
//! ============================================================================

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::warn;

use super::index::squared_l2;
use super::types::ScoredCandidate;

/// Default seed for the clustering RNG
pub const DEFAULT_CLUSTER_SEED: u64 = 42;

const MAX_KMEANS_ITERATIONS: usize = 100;

/// Cosine similarity of two vectors; zero-norm inputs yield 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Pick up to `k` mutually dissimilar candidates, preserving ranked order
/// within the selection.
pub fn select_diverse(
    candidates: &[ScoredCandidate],
    k: usize,
    similarity_cutoff: f32,
    seed: u64,
) -> Vec<ScoredCandidate> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    if candidates.len() <= k {
        return greedy_select(candidates, k, similarity_cutoff);
    }

    let vectors: Vec<&[f32]> = candidates
        .iter()
        .map(|c| c.record.embedding.as_slice())
        .collect();
    let n_clusters = k.min(candidates.len());

    match kmeans(&vectors, n_clusters, seed) {
        Ok(clustering) => cluster_select(candidates, k, similarity_cutoff, &clustering),
        Err(e) => {
            warn!("Clustering failed ({}), falling back to greedy selection", e);
            greedy_select(candidates, k, similarity_cutoff)
        }
    }
}

/// Keep each candidate in order unless it is too similar to one already kept
fn greedy_select(
    candidates: &[ScoredCandidate],
    k: usize,
    similarity_cutoff: f32,
) -> Vec<ScoredCandidate> {
    let mut selected: Vec<&ScoredCandidate> = Vec::with_capacity(k);

    for candidate in candidates {
        if selected.len() >= k {
            break;
        }
        if is_distinct(candidate, &selected, similarity_cutoff) {
            selected.push(candidate);
        }
    }

    selected.into_iter().cloned().collect()
}

/// One representative per cluster (nearest member to its centroid), then a
/// greedy top-up over the remaining candidates. Every acceptance, including
/// the representatives, honors the similarity cutoff.
fn cluster_select(
    candidates: &[ScoredCandidate],
    k: usize,
    similarity_cutoff: f32,
    clustering: &KMeansResult,
) -> Vec<ScoredCandidate> {
    let mut selected: Vec<&ScoredCandidate> = Vec::with_capacity(k);
    let mut taken = vec![false; candidates.len()];

    for (cluster, centroid) in clustering.centroids.iter().enumerate() {
        let mut representative: Option<(usize, f32)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            if clustering.assignments[i] != cluster {
                continue;
            }
            let distance = squared_l2(&candidate.record.embedding, centroid);
            let closer = match representative {
                Some((_, best)) => distance < best,
                None => true,
            };
            if closer {
                representative = Some((i, distance));
            }
        }

        if let Some((i, _)) = representative {
            if is_distinct(&candidates[i], &selected, similarity_cutoff) {
                selected.push(&candidates[i]);
                taken[i] = true;
            }
        }
    }

    // Fill any remaining room from the ranked order
    for (i, candidate) in candidates.iter().enumerate() {
        if selected.len() >= k {
            break;
        }
        if taken[i] {
            continue;
        }
        if is_distinct(candidate, &selected, similarity_cutoff) {
            selected.push(candidate);
            taken[i] = true;
        }
    }

    selected.into_iter().cloned().collect()
}

fn is_distinct(
    candidate: &ScoredCandidate,
    selected: &[&ScoredCandidate],
    similarity_cutoff: f32,
) -> bool {
    selected.iter().all(|kept| {
        cosine_similarity(&kept.record.embedding, &candidate.record.embedding) < similarity_cutoff
    })
}

// ============================================================================
// K-means
// ============================================================================

#[derive(Debug, thiserror::Error)]
enum ClusteringError {
    #[error("no vectors to cluster")]
    EmptyInput,
    #[error("cluster {0} has no members")]
    EmptyCluster(usize),
    #[error("centroid became non-finite")]
    NonFiniteCentroid,
}

struct KMeansResult {
    /// Cluster id for each input vector
    assignments: Vec<usize>,
    centroids: Vec<Vec<f32>>,
}

/// Seeded Lloyd's algorithm. Initial centroids are drawn from the input
/// without replacement; an iteration that empties a cluster is an error,
/// which callers treat as a signal to fall back to greedy selection.
fn kmeans(
    vectors: &[&[f32]],
    n_clusters: usize,
    seed: u64,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() || n_clusters == 0 {
        return Err(ClusteringError::EmptyInput);
    }
    let n_clusters = n_clusters.min(vectors.len());
    let dimension = vectors[0].len();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..vectors.len()).collect();
    indices.shuffle(&mut rng);
    let mut centroids: Vec<Vec<f32>> = indices[..n_clusters]
        .iter()
        .map(|&i| vectors[i].to_vec())
        .collect();

    let mut assignments = vec![0usize; vectors.len()];

    for _ in 0..MAX_KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, vector) in vectors.iter().enumerate() {
            let nearest = nearest_centroid(vector, &centroids);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0f32; dimension]; n_clusters];
        let mut counts = vec![0usize; n_clusters];
        for (i, vector) in vectors.iter().enumerate() {
            counts[assignments[i]] += 1;
            for (sum, value) in sums[assignments[i]].iter_mut().zip(vector.iter()) {
                *sum += value;
            }
        }

        for (cluster, count) in counts.iter().enumerate() {
            if *count == 0 {
                return Err(ClusteringError::EmptyCluster(cluster));
            }
            for sum in sums[cluster].iter_mut() {
                *sum /= *count as f32;
            }
            if sums[cluster].iter().any(|v| !v.is_finite()) {
                return Err(ClusteringError::NonFiniteCentroid);
            }
        }
        centroids = sums;

        if !changed {
            break;
        }
    }

    Ok(KMeansResult {
        assignments,
        centroids,
    })
}

/// Ties resolve to the lowest-index centroid
fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_l2(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MessageRecord, Role};

    fn candidate(id: i64, embedding: Vec<f32>) -> ScoredCandidate {
        let mut record =
            MessageRecord::new(format!("msg {}", id), "alice".to_string(), Role::User)
                .with_embedding(embedding);
        record.id = id;
        ScoredCandidate {
            record,
            raw_distance: 0.1,
            effective_distance: 0.1,
        }
    }

    #[test]
    fn test_cosine_similarity_values() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_empty_input_and_zero_k() {
        let candidates = vec![candidate(1, vec![1.0, 0.0])];
        assert!(select_diverse(&[], 3, 0.92, DEFAULT_CLUSTER_SEED).is_empty());
        assert!(select_diverse(&candidates, 0, 0.92, DEFAULT_CLUSTER_SEED).is_empty());
    }

    #[test]
    fn test_near_duplicates_never_co_occur() {
        // cos(a, b) ~ 0.9987, far above the cutoff
        let candidates = vec![
            candidate(1, vec![1.0, 0.0, 0.0]),
            candidate(2, vec![0.999, 0.05, 0.0]),
        ];
        let selected = select_diverse(&candidates, 2, 0.92, DEFAULT_CLUSTER_SEED);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].record.id, 1);
    }

    #[test]
    fn test_distinct_candidates_kept_in_order() {
        let candidates = vec![
            candidate(1, vec![1.0, 0.0, 0.0]),
            candidate(2, vec![0.0, 1.0, 0.0]),
            candidate(3, vec![0.0, 0.0, 1.0]),
        ];
        let selected = select_diverse(&candidates, 3, 0.92, DEFAULT_CLUSTER_SEED);
        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0].record.id, 1);
        assert_eq!(selected[1].record.id, 2);
        assert_eq!(selected[2].record.id, 3);
    }

    #[test]
    fn test_selection_capped_at_k() {
        let candidates = vec![
            candidate(1, vec![1.0, 0.0, 0.0]),
            candidate(2, vec![0.0, 1.0, 0.0]),
            candidate(3, vec![0.0, 0.0, 1.0]),
            candidate(4, vec![1.0, 1.0, 0.0]),
            candidate(5, vec![0.0, 1.0, 1.0]),
        ];
        let selected = select_diverse(&candidates, 2, 0.92, DEFAULT_CLUSTER_SEED);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_clustering_covers_each_group() {
        // Three orthogonal groups of exact duplicates. Whatever the cluster
        // layout, the cutoff keeps duplicates from co-occurring and the
        // top-up reaches every group.
        let candidates = vec![
            candidate(1, vec![1.0, 0.0, 0.0]),
            candidate(2, vec![1.0, 0.0, 0.0]),
            candidate(3, vec![0.0, 1.0, 0.0]),
            candidate(4, vec![0.0, 1.0, 0.0]),
            candidate(5, vec![0.0, 0.0, 1.0]),
            candidate(6, vec![0.0, 0.0, 1.0]),
        ];
        let selected = select_diverse(&candidates, 3, 0.92, DEFAULT_CLUSTER_SEED);
        assert_eq!(selected.len(), 3);

        for axis in 0..3 {
            let from_group = selected
                .iter()
                .filter(|c| c.record.embedding[axis] == 1.0)
                .count();
            assert_eq!(from_group, 1, "expected exactly one pick on axis {}", axis);
        }
    }

    #[test]
    fn test_identical_candidates_fall_back_to_one() {
        // All six vectors coincide, so every clustering attempt leaves some
        // cluster empty and the greedy fallback keeps a single message.
        let candidates: Vec<_> = (1..=6).map(|id| candidate(id, vec![1.0, 0.0])).collect();
        let selected = select_diverse(&candidates, 3, 0.92, DEFAULT_CLUSTER_SEED);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].record.id, 1);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let candidates: Vec<_> = (0..7)
            .map(|i| {
                let angle = i as f32 * 0.45;
                candidate(i as i64, vec![angle.cos(), angle.sin(), 0.1 * i as f32])
            })
            .collect();

        let first: Vec<i64> = select_diverse(&candidates, 3, 0.92, DEFAULT_CLUSTER_SEED)
            .iter()
            .map(|c| c.record.id)
            .collect();
        let second: Vec<i64> = select_diverse(&candidates, 3, 0.92, DEFAULT_CLUSTER_SEED)
            .iter()
            .map(|c| c.record.id)
            .collect();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
}
