//! ============================================================================
//! Ranker - Personalized scoring and filtering of search candidates
//! ============================================================================
//! Adjusts raw index distances per requesting user before thresholding:
//! - user affinity: flat bonus when the requester authored the message
//! - recency: bonus decaying linearly from full weight to zero over 24h
//!
//! Bonuses shrink the distance, so boosted candidates can pass a threshold
//! their raw distance would fail. Candidate order is the index's raw
//! nearest-first order and is never re-sorted after adjustment.
//! ============================================================================

use tracing::debug;

use crate::config::RetrievalConfig;

use super::index::SearchHit;
use super::types::{MessageRecord, Role, ScoredCandidate};

const SECONDS_PER_DAY: f32 = 86_400.0;

/// Recency bonus for a message of age `now - timestamp`, linearly decaying
/// to zero at 24 hours. Ages outside [0, 24h] clamp to the nearest end.
fn recency_bonus(now: i64, timestamp: i64, weight: f32) -> f32 {
    let age_days = ((now - timestamp) as f32 / SECONDS_PER_DAY).clamp(0.0, 1.0);
    weight * (1.0 - age_days)
}

/// Raw distance minus affinity and recency bonuses
pub fn effective_distance(
    raw_distance: f32,
    record: &MessageRecord,
    requester: &str,
    now: i64,
    config: &RetrievalConfig,
) -> f32 {
    let mut distance = raw_distance;
    if record.author == requester {
        distance -= config.user_affinity_bonus;
    }
    distance -= recency_bonus(now, record.timestamp, config.recency_weight);
    distance
}

/// Score resolved candidates and keep those strictly under the distance
/// threshold, preserving the incoming (nearest-first) order.
pub fn rank_candidates(
    resolved: Vec<(SearchHit, MessageRecord)>,
    requester: &str,
    now: i64,
    config: &RetrievalConfig,
    ignore_bot: bool,
) -> Vec<ScoredCandidate> {
    let mut kept = Vec::with_capacity(resolved.len());

    for (hit, record) in resolved {
        if ignore_bot && record.role == Role::Bot {
            continue;
        }

        let effective = effective_distance(hit.distance, &record, requester, now, config);
        debug!(
            slot = hit.slot,
            raw = hit.distance,
            effective,
            author = %record.author,
            "Scored retrieval candidate"
        );

        if effective < config.distance_threshold {
            kept.push(ScoredCandidate {
                record,
                raw_distance: hit.distance,
                effective_distance: effective,
            });
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(author: &str, role: Role, timestamp: i64) -> MessageRecord {
        MessageRecord::new("msg".to_string(), author.to_string(), role)
            .with_timestamp(timestamp)
    }

    fn hit(slot: u64, distance: f32) -> SearchHit {
        SearchHit { slot, distance }
    }

    #[test]
    fn test_bonuses_rescue_a_far_candidate() {
        // Raw 0.75 fails the 0.7 threshold, but affinity (0.5) plus a fresh
        // message's full recency bonus (0.2) bring it to 0.05.
        let config = RetrievalConfig::default();
        let now = 1_700_000_000;
        let candidate = record("alice", Role::User, now);

        let effective = effective_distance(0.75, &candidate, "alice", now, &config);
        assert!((effective - 0.05).abs() < 1e-6);

        let kept = rank_candidates(vec![(hit(0, 0.75), candidate)], "alice", now, &config, false);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].effective_distance - 0.05).abs() < 1e-6);
        assert!((kept[0].raw_distance - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_no_recency_bonus_past_one_day() {
        let config = RetrievalConfig::default();
        let now = 1_700_000_000;
        let stale = record("bob", Role::User, now - 90_000);

        let effective = effective_distance(0.5, &stale, "alice", now, &config);
        assert!((effective - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_recency_decays_linearly() {
        let config = RetrievalConfig::default();
        let now = 1_700_000_000;
        let half_day_old = record("bob", Role::User, now - 43_200);

        // Half the window gone, half the weight left
        let effective = effective_distance(0.5, &half_day_old, "alice", now, &config);
        assert!((effective - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_future_timestamp_caps_at_full_weight() {
        let config = RetrievalConfig::default();
        let now = 1_700_000_000;
        let from_the_future = record("bob", Role::User, now + 3_600);

        let effective = effective_distance(0.5, &from_the_future, "alice", now, &config);
        assert!((effective - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_strict() {
        let config = RetrievalConfig::default();
        let now = 1_700_000_000;
        // Old message by someone else: no bonuses, effective == raw == 0.7
        let candidate = record("bob", Role::User, now - 200_000);

        let kept = rank_candidates(vec![(hit(0, 0.7), candidate)], "alice", now, &config, false);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_ignore_bot_drops_bot_messages() {
        let config = RetrievalConfig::default();
        let now = 1_700_000_000;
        let resolved = vec![
            (hit(0, 0.1), record("alice", Role::User, now - 200_000)),
            (hit(1, 0.1), record("mneme", Role::Bot, now - 200_000)),
        ];

        let kept = rank_candidates(resolved, "alice", now, &config, true);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].record.role, Role::User);
    }

    #[test]
    fn test_order_follows_raw_distance_not_effective() {
        let config = RetrievalConfig::default();
        let now = 1_700_000_000;
        // The second candidate ends up with a smaller effective distance
        // than the first, but the raw nearest-first order must survive.
        let resolved = vec![
            (hit(0, 0.3), record("bob", Role::User, now - 200_000)),
            (hit(1, 0.4), record("alice", Role::User, now)),
        ];

        let kept = rank_candidates(resolved, "alice", now, &config, false);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].raw_distance - 0.3).abs() < 1e-6);
        assert!((kept[1].raw_distance - 0.4).abs() < 1e-6);
        assert!(kept[1].effective_distance < kept[0].effective_distance);
    }
}
