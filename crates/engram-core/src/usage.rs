//! Usage tracking and composite scoring.
//!
//! Tracks per-memory retrieval counts and computes the blended ranking
//! signal: semantic similarity, recency of use, usage frequency, and the
//! lifecycle decay weight. Weights come from configuration and sum to 1.0.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::model::LifecycleState;

/// Per-memory usage counters.
#[derive(Debug, Clone, Default)]
pub struct UsageStats {
    pub use_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    /// Estimated tokens served from this memory's content.
    pub tokens_served: u64,
}

/// Recency half-life for the recency component, in days.
const RECENCY_HALF_LIFE_DAYS: f64 = 7.0;

/// Service-local tracker guarded by a mutex; counter atomicity is not a
/// correctness requirement, cross-service aggregation is best-effort.
pub struct UsageTracker {
    weights: [f64; 4],
    stats: Mutex<HashMap<String, UsageStats>>,
}

impl UsageTracker {
    pub fn new(weights: [f64; 4]) -> Self {
        Self {
            weights,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_usage_stats(&self, memory_id: &str) -> Option<UsageStats> {
        self.stats.lock().ok()?.get(memory_id).cloned()
    }

    /// Record one retrieval batch: every surfaced memory counts as used.
    pub fn record_batch(&self, entries: &[(String, usize)]) {
        let Ok(mut stats) = self.stats.lock() else {
            return;
        };
        let now = Utc::now();
        for (memory_id, content_len) in entries {
            let entry = stats.entry(memory_id.clone()).or_default();
            entry.use_count += 1;
            entry.last_used = Some(now);
            // Rough 4-chars-per-token estimate for analytics.
            entry.tokens_served += (*content_len as u64).div_ceil(4);
        }
    }

    /// Blend similarity with recency, usage, and lifecycle decay.
    ///
    /// `composite = w_s*sim + w_r*recency + w_u*log1p(use_count)/log1p(100)
    ///            + w_l*lifecycle_weight`
    pub fn composite_score(
        &self,
        similarity: f64,
        last_used: Option<DateTime<Utc>>,
        use_count: u64,
        lifecycle: LifecycleState,
        now: DateTime<Utc>,
    ) -> f64 {
        let [w_s, w_r, w_u, w_l] = self.weights;

        let recency = match last_used {
            Some(used) => {
                let days = (now - used).num_seconds().max(0) as f64 / 86_400.0;
                0.5f64.powf(days / RECENCY_HALF_LIFE_DAYS)
            }
            None => 0.0,
        };
        // Saturates at ~100 uses so heavy hitters cannot drown similarity.
        let usage = ((1.0 + use_count as f64).ln() / (1.0 + 100.0f64).ln()).min(1.0);

        w_s * similarity + w_r * recency + w_u * usage + w_l * lifecycle.weight()
    }

    /// Ids with the highest use counts, for analytics.
    pub fn most_used(&self, limit: usize) -> Vec<(String, UsageStats)> {
        let Ok(stats) = self.stats.lock() else {
            return Vec::new();
        };
        let mut entries: Vec<(String, UsageStats)> = stats
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        entries.sort_by(|a, b| b.1.use_count.cmp(&a.1.use_count).then(a.0.cmp(&b.0)));
        entries.truncate(limit);
        entries
    }

    /// Total tokens served across all memories.
    pub fn total_tokens_served(&self) -> u64 {
        self.stats
            .lock()
            .map(|stats| stats.values().map(|s| s.tokens_served).sum())
            .unwrap_or(0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> UsageTracker {
        UsageTracker::new([0.6, 0.2, 0.1, 0.1])
    }

    #[test]
    fn test_record_batch_counts() {
        let tracker = tracker();
        tracker.record_batch(&[("a".to_string(), 400), ("b".to_string(), 40)]);
        tracker.record_batch(&[("a".to_string(), 400)]);

        let a = tracker.get_usage_stats("a").unwrap();
        assert_eq!(a.use_count, 2);
        assert!(a.last_used.is_some());
        assert_eq!(a.tokens_served, 200);
        assert!(tracker.get_usage_stats("missing").is_none());
    }

    #[test]
    fn test_composite_orders_by_similarity_when_rest_equal() {
        let tracker = tracker();
        let now = Utc::now();
        let high = tracker.composite_score(0.9, None, 0, LifecycleState::Active, now);
        let low = tracker.composite_score(0.2, None, 0, LifecycleState::Active, now);
        assert!(high > low);
    }

    #[test]
    fn test_recent_use_beats_stale_use() {
        let tracker = tracker();
        let now = Utc::now();
        let fresh = tracker.composite_score(
            0.5,
            Some(now - chrono::Duration::hours(1)),
            3,
            LifecycleState::Active,
            now,
        );
        let stale = tracker.composite_score(
            0.5,
            Some(now - chrono::Duration::days(60)),
            3,
            LifecycleState::Active,
            now,
        );
        assert!(fresh > stale);
    }

    #[test]
    fn test_lifecycle_decay_lowers_score() {
        let tracker = tracker();
        let now = Utc::now();
        let active = tracker.composite_score(0.5, None, 0, LifecycleState::Active, now);
        let stale = tracker.composite_score(0.5, None, 0, LifecycleState::Stale, now);
        assert!(active > stale);
    }

    #[test]
    fn test_most_used_ranking() {
        let tracker = tracker();
        tracker.record_batch(&[("a".to_string(), 4)]);
        tracker.record_batch(&[("a".to_string(), 4), ("b".to_string(), 4)]);
        let top = tracker.most_used(5);
        assert_eq!(top[0].0, "a");
        assert_eq!(top[0].1.use_count, 2);
    }
}
