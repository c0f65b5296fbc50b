//! In-process tracker of nonce-recovery attempts
//!
//! Process-local with no persistence: it only bounds retry storms, the nonce
//! store remains the source of truth for sequencing.

use dashmap::DashMap;

/// Thread-safe counter map keyed by partition key
#[derive(Default)]
pub struct RecoveryTracker {
    counters: DashMap<String, u64>,
}

impl RecoveryTracker {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Current number of recovery attempts for a key
    pub fn recovering(&self, key: &str) -> u64 {
        self.counters.get(key).map(|count| *count).unwrap_or(0)
    }

    /// Record one more recovery attempt
    pub fn recover(&self, key: &str) {
        *self.counters.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Clear the counter once the key converged
    pub fn recovered(&self, key: &str) {
        self.counters.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_and_resets() {
        let tracker = RecoveryTracker::new();
        assert_eq!(tracker.recovering("k"), 0);

        tracker.recover("k");
        tracker.recover("k");
        assert_eq!(tracker.recovering("k"), 2);
        assert_eq!(tracker.recovering("other"), 0);

        tracker.recovered("k");
        assert_eq!(tracker.recovering("k"), 0);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let tracker = Arc::new(RecoveryTracker::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    tracker.recover("shared");
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.recovering("shared"), 800);
    }
}
