//! The time-ordered set of dirty row keys awaiting compaction.
//!
//! Writers enqueue a row key every time they touch a row; the flush worker
//! claims batches of keys whose embedded base time has aged past the cutoff.
//! Keys order by `(base_time, full key)`, which clusters all rows of the
//! same generation so the worker drains them as a cohort.
//!
//! The backing container is deliberately not exposed; only the operations
//! below are the contract.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

use crate::store::RowKey;
use crate::util::ns_since_epoch;

/// Residue classes for the randomized claim skip. One class is skipped per
/// `claim_batch` call so concurrent claimers on wide deployments do not
/// thrash on the same key prefix. Tunable; nothing below depends on the
/// exact value.
pub const SKIP_BUCKETS: u64 = 3;

/// A set of dirty row keys ordered by `(base_time, full key)`, with an O(1)
/// approximate size. The ordered container's own size query walks the tree
/// and is unsuitable for the scheduler's per-tick sizing.
pub struct DirtyQueue {
    metric_width: u16,
    rows: Mutex<BTreeSet<(u32, Vec<u8>)>>,
    /// Kept next to the set rather than derived from it; may transiently
    /// lag the true cardinality but converges at quiescence.
    size: AtomicUsize,
}

impl DirtyQueue {
    pub fn new(metric_width: u16) -> Self {
        Self {
            metric_width,
            rows: Mutex::new(BTreeSet::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Insert a key. Idempotent: re-enqueueing a present key is a no-op and
    /// returns false. Keys too short to carry a base time are rejected.
    pub fn enqueue(&self, key: RowKey) -> bool {
        let Some(base_time) = key.base_time(self.metric_width) else {
            warn!("Ignoring row key too short for a base time: {}", key);
            return false;
        };
        let mut rows = self.rows.lock();
        let inserted = rows.insert((base_time, key.into_bytes()));
        if inserted {
            self.size.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Claim up to `budget` keys whose base time is at or below `cutoff`,
    /// in `(base_time, key)` order.
    ///
    /// One residue class of the key hash is skipped per call (seeded from
    /// the clock) to spread concurrent claimers apart; a later call with a
    /// different seed picks the skipped keys up. When the skip would starve
    /// the claim entirely, the skipped keys are claimed anyway so a sparse
    /// queue still drains.
    pub fn claim_batch(&self, cutoff: u32, budget: usize) -> Vec<RowKey> {
        if budget == 0 {
            return Vec::new();
        }
        let seed = ns_since_epoch() % SKIP_BUCKETS;

        let mut rows = self.rows.lock();
        let mut take: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut skipped: Vec<(u32, Vec<u8>)> = Vec::new();
        for entry in rows.iter() {
            if entry.0 > cutoff {
                // everything past this point is newer
                break;
            }
            if take.len() >= budget {
                break;
            }
            if xxh3_64(&entry.1) % SKIP_BUCKETS == seed {
                if skipped.len() < budget {
                    skipped.push(entry.clone());
                }
                continue;
            }
            take.push(entry.clone());
        }
        if take.is_empty() {
            take = skipped;
        }

        let mut claimed = Vec::with_capacity(take.len());
        for entry in take {
            if rows.remove(&entry) {
                self.size.fetch_sub(1, Ordering::Relaxed);
                claimed.push(RowKey::new(entry.1));
            }
        }
        claimed
    }

    /// The tracked cardinality. Cheap, possibly slightly stale.
    pub fn approx_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Drop every queued key and reset the counter. Compaction debt is
    /// recoverable: writers re-dirty any row that still matters.
    pub fn clear(&self) -> usize {
        let mut rows = self.rows.lock();
        let dropped = rows.len();
        rows.clear();
        self.size.store(0, Ordering::Relaxed);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `metric[3] | base_time[4] | tag`
    fn key(base_time: u32, tag: u8) -> RowKey {
        let mut bytes = vec![0x01, 0x02, 0x03];
        bytes.extend_from_slice(&base_time.to_be_bytes());
        bytes.push(tag);
        RowKey::new(bytes)
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let queue = DirtyQueue::new(3);
        assert!(queue.enqueue(key(100, 1)));
        assert!(!queue.enqueue(key(100, 1)));
        assert_eq!(queue.approx_size(), 1);
    }

    #[test]
    fn test_short_key_is_rejected() {
        crate::logging::reset_logging();
        let queue = DirtyQueue::new(3);
        assert!(!queue.enqueue(RowKey::new(vec![1, 2, 3])));
        assert_eq!(queue.approx_size(), 0);
    }

    #[test]
    fn test_claim_respects_cutoff() {
        let queue = DirtyQueue::new(3);
        queue.enqueue(key(100, 1));
        queue.enqueue(key(200, 2));
        queue.enqueue(key(5000, 3));

        let mut claimed = Vec::new();
        // several calls so the randomized skip cannot hide a key
        for _ in 0..8 {
            claimed.extend(queue.claim_batch(200, usize::MAX));
        }
        let mut bases: Vec<u32> = claimed.iter().map(|k| k.base_time(3).unwrap()).collect();
        bases.sort_unstable();
        assert_eq!(bases, vec![100, 200]);
        assert_eq!(queue.approx_size(), 1);
    }

    #[test]
    fn test_claim_orders_by_base_time_then_key() {
        let queue = DirtyQueue::new(3);
        queue.enqueue(key(300, 9));
        queue.enqueue(key(100, 5));
        queue.enqueue(key(100, 2));
        queue.enqueue(key(200, 7));

        let mut seen = Vec::new();
        for _ in 0..8 {
            let claimed = queue.claim_batch(u32::MAX, usize::MAX);
            // each call is individually ordered
            let bases: Vec<u32> = claimed.iter().map(|k| k.base_time(3).unwrap()).collect();
            let mut sorted = bases.clone();
            sorted.sort_unstable();
            assert_eq!(bases, sorted);
            seen.extend(claimed);
            if seen.len() == 4 {
                break;
            }
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(queue.approx_size(), 0);
    }

    #[test]
    fn test_starved_claim_still_drains() {
        let queue = DirtyQueue::new(3);
        queue.enqueue(key(100, 1));
        // one key: whatever the seed, one call must claim it
        let claimed = queue.claim_batch(u32::MAX, 10);
        assert_eq!(claimed.len(), 1);
        assert_eq!(queue.approx_size(), 0);
    }

    #[test]
    fn test_budget_is_honored() {
        let queue = DirtyQueue::new(3);
        for tag in 0..20 {
            queue.enqueue(key(100, tag));
        }
        let claimed = queue.claim_batch(u32::MAX, 5);
        assert!(claimed.len() <= 5);
        assert!(!claimed.is_empty());
        assert_eq!(queue.approx_size(), 20 - claimed.len());
    }

    #[test]
    fn test_size_converges_after_churn() {
        let queue = DirtyQueue::new(3);
        for tag in 0..50 {
            queue.enqueue(key(100, tag));
        }
        let mut drained = 0;
        while drained < 50 {
            drained += queue.claim_batch(u32::MAX, 7).len();
        }
        assert_eq!(queue.approx_size(), 0);
        assert!(queue.claim_batch(u32::MAX, usize::MAX).is_empty());
    }

    #[test]
    fn test_clear_resets_the_counter() {
        let queue = DirtyQueue::new(3);
        for tag in 0..10 {
            queue.enqueue(key(100, tag));
        }
        assert_eq!(queue.clear(), 10);
        assert_eq!(queue.approx_size(), 0);
    }
}
