//! Dirty-row queue
//!
//! Writers enqueue the key of every row they touch; the flush scheduler
//! periodically claims the keys whose embedded base time has aged past the
//! cutoff. Keys order by `(base_time, full_key)` so all rows of the same
//! hour cluster together and get flushed as one generational cohort.
//!
//! The ordered set hides behind this component; an atomic counter tracks
//! cardinality so sizing the next batch never walks the structure.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::store::{base_time_from_key, pretty_key, TIMESTAMP_BYTES};

/// Entry ordering: base time first, full key as the tiebreak.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    base_time: u32,
    key: Vec<u8>,
}

/// Time-ordered set of row keys awaiting compaction
pub struct DirtyRowQueue {
    entries: Mutex<BTreeSet<QueueEntry>>,
    /// Cardinality tracked separately so batch sizing stays O(1)
    size: AtomicUsize,
    metric_width: usize,
    /// Modulus of the randomized claim skip; 0 disables the skip
    jitter_modulus: u64,
}

impl DirtyRowQueue {
    /// Create a queue for keys carrying `metric_width` metric-id bytes
    pub fn new(metric_width: usize, jitter_modulus: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeSet::new()),
            size: AtomicUsize::new(0),
            metric_width,
            jitter_modulus,
        }
    }

    /// Mark a row as dirty. Re-enqueueing a present key is a no-op.
    pub fn enqueue(&self, key: &[u8]) {
        let Some(base_time) = base_time_from_key(key, self.metric_width) else {
            warn!(
                key = %pretty_key(key),
                min_len = self.metric_width + TIMESTAMP_BYTES,
                "ignoring row key too short to carry a base time"
            );
            return;
        };
        let entry = QueueEntry {
            base_time,
            key: key.to_vec(),
        };
        let inserted = self.entries.lock().unwrap().insert(entry);
        if inserted {
            self.size.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove and return up to `budget` keys whose base time is at or below
    /// `cutoff`, oldest first.
    ///
    /// A cheap randomized skip (hash of the key against a per-call seed)
    /// leaves roughly `1/modulus` of the candidates queued, so concurrent
    /// claimers on wide deployments stop thrashing on the same prefix. A
    /// skipped key is picked up by a later call.
    pub fn claim_batch(&self, cutoff: u32, budget: usize) -> Vec<Vec<u8>> {
        if budget == 0 {
            return Vec::new();
        }
        let seed = if self.jitter_modulus >= 2 {
            Some(now_ns() % self.jitter_modulus)
        } else {
            None
        };

        let mut entries = self.entries.lock().unwrap();
        let mut claimed: Vec<QueueEntry> = Vec::new();
        for entry in entries.iter() {
            if claimed.len() >= budget {
                break;
            }
            if entry.base_time > cutoff {
                // Entries are time-ordered: everything beyond is newer.
                break;
            }
            if let Some(seed) = seed {
                if key_hash(&entry.key) % self.jitter_modulus == seed {
                    continue;
                }
            }
            claimed.push(entry.clone());
        }
        for entry in &claimed {
            entries.remove(entry);
        }
        drop(entries);

        self.size.fetch_sub(claimed.len(), Ordering::Relaxed);
        claimed.into_iter().map(|entry| entry.key).collect()
    }

    /// Approximate number of queued keys; converges once enqueues quiesce
    pub fn approx_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Drop every queued key, returning how many were discarded.
    ///
    /// Compaction debt is recoverable; this is the last-resort relief valve
    /// when the queue itself must be shed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let dropped = entries.len();
        entries.clear();
        drop(entries);
        self.size.store(0, Ordering::Relaxed);
        dropped
    }
}

fn key_hash(key: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}
