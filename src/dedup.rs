//! Time-decayed membership sets for delivery deduplication.
//!
//! One generic structure serves both scopes: the per-source "already
//! surfaced" cache and the per-channel "already delivered" log. Membership
//! is a hash lookup; age-based eviction runs on every `mark` via a min-heap
//! of `(timestamp, key)` entries with lazy deletion, so re-marking a key
//! advances its eviction clock without an O(n) removal.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{ChannelId, Source, TrackId};

/// Source-scope key: items already surfaced by the poller for a source.
pub type SeenKey = (Source, TrackId);

/// Delivery-scope key: items already sent to a specific channel.
pub type DeliveryKey = (ChannelId, TrackId);

/// Bounded set of recently marked keys. Entries expire `retention` after
/// their most recent mark. There is no removal operation — dedup state only
/// grows until eviction.
#[derive(Debug)]
pub struct DecaySet<K> {
    last_marked: HashMap<K, DateTime<Utc>>,
    by_age: BinaryHeap<Reverse<(DateTime<Utc>, K)>>,
    retention: chrono::Duration,
}

impl<K: Eq + Hash + Ord + Clone> DecaySet<K> {
    pub fn new(retention: Duration) -> Self {
        Self {
            last_marked: HashMap::new(),
            by_age: BinaryHeap::new(),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// O(1). Entries past retention may linger until the next `mark`; that
    /// only suppresses duplicates longer, never re-delivers.
    pub fn contains(&self, key: &K) -> bool {
        self.last_marked.contains_key(key)
    }

    /// Mark a key as seen now. Idempotent; a re-mark refreshes the entry's
    /// eviction clock.
    pub fn mark(&mut self, key: K) {
        self.mark_at(key, Utc::now());
    }

    /// Mark with an explicit timestamp (cold-start restore path).
    pub fn mark_at(&mut self, key: K, at: DateTime<Utc>) {
        self.last_marked.insert(key.clone(), at);
        self.by_age.push(Reverse((at, key)));
        self.evict(at);
    }

    pub fn len(&self) -> usize {
        self.last_marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_marked.is_empty()
    }

    /// Pop heap entries older than the cutoff. A popped entry only removes
    /// the key if it is still the key's most recent mark; stale entries
    /// (superseded by a re-mark) are dropped without touching the map.
    fn evict(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return;
        };
        while let Some(Reverse((ts, _))) = self.by_age.peek() {
            if *ts >= cutoff {
                break;
            }
            let Some(Reverse((ts, key))) = self.by_age.pop() else {
                break;
            };
            if self.last_marked.get(&key) == Some(&ts) {
                self.last_marked.remove(&key);
            }
        }
    }
}
