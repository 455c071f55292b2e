//! LRU-Freq (C2): a Byte-LRU overlaid with a frequency index.
//!
//! Eviction stays recency-based — identical to [`ByteLru`] — the
//! frequency index exists only to support *enumeration* (what to
//! advertise or prefetch), never to decide what to drop. Coupling the
//! two would orphan secondary-index entries whenever an id was evicted
//! for being cold while still "frequent" on paper.

use std::collections::{BTreeMap, HashMap};

use crate::byte_lru::ByteLru;

/// A Byte-LRU cache with an additional frequency → ids-in-insertion-
/// order secondary index.
#[derive(Debug)]
pub struct LruFreq {
    lru: ByteLru,
    freq: HashMap<String, u64>,
    buckets: BTreeMap<u64, Vec<String>>,
}

impl LruFreq {
    /// Creates an empty cache with the given total byte capacity.
    pub fn new(capacity: u64) -> Self {
        Self {
            lru: ByteLru::new(capacity),
            freq: HashMap::new(),
            buckets: BTreeMap::new(),
        }
    }

    /// Returns the cache's total byte capacity.
    pub fn capacity(&self) -> u64 {
        self.lru.capacity()
    }

    /// Returns the number of entries currently cached.
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    /// Returns the sum of sizes of all cached entries.
    pub fn byte_size(&self) -> u64 {
        self.lru.byte_size()
    }

    /// Returns `true` iff `id` is present. Does not touch recency.
    pub fn contains(&self, id: &str) -> bool {
        self.lru.contains(id)
    }

    /// Returns `id`'s current frequency, or `None` if absent.
    pub fn frequency(&self, id: &str) -> Option<u64> {
        self.freq.get(id).copied()
    }

    /// Admits `id` with the given `size`.
    ///
    /// If absent, inserts at recency-MRU with `freq = 1`. If present,
    /// increments the stored frequency and moves `id` into the next
    /// bucket, in both cases refreshing recency via the underlying
    /// [`ByteLru`].
    pub fn admit(&mut self, id: &str, size: u64) {
        if size > self.lru.capacity() {
            return;
        }
        let previous_freq = self.freq.get(id).copied();
        let evicted = self.lru.admit_reporting_evictions(id, size);
        for (evicted_id, _) in evicted {
            self.forget(&evicted_id);
        }

        let new_freq = previous_freq.unwrap_or(0) + 1;
        if let Some(old_freq) = previous_freq {
            self.remove_from_bucket(old_freq, id);
        }
        self.freq.insert(id.to_string(), new_freq);
        self.buckets.entry(new_freq).or_default().push(id.to_string());
    }

    /// Forces `id`'s frequency to exactly `f`, repairing both indices.
    /// No-op if `id` is not present.
    pub fn set_freq(&mut self, id: &str, f: u64) {
        if !self.lru.contains(id) {
            return;
        }
        if let Some(old_freq) = self.freq.get(id).copied() {
            self.remove_from_bucket(old_freq, id);
        }
        self.freq.insert(id.to_string(), f);
        self.buckets.entry(f).or_default().push(id.to_string());
    }

    /// Enumerates `(id, size, freq)` from the most-recently-used entry
    /// to the least, ignoring frequency.
    pub fn iterate_most_recent_first(&self) -> impl Iterator<Item = (&str, u64, u64)> + '_ {
        self.lru
            .iterate_most_recent_first()
            .map(move |(id, size)| (id, size, *self.freq.get(id).unwrap_or(&0)))
    }

    /// Enumerates ids in descending frequency; within a bucket, in
    /// insertion order (the spec only requires "any order" — insertion
    /// order is a convenient, deterministic choice).
    pub fn iterate_most_frequent_first(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.buckets.iter().rev().flat_map(|(&freq, ids)| {
            ids.iter().map(move |id| (id.as_str(), freq))
        })
    }

    fn remove_from_bucket(&mut self, freq: u64, id: &str) {
        if let Some(ids) = self.buckets.get_mut(&freq) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.buckets.remove(&freq);
            }
        }
    }

    fn forget(&mut self, id: &str) {
        if let Some(freq) = self.freq.remove(id) {
            self.remove_from_bucket(freq, id);
        }
    }

    /// Debug-only consistency check used by tests: every id in the
    /// frequency map is in exactly the bucket matching its frequency,
    /// and every bucket only contains ids present in the cache.
    #[cfg(test)]
    fn assert_consistent(&self) {
        for (id, &f) in &self.freq {
            assert!(self.lru.contains(id));
            assert!(self.buckets.get(&f).is_some_and(|ids| ids.contains(id)));
        }
        for (&f, ids) in &self.buckets {
            for id in ids {
                assert_eq!(self.freq.get(id), Some(&f));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_lru_freq_override() {
        let mut cache = LruFreq::new(100);
        cache.admit("X", 10);
        assert_eq!(cache.frequency("X"), Some(1));

        cache.set_freq("X", 5);
        cache.assert_consistent();

        let mut it = cache.iterate_most_frequent_first();
        assert_eq!(it.next(), Some(("X", 5)));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn repeated_admits_bump_frequency_and_move_buckets() {
        let mut cache = LruFreq::new(100);
        cache.admit("A", 10);
        cache.admit("A", 10);
        cache.admit("A", 10);
        assert_eq!(cache.frequency("A"), Some(3));
        cache.assert_consistent();
    }

    #[test]
    fn eviction_removes_frequency_metadata_for_evicted_ids() {
        let mut cache = LruFreq::new(50);
        cache.admit("A", 40);
        cache.admit("A", 40);
        cache.admit("B", 40); // evicts A
        assert!(!cache.contains("A"));
        assert_eq!(cache.frequency("A"), None);
        cache.assert_consistent();
    }

    #[test]
    fn most_frequent_first_orders_descending_with_mru_order_within_bucket() {
        let mut cache = LruFreq::new(100);
        cache.admit("low", 10);
        cache.admit("high", 10);
        cache.admit("high", 10);
        let seq: Vec<&str> = cache.iterate_most_frequent_first().map(|(id, _)| id).collect();
        assert_eq!(seq, vec!["high", "low"]);
    }

    #[test]
    fn eviction_is_still_recency_based_not_frequency_based() {
        let mut cache = LruFreq::new(100);
        cache.admit("hot", 10);
        for _ in 0..10 {
            cache.admit("hot", 10);
        }
        cache.admit("cold", 50); // fills remaining capacity without touching "hot"
        assert!(cache.contains("hot"));
        assert!(cache.contains("cold"));

        // Refresh "cold" to MRU, leaving "hot" as the sole LRU entry,
        // despite "hot" having by far the higher frequency.
        cache.admit("cold", 50);
        cache.admit("filler", 50); // needs to evict LRU entry = "hot"
        assert!(!cache.contains("hot"));
        assert!(cache.contains("cold"));
        assert!(cache.contains("filler"));
        cache.assert_consistent();
    }

    #[test]
    fn invariant_every_id_in_exactly_one_matching_bucket() {
        let mut cache = LruFreq::new(97);
        for i in 0..300 {
            cache.admit(&format!("id-{}", i % 11), 7);
            cache.assert_consistent();
        }
    }
}
