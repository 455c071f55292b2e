//! Byte-LRU (C1): a bounded byte-size ordered map with admit/evict.
//!
//! # Design
//!
//! A hash map from id to a slot index gives O(1) `contains`/`admit`; a
//! doubly linked list threaded through a flat slab of slots gives
//! ordered enumeration and O(1) eviction of the least-recently-used
//! entry. Slots freed by eviction or removal are recycled via a free
//! list rather than shifting the backing `Vec`, so every operation
//! this module exposes is O(1) amortized.
//!
//! The key invariant: **admission on an already-present id counts as a
//! use, not an insert** — so repeated requests never evict other
//! entries even if the size has grown, provided the new size fits
//! within `capacity`.

use std::collections::HashMap;

type SlotIndex = usize;

struct Slot {
    id: String,
    size: u64,
    prev: Option<SlotIndex>,
    next: Option<SlotIndex>,
}

/// A bounded byte-size LRU cache over string object ids.
///
/// `Σ size ≤ capacity` holds after every call to [`ByteLru::admit`].
#[derive(Debug)]
pub struct ByteLru {
    capacity: u64,
    current_size: u64,
    slots: Vec<Slot>,
    free: Vec<SlotIndex>,
    index: HashMap<String, SlotIndex>,
    /// Most-recently-used slot.
    head: Option<SlotIndex>,
    /// Least-recently-used slot.
    tail: Option<SlotIndex>,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish()
    }
}

impl ByteLru {
    /// Creates an empty cache with the given total byte capacity.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            current_size: 0,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Returns the cache's total byte capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the number of entries currently cached.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the sum of sizes of all cached entries.
    pub fn byte_size(&self) -> u64 {
        self.current_size
    }

    /// Returns `true` iff `id` is present. Does not touch recency.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Admits `id` with the given `size`.
    ///
    /// - If `size > capacity`: no-op, cache unchanged.
    /// - Else if `id` is present: removed then reinserted with the new
    ///   size as most-recent (refreshes recency and updates size).
    /// - Else: evicts least-recent entries while
    ///   `current_bytes + size > capacity`, then inserts `id` as
    ///   most-recent.
    pub fn admit(&mut self, id: &str, size: u64) {
        self.admit_reporting_evictions(id, size);
    }

    /// Same as [`ByteLru::admit`] but also returns every `(id, size)`
    /// pair evicted to make room. [`lru_freq`](crate::lru_freq) needs
    /// this to keep its frequency index in sync with entries this
    /// cache drops as a side effect of admitting a larger re-admission.
    pub(crate) fn admit_reporting_evictions(&mut self, id: &str, size: u64) -> Vec<(String, u64)> {
        let mut evicted = Vec::new();
        if size > self.capacity {
            return evicted;
        }
        if self.index.contains_key(id) {
            self.remove(id);
        }
        while self.current_size + size > self.capacity && !self.index.is_empty() {
            if let Some(pair) = self.evict_oldest() {
                evicted.push(pair);
            }
        }
        self.push_front(id.to_string(), size);
        evicted
    }

    /// Evicts and returns the least-recently-used `(id, size)` pair, or
    /// `None` if the cache is empty. Used only by `admit`; exposed for
    /// testing.
    pub fn evict_oldest(&mut self) -> Option<(String, u64)> {
        let tail = self.tail?;
        self.unlink(tail);
        let slot = self.remove_slot(tail);
        self.index.remove(&slot.id);
        self.current_size -= slot.size;
        Some((slot.id, slot.size))
    }

    /// Enumerates `(id, size)` pairs from most-recent to least-recent
    /// without mutating the cache.
    pub fn iterate_most_recent_first(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        MostRecentIter {
            lru: self,
            cursor: self.head,
        }
    }

    fn remove(&mut self, id: &str) {
        if let Some(&slot_idx) = self.index.get(id) {
            self.unlink(slot_idx);
            let slot = self.remove_slot(slot_idx);
            self.index.remove(&slot.id);
            self.current_size -= slot.size;
        }
    }

    fn push_front(&mut self, id: String, size: u64) {
        let slot = Slot {
            id: id.clone(),
            size,
            prev: None,
            next: self.head,
        };
        let idx = self.alloc_slot(slot);
        if let Some(old_head) = self.head {
            self.slots[old_head].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.index.insert(id, idx);
        self.current_size += size;
    }

    fn alloc_slot(&mut self, slot: Slot) -> SlotIndex {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = slot;
            idx
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        }
    }

    /// Removes a slot from the slab after it has already been unlinked
    /// from the list, returning it by value and recycling its index.
    fn remove_slot(&mut self, idx: SlotIndex) -> Slot {
        let placeholder = Slot {
            id: String::new(),
            size: 0,
            prev: None,
            next: None,
        };
        let slot = std::mem::replace(&mut self.slots[idx], placeholder);
        self.free.push(idx);
        slot
    }

    fn unlink(&mut self, idx: SlotIndex) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
    }
}

struct MostRecentIter<'a> {
    lru: &'a ByteLru,
    cursor: Option<SlotIndex>,
}

impl<'a> Iterator for MostRecentIter<'a> {
    type Item = (&'a str, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let slot = &self.lru.slots[idx];
        self.cursor = slot.next;
        Some((slot.id.as_str(), slot.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(lru: &ByteLru) -> Vec<(String, u64)> {
        lru.iterate_most_recent_first()
            .map(|(id, size)| (id.to_string(), size))
            .collect()
    }

    #[test]
    fn s1_pure_lru_one_node_capacity_100() {
        let mut lru = ByteLru::new(100);

        let outcomes: Vec<bool> = [("A", 40u64), ("B", 40), ("C", 40), ("A", 10)]
            .iter()
            .map(|(id, size)| {
                let hit = lru.contains(id);
                lru.admit(id, *size);
                hit
            })
            .collect();

        assert_eq!(outcomes, vec![false, false, false, true]);
        assert_eq!(order(&lru), vec![("A".to_string(), 10), ("C".to_string(), 40)]);
        assert_eq!(lru.byte_size(), 50);
    }

    #[test]
    fn admit_on_present_id_is_a_use_not_an_insert() {
        let mut lru = ByteLru::new(100);
        lru.admit("A", 40);
        lru.admit("B", 40);
        lru.admit("A", 40); // touch, should not evict B
        assert!(lru.contains("B"));
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.byte_size(), 80);
    }

    #[test]
    fn admit_updates_size_on_re_admission() {
        let mut lru = ByteLru::new(100);
        lru.admit("A", 40);
        lru.admit("A", 55);
        assert_eq!(lru.byte_size(), 55);
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn oversized_object_is_rejected_without_eviction() {
        let mut lru = ByteLru::new(100);
        lru.admit("A", 40);
        lru.admit("huge", 101);
        assert!(!lru.contains("huge"));
        assert_eq!(lru.byte_size(), 40);
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn boundary_zero_size_is_a_pure_touch() {
        let mut lru = ByteLru::new(100);
        lru.admit("A", 40);
        lru.admit("A", 0);
        assert_eq!(lru.byte_size(), 0);
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn boundary_size_equals_capacity_evicts_everything_else() {
        let mut lru = ByteLru::new(100);
        lru.admit("A", 40);
        lru.admit("B", 40);
        lru.admit("C", 100);
        assert_eq!(lru.len(), 1);
        assert!(lru.contains("C"));
        assert_eq!(lru.byte_size(), 100);
    }

    #[test]
    fn boundary_size_over_capacity_leaves_cache_unchanged() {
        let mut lru = ByteLru::new(100);
        lru.admit("A", 40);
        lru.admit("B", 101);
        assert_eq!(order(&lru), vec![("A".to_string(), 40)]);
    }

    #[test]
    fn invariant_capacity_never_exceeded_across_many_admits() {
        let mut lru = ByteLru::new(97);
        for i in 0..500 {
            lru.admit(&format!("id-{}", i % 17), (i % 23 + 1) as u64);
            assert!(lru.byte_size() <= lru.capacity());
        }
    }

    #[test]
    fn evict_oldest_returns_none_when_empty() {
        let mut lru = ByteLru::new(10);
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn slots_are_recycled_after_eviction() {
        let mut lru = ByteLru::new(10);
        for i in 0..100 {
            lru.admit(&format!("id-{i}"), 10);
        }
        assert_eq!(lru.len(), 1);
    }
}
