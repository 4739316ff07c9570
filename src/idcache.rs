//! Rolling document-ID cache.
//!
//! The CDC producer needs uniform random selection over the IDs it has
//! inserted so far, at O(1) per operation — this cache is the hot path of
//! the workload loop. A dense vector provides the random selection; a map
//! from ID to vector slot makes membership and removal O(1) via
//! swap-with-last.

use rand::Rng;
use std::collections::{HashMap, HashSet};

/// Capacity-bounded ID cache with O(1) add/remove/lookup/random-pick.
#[derive(Debug)]
pub struct DocumentIdCache {
    capacity: usize,
    ids: Vec<String>,
    slots: HashMap<String, usize>,
    tombstones: HashSet<String>,
}

impl DocumentIdCache {
    /// A cache holding at most `capacity` IDs. Zero is rounded up to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DocumentIdCache {
            capacity,
            ids: Vec::with_capacity(capacity),
            slots: HashMap::with_capacity(capacity),
            tombstones: HashSet::new(),
        }
    }

    /// Number of tracked IDs, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the cache tracks nothing.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether `id` is tracked.
    pub fn has(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Whether `id` is tracked but logically deleted.
    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }

    /// Tracks `id`, evicting the entry in slot 0 when at capacity. Re-adding
    /// a tracked ID clears its tombstone.
    pub fn add(&mut self, id: impl Into<String>) {
        let id = id.into();
        if let Some(_slot) = self.slots.get(&id) {
            self.tombstones.remove(&id);
            return;
        }
        if self.ids.len() >= self.capacity {
            self.evict_slot_zero();
        }
        self.slots.insert(id.clone(), self.ids.len());
        self.ids.push(id);
    }

    /// Stops tracking `id`. Returns whether it was tracked.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(slot) = self.slots.remove(id) else {
            return false;
        };
        self.tombstones.remove(id);
        let last = self.ids.len() - 1;
        self.ids.swap(slot, last);
        self.ids.pop();
        if slot < self.ids.len() {
            self.slots.insert(self.ids[slot].clone(), slot);
        }
        true
    }

    /// Marks `id` as logically deleted while keeping it in the selection
    /// pool. Returns whether it was tracked.
    pub fn tombstone(&mut self, id: &str) -> bool {
        if self.slots.contains_key(id) {
            self.tombstones.insert(id.to_owned());
            true
        } else {
            false
        }
    }

    /// Picks a tracked ID uniformly at random.
    pub fn get_random(&self, rng: &mut impl Rng) -> Option<&str> {
        if self.ids.is_empty() {
            return None;
        }
        Some(self.ids[rng.gen_range(0..self.ids.len())].as_str())
    }

    /// Iterates over tracked IDs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    fn evict_slot_zero(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        let last = self.ids.len() - 1;
        self.ids.swap(0, last);
        if let Some(evicted) = self.ids.pop() {
            self.slots.remove(&evicted);
            self.tombstones.remove(&evicted);
        }
        if !self.ids.is_empty() {
            self.slots.insert(self.ids[0].clone(), 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_hc::Hc128Rng;
    use std::collections::BTreeSet;

    fn rng() -> Hc128Rng {
        Hc128Rng::from_seed([3; 32])
    }

    #[test]
    fn add_remove_has_round_trip() {
        let mut cache = DocumentIdCache::new(10);
        cache.add("a");
        cache.add("b");
        assert!(cache.has("a"));
        assert_eq!(cache.len(), 2);
        assert!(cache.remove("a"));
        assert!(!cache.has("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_evicts_slot_zero() {
        let mut cache = DocumentIdCache::new(3);
        for id in ["a", "b", "c"] {
            cache.add(id);
        }
        cache.add("d");
        assert_eq!(cache.len(), 3);
        assert!(!cache.has("a"));
        assert!(cache.has("d"));
    }

    #[test]
    fn membership_matches_iteration_after_churn() {
        let mut cache = DocumentIdCache::new(64);
        for i in 0..200 {
            cache.add(format!("id-{i}"));
            if i % 3 == 0 {
                cache.remove(&format!("id-{}", i / 2));
            }
        }
        let iterated: BTreeSet<String> = cache.iter().map(str::to_owned).collect();
        assert_eq!(iterated.len(), cache.len());
        for id in &iterated {
            assert!(cache.has(id));
        }
        // And the other direction: every random pick is iterable.
        let mut rng = rng();
        for _ in 0..50 {
            let picked = cache.get_random(&mut rng).unwrap().to_owned();
            assert!(iterated.contains(&picked));
        }
    }

    #[test]
    fn random_pick_covers_all_entries() {
        let mut cache = DocumentIdCache::new(8);
        for i in 0..8 {
            cache.add(format!("{i}"));
        }
        let mut rng = rng();
        let seen: BTreeSet<String> = (0..400)
            .filter_map(|_| cache.get_random(&mut rng).map(str::to_owned))
            .collect();
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn tombstones_keep_ids_selectable() {
        let mut cache = DocumentIdCache::new(4);
        cache.add("a");
        cache.add("b");
        assert!(cache.tombstone("a"));
        assert!(cache.has("a"));
        assert!(cache.is_tombstoned("a"));
        assert_eq!(cache.len(), 2);
        // Removal clears the tombstone for good.
        cache.remove("a");
        assert!(!cache.is_tombstoned("a"));
        // Re-adding a tombstoned ID revives it.
        cache.add("b");
        cache.tombstone("b");
        cache.add("b");
        assert!(!cache.is_tombstoned("b"));
    }

    #[test]
    fn empty_cache_yields_nothing() {
        let cache = DocumentIdCache::new(4);
        assert!(cache.get_random(&mut rng()).is_none());
    }
}
