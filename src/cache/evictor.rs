//! Eviction policies for the local tier.
//!
//! The default policy retains everything. A bounded policy can be swapped in
//! without touching the backend contract: the store reports inserts and
//! accesses, and the policy answers with the keys to drop.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::cache::key::CacheKey;
use crate::config::{EvictionConfig, EvictionPolicyKind};

/// Decides which entries a size-bounded store should drop.
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Record that `key` now holds `size` bytes. Returns the keys to evict,
    /// never including `key` itself.
    fn on_insert(&mut self, key: &CacheKey, size: usize) -> Vec<CacheKey>;

    /// Record a read hit on `key`.
    fn on_access(&mut self, key: &CacheKey);

    /// Whether reads must be reported through [`on_access`](Self::on_access).
    /// Stores may serve reads under a shared lock when this is `false`.
    fn tracks_access(&self) -> bool {
        true
    }
}

/// Keep every entry forever. Holds no per-key state.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn on_insert(&mut self, _key: &CacheKey, _size: usize) -> Vec<CacheKey> {
        Vec::new()
    }

    fn on_access(&mut self, _key: &CacheKey) {}

    fn tracks_access(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct LruEntry {
    tick: u64,
    size: usize,
}

/// Least-recently-used eviction under a byte budget.
///
/// An entry larger than the whole budget is still admitted; everything else
/// is evicted to make room for it.
#[derive(Debug)]
pub struct Lru {
    capacity_bytes: usize,
    entries: HashMap<CacheKey, LruEntry>,
    /// Recency order: oldest tick first.
    order: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    total: usize,
}

impl Lru {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            total: 0,
        }
    }

    /// Bytes currently charged against the budget.
    pub fn tracked_bytes(&self) -> usize {
        self.total
    }

    fn bump(&mut self, key: &CacheKey) -> Option<&mut LruEntry> {
        let tick = self.next_tick;
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.clone());
        self.next_tick += 1;
        Some(entry)
    }
}

impl EvictionPolicy for Lru {
    fn on_insert(&mut self, key: &CacheKey, size: usize) -> Vec<CacheKey> {
        if let Some(entry) = self.bump(key) {
            let old = std::mem::replace(&mut entry.size, size);
            self.total = self.total - old + size;
        } else {
            let tick = self.next_tick;
            self.next_tick += 1;
            self.entries.insert(key.clone(), LruEntry { tick, size });
            self.order.insert(tick, key.clone());
            self.total += size;
        }

        let mut victims = Vec::new();
        while self.total > self.capacity_bytes {
            let Some((&tick, oldest)) = self.order.iter().next() else {
                break;
            };
            if oldest == key {
                break;
            }
            let oldest = oldest.clone();
            self.order.remove(&tick);
            if let Some(entry) = self.entries.remove(&oldest) {
                self.total -= entry.size;
            }
            victims.push(oldest);
        }
        victims
    }

    fn on_access(&mut self, key: &CacheKey) {
        self.bump(key);
    }
}

/// Build the policy selected by the configuration.
pub fn build_policy(config: &EvictionConfig) -> Box<dyn EvictionPolicy> {
    match config.policy {
        EvictionPolicyKind::Unbounded => Box::new(Unbounded),
        EvictionPolicyKind::Lru => Box::new(Lru::new(config.capacity_bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: usize) -> CacheKey {
        CacheKey::new(format!("p{i}"), "f16")
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let mut policy = Unbounded;
        for i in 0..100 {
            assert!(policy.on_insert(&key(i), 1 << 20).is_empty());
        }
        assert!(policy.on_insert(&key(0), 1).is_empty());
        assert!(!policy.tracks_access());
        assert!(Lru::new(1).tracks_access());
    }

    #[test]
    fn test_lru_overwrite_does_not_double_count() {
        let mut policy = Lru::new(1000);
        policy.on_insert(&key(0), 100);
        policy.on_insert(&key(0), 40);
        assert_eq!(policy.tracked_bytes(), 40);
    }

    #[test]
    fn test_lru_evicts_oldest() {
        let mut policy = Lru::new(300);
        assert!(policy.on_insert(&key(0), 100).is_empty());
        assert!(policy.on_insert(&key(1), 100).is_empty());
        assert!(policy.on_insert(&key(2), 100).is_empty());

        let victims = policy.on_insert(&key(3), 100);
        assert_eq!(victims, vec![key(0)]);
        assert_eq!(policy.tracked_bytes(), 300);
    }

    #[test]
    fn test_lru_access_refreshes_recency() {
        let mut policy = Lru::new(200);
        policy.on_insert(&key(0), 100);
        policy.on_insert(&key(1), 100);
        policy.on_access(&key(0));

        let victims = policy.on_insert(&key(2), 100);
        assert_eq!(victims, vec![key(1)]);
    }

    #[test]
    fn test_lru_oversized_entry_is_admitted() {
        let mut policy = Lru::new(100);
        policy.on_insert(&key(0), 50);
        policy.on_insert(&key(1), 50);

        let mut victims = policy.on_insert(&key(2), 500);
        victims.sort();
        assert_eq!(victims, vec![key(0), key(1)]);
        assert_eq!(policy.tracked_bytes(), 500);
    }
}
