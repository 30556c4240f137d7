//! Per-policy storage: each policy family keeps its own ordered structure
//! rather than sharing one generic map, so eviction-victim selection stays
//! O(log n) (or O(1) for the recency-ordered ones) instead of a linear scan.
//!
//! Dispatch is by tagged enum ([`Storage`]) rather than a boxed trait object
//! or a class hierarchy: the engine matches once per `recv` and calls
//! directly into the concrete structure.

use crate::request::{ObjectId, StoredEntry};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// The seven policy families from the spec (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Fifo,
    Lru,
    Lfu,
    Lso,
    Sso,
    Random,
    Belady,
}

impl PolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Fifo => "fifo",
            PolicyKind::Lru => "lru",
            PolicyKind::Lfu => "lfu",
            PolicyKind::Lso => "lso",
            PolicyKind::Sso => "sso",
            PolicyKind::Random => "ran",
            PolicyKind::Belady => "belady",
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(PolicyKind::Fifo),
            "lru" => Ok(PolicyKind::Lru),
            "lfu" => Ok(PolicyKind::Lfu),
            "lso" => Ok(PolicyKind::Lso),
            "sso" => Ok(PolicyKind::Sso),
            "ran" | "random" => Ok(PolicyKind::Random),
            "belady" | "opt" | "clairvoyant" => Ok(PolicyKind::Belady),
            other => Err(format!("unknown policy kind '{other}'")),
        }
    }
}

/// One configured simulator instance: a policy family, whether its
/// "protected" admission gate is enabled, and (for [`PolicyKind::Random`])
/// the RNG seed.
#[derive(Debug, Clone)]
pub struct PolicySpec {
    pub kind: PolicyKind,
    pub protected: bool,
    pub rng_seed: u64,
}

impl PolicySpec {
    /// Whether objects larger than 10% of capacity are refused at admission.
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn label(&self, capacity: u64) -> String {
        let prefix = if self.is_protected() { "protected-" } else { "" };
        format!("{prefix}{}-{capacity}", self.kind.name())
    }
}

/// Recency-ordered storage shared by FIFO and LRU. FIFO never promotes on
/// hit; LRU does. Backed by the `lru` crate's intrusive map, unbounded
/// because eviction here is driven by cumulative size, not entry count.
pub struct RecencyStore {
    map: lru::LruCache<ObjectId, StoredEntry>,
    promote_on_hit: bool,
    total_size: u64,
}

impl RecencyStore {
    pub fn new(promote_on_hit: bool) -> Self {
        Self {
            map: lru::LruCache::unbounded(),
            promote_on_hit,
            total_size: 0,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn peek(&self, id: &ObjectId) -> Option<&StoredEntry> {
        self.map.peek(id)
    }

    /// Looks up `id`, promoting it to most-recently-used when this store is
    /// an LRU (a no-op for FIFO).
    pub fn touch(&mut self, id: &ObjectId) -> Option<&StoredEntry> {
        if self.promote_on_hit {
            self.map.get(id)
        } else {
            self.map.peek(id)
        }
    }

    pub fn insert(&mut self, entry: StoredEntry) {
        self.total_size += entry.request.size;
        let id = entry.request.object_id.clone();
        if let Some(evicted) = self.map.push(id, entry) {
            // `push` only returns a value when it replaced an existing key
            // with the same id; the engine never re-inserts a live key, but
            // keep the size ledger honest if that ever changes.
            self.total_size -= evicted.1.request.size;
        }
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<StoredEntry> {
        let entry = self.map.pop(id)?;
        self.total_size -= entry.request.size;
        Some(entry)
    }

    /// Evicts and returns the least-recently-touched entry.
    pub fn evict_victim(&mut self) -> Option<StoredEntry> {
        let (_, entry) = self.map.pop_lru()?;
        self.total_size -= entry.request.size;
        Some(entry)
    }
}

/// Frequency-and-insertion-ordered storage for LFU. Victim = lowest
/// reference count; ties broken by oldest insertion.
pub struct LfuStore {
    order: BTreeMap<(u64, u64), ObjectId>,
    counts: HashMap<ObjectId, (u64, u64)>, // object_id -> (seq, count)
    entries: HashMap<ObjectId, StoredEntry>,
    next_seq: u64,
    total_size: u64,
}

impl LfuStore {
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            counts: HashMap::new(),
            entries: HashMap::new(),
            next_seq: 0,
            total_size: 0,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn peek(&self, id: &ObjectId) -> Option<&StoredEntry> {
        self.entries.get(id)
    }

    pub fn touch(&mut self, id: &ObjectId) -> Option<&StoredEntry> {
        if let Some(&(seq, count)) = self.counts.get(id) {
            self.order.remove(&(count, seq));
            let new_count = count + 1;
            self.order.insert((new_count, seq), id.clone());
            self.counts.insert(id.clone(), (seq, new_count));
        }
        self.entries.get(id)
    }

    pub fn insert(&mut self, entry: StoredEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = entry.request.object_id.clone();
        self.total_size += entry.request.size;
        self.order.insert((1, seq), id.clone());
        self.counts.insert(id.clone(), (seq, 1));
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<StoredEntry> {
        let (seq, count) = self.counts.remove(id)?;
        self.order.remove(&(count, seq));
        let entry = self.entries.remove(id)?;
        self.total_size -= entry.request.size;
        Some(entry)
    }

    pub fn evict_victim(&mut self) -> Option<StoredEntry> {
        let (&key, id) = self.order.iter().next()?;
        let id = id.clone();
        self.order.remove(&key);
        self.counts.remove(&id);
        let entry = self.entries.remove(&id)?;
        self.total_size -= entry.request.size;
        Some(entry)
    }
}

/// Size-and-insertion-ordered storage shared by LSO and SSO. `largest_first`
/// selects which end of the map is the eviction victim; the sign of the
/// insertion-order component of the key is flipped so that either direction
/// breaks size ties by oldest insertion (see DESIGN.md).
pub struct SizeStore {
    largest_first: bool,
    order: BTreeMap<(u64, i64), ObjectId>,
    index: HashMap<ObjectId, (u64, i64)>,
    entries: HashMap<ObjectId, StoredEntry>,
    next_seq: u64,
    total_size: u64,
}

impl SizeStore {
    pub fn new(largest_first: bool) -> Self {
        Self {
            largest_first,
            order: BTreeMap::new(),
            index: HashMap::new(),
            entries: HashMap::new(),
            next_seq: 0,
            total_size: 0,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn peek(&self, id: &ObjectId) -> Option<&StoredEntry> {
        self.entries.get(id)
    }

    pub fn touch(&mut self, _id: &ObjectId) -> Option<&StoredEntry> {
        self.entries.get(_id)
    }

    fn order_key(&self, size: u64, seq: u64) -> (u64, i64) {
        if self.largest_first {
            (size, -(seq as i64))
        } else {
            (size, seq as i64)
        }
    }

    pub fn insert(&mut self, entry: StoredEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = entry.request.object_id.clone();
        let key = self.order_key(entry.request.size, seq);
        self.total_size += entry.request.size;
        self.order.insert(key, id.clone());
        self.index.insert(id.clone(), key);
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<StoredEntry> {
        let key = self.index.remove(id)?;
        self.order.remove(&key);
        let entry = self.entries.remove(id)?;
        self.total_size -= entry.request.size;
        Some(entry)
    }

    pub fn evict_victim(&mut self) -> Option<StoredEntry> {
        let (&key, id) = if self.largest_first {
            self.order.iter().next_back()?
        } else {
            self.order.iter().next()?
        };
        let id = id.clone();
        self.order.remove(&key);
        self.index.remove(&id);
        let entry = self.entries.remove(&id)?;
        self.total_size -= entry.request.size;
        Some(entry)
    }
}

/// Index-addressable storage for RAN: O(1) insert/remove via swap-removal,
/// victim chosen uniformly at random from the live set.
pub struct RandomStore {
    order: Vec<ObjectId>,
    index: HashMap<ObjectId, usize>,
    entries: HashMap<ObjectId, StoredEntry>,
    rng: StdRng,
    total_size: u64,
}

impl RandomStore {
    pub fn new(seed: u64) -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
            entries: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
            total_size: 0,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn peek(&self, id: &ObjectId) -> Option<&StoredEntry> {
        self.entries.get(id)
    }

    pub fn touch(&mut self, id: &ObjectId) -> Option<&StoredEntry> {
        self.entries.get(id)
    }

    pub fn insert(&mut self, entry: StoredEntry) {
        let id = entry.request.object_id.clone();
        self.total_size += entry.request.size;
        self.index.insert(id.clone(), self.order.len());
        self.order.push(id.clone());
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<StoredEntry> {
        let idx = self.index.remove(id)?;
        self.swap_remove_index(idx);
        let entry = self.entries.remove(id)?;
        self.total_size -= entry.request.size;
        Some(entry)
    }

    fn swap_remove_index(&mut self, idx: usize) {
        let last = self.order.len() - 1;
        self.order.swap(idx, last);
        self.order.pop();
        if idx < self.order.len() {
            let moved = self.order[idx].clone();
            self.index.insert(moved, idx);
        }
    }

    pub fn evict_victim(&mut self) -> Option<StoredEntry> {
        if self.order.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.order.len());
        let id = self.order[idx].clone();
        self.swap_remove_index(idx);
        self.index.remove(&id);
        let entry = self.entries.remove(&id)?;
        self.total_size -= entry.request.size;
        Some(entry)
    }
}

/// Next-use-ordered storage for Bélády. Victim = greatest `next_use`
/// (furthest in the future, or never again); ties broken by larger size.
pub struct BeladyStore {
    order: BTreeMap<(OrderedFloat<f64>, u64, u64), ObjectId>,
    index: HashMap<ObjectId, (OrderedFloat<f64>, u64, u64)>,
    entries: HashMap<ObjectId, StoredEntry>,
    next_seq: u64,
    total_size: u64,
}

impl BeladyStore {
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            index: HashMap::new(),
            entries: HashMap::new(),
            next_seq: 0,
            total_size: 0,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn peek(&self, id: &ObjectId) -> Option<&StoredEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&mut self, entry: StoredEntry, next_use: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = entry.request.object_id.clone();
        let key = (OrderedFloat(next_use), entry.request.size, seq);
        self.total_size += entry.request.size;
        self.order.insert(key, id.clone());
        self.index.insert(id.clone(), key);
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<StoredEntry> {
        let key = self.index.remove(id)?;
        self.order.remove(&key);
        let entry = self.entries.remove(id)?;
        self.total_size -= entry.request.size;
        Some(entry)
    }

    /// Re-keys a live entry under a freshly queried `next_use`, preserving
    /// its original insertion sequence for tie-breaking.
    pub fn update_next_use(&mut self, id: &ObjectId, next_use: f64) {
        let Some(old_key) = self.index.get(id).copied() else {
            return;
        };
        self.order.remove(&old_key);
        let new_key = (OrderedFloat(next_use), old_key.1, old_key.2);
        self.order.insert(new_key, id.clone());
        self.index.insert(id.clone(), new_key);
    }

    /// All ids whose projected `next_use` has already fallen behind `now`
    /// (so the projection is stale and must be refreshed before eviction).
    pub fn ids_with_next_use_before(&self, now: f64) -> Vec<ObjectId> {
        self.order
            .range(..(OrderedFloat(now), 0, 0))
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn evict_victim(&mut self) -> Option<StoredEntry> {
        let (&key, id) = self.order.iter().next_back()?;
        let id = id.clone();
        self.order.remove(&key);
        self.index.remove(&id);
        let entry = self.entries.remove(&id)?;
        self.total_size -= entry.request.size;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ObjectId, Request, UNGROUPED};

    fn req(id: i64, size: u64) -> Request {
        Request {
            timestamp: 0.0,
            object_id: ObjectId::Int(id),
            size,
            maxage: 300,
            group_id: UNGROUPED,
            trace_position: id as u64,
        }
    }

    fn entry(id: i64, size: u64, at: f64) -> StoredEntry {
        StoredEntry {
            request: req(id, size),
            admitted_at: at,
        }
    }

    #[test]
    fn fifo_evicts_oldest_even_after_hit() {
        let mut store = RecencyStore::new(false);
        store.insert(entry(1, 10, 0.0));
        store.insert(entry(2, 10, 1.0));
        store.touch(&ObjectId::Int(1));
        let victim = store.evict_victim().unwrap();
        assert_eq!(victim.request.object_id, ObjectId::Int(1));
    }

    #[test]
    fn lru_evicts_least_recently_touched() {
        let mut store = RecencyStore::new(true);
        store.insert(entry(1, 10, 0.0));
        store.insert(entry(2, 10, 1.0));
        store.touch(&ObjectId::Int(1));
        let victim = store.evict_victim().unwrap();
        assert_eq!(victim.request.object_id, ObjectId::Int(2));
    }

    #[test]
    fn lfu_breaks_ties_by_oldest_insertion() {
        let mut store = LfuStore::new();
        store.insert(entry(1, 10, 0.0));
        store.insert(entry(2, 10, 1.0));
        let victim = store.evict_victim().unwrap();
        assert_eq!(victim.request.object_id, ObjectId::Int(1));
    }

    #[test]
    fn lso_evicts_largest_size_tie_oldest() {
        let mut store = SizeStore::new(true);
        store.insert(entry(1, 50, 0.0));
        store.insert(entry(2, 50, 1.0));
        store.insert(entry(3, 10, 2.0));
        let victim = store.evict_victim().unwrap();
        assert_eq!(victim.request.object_id, ObjectId::Int(1));
    }

    #[test]
    fn sso_evicts_smallest_size_tie_oldest() {
        let mut store = SizeStore::new(false);
        store.insert(entry(1, 10, 0.0));
        store.insert(entry(2, 10, 1.0));
        store.insert(entry(3, 50, 2.0));
        let victim = store.evict_victim().unwrap();
        assert_eq!(victim.request.object_id, ObjectId::Int(1));
    }

    #[test]
    fn belady_evicts_furthest_next_use() {
        let mut store = BeladyStore::new();
        store.insert(entry(1, 10, 0.0), 100.0);
        store.insert(entry(2, 10, 0.0), f64::INFINITY);
        let victim = store.evict_victim().unwrap();
        assert_eq!(victim.request.object_id, ObjectId::Int(2));
    }

    #[test]
    fn policy_kind_parses_case_insensitively() {
        assert_eq!("LRU".parse::<PolicyKind>().unwrap(), PolicyKind::Lru);
        assert_eq!("ran".parse::<PolicyKind>().unwrap(), PolicyKind::Random);
        assert!("bogus".parse::<PolicyKind>().is_err());
    }
}
