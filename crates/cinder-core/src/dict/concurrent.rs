//! Hash-sharded concurrent map.
//!
//! A fixed array of shards, each owning a private `HashMap` behind its
//! own read/write lock. The shard for a key is selected by FNV-1a hash,
//! so two lookups of the same key always contend on the same (and only
//! that) lock. The entry count is kept in an atomic so `len` never takes
//! a shard lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use rand::Rng;

use crate::hash::{compute_capacity, fnv32};

pub struct ConcurrentDict<V> {
    shards: Box<[Shard<V>]>,
    mask: u32,
    count: AtomicUsize,
}

struct Shard<V> {
    map: RwLock<HashMap<Bytes, V>>,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Bytes, V>> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Bytes, V>> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> ConcurrentDict<V> {
    /// Creates a dict with the requested shard count, rounded up to a
    /// power of two (minimum 16).
    pub fn new(shard_count: usize) -> Self {
        let shard_count = compute_capacity(shard_count);
        let shards = (0..shard_count).map(|_| Shard::new()).collect();
        Self {
            shards,
            mask: (shard_count - 1) as u32,
            count: AtomicUsize::new(0),
        }
    }

    fn shard_for(&self, key: &[u8]) -> &Shard<V> {
        let index = (fnv32(key) & self.mask) as usize;
        &self.shards[index]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn get(&self, key: &Bytes) -> Option<V> {
        self.shard_for(key).read().get(key).cloned()
    }

    /// Applies `f` to the value under the shard read lock.
    pub fn view<R>(&self, key: &Bytes, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard_for(key).read().get(key).map(f)
    }

    /// Applies `f` to the value under the shard write lock, mutating in
    /// place. Returns `None` when the key is absent.
    pub fn update<R>(&self, key: &Bytes, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.shard_for(key).write().get_mut(key).map(f)
    }

    /// Inserts or replaces. Returns 1; the entry count grows only when
    /// the key was absent.
    pub fn put(&self, key: Bytes, value: V) -> u32 {
        let mut map = self.shard_for(&key).write();
        if map.insert(key, value).is_none() {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        1
    }

    /// Inserts only when absent. Returns 1 if inserted, 0 if present.
    pub fn put_if_absent(&self, key: Bytes, value: V) -> u32 {
        let mut map = self.shard_for(&key).write();
        if map.contains_key(&key) {
            return 0;
        }
        map.insert(key, value);
        self.count.fetch_add(1, Ordering::Relaxed);
        1
    }

    /// Replaces only when present. Returns 1 if updated, 0 if absent.
    pub fn put_if_exists(&self, key: Bytes, value: V) -> u32 {
        let mut map = self.shard_for(&key).write();
        match map.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    /// Removes the key. Returns 1 if removed, 0 if absent.
    pub fn remove(&self, key: &Bytes) -> u32 {
        let mut map = self.shard_for(key).write();
        if map.remove(key).is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
            1
        } else {
            0
        }
    }

    /// Entry count. An atomic load; no shard locks taken.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every entry, shard by shard, holding each shard's read
    /// lock for the duration of that shard's scan. Returning `false`
    /// from the consumer stops the walk early.
    ///
    /// Iteration is not a consistent snapshot across shards; writes to
    /// shards not currently locked may interleave. The consumer must not
    /// reenter the dict for the key being visited.
    pub fn for_each(&self, mut consumer: impl FnMut(&Bytes, &V) -> bool) {
        for shard in self.shards.iter() {
            let map = shard.read();
            for (key, value) in map.iter() {
                if !consumer(key, value) {
                    return;
                }
            }
        }
    }

    /// A point-in-time snapshot of the keys. May be slightly over or
    /// under `len()` if writes race the walk.
    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Picks up to `limit` keys by repeatedly choosing a random shard and
    /// taking an arbitrary key from it. Duplicates are allowed. May
    /// return fewer than `limit` keys when the dict is sparse.
    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(limit);
        if self.is_empty() || limit == 0 {
            return keys;
        }
        let mut rng = rand::thread_rng();
        let max_attempts = (limit * 8).max(self.shards.len());
        for _ in 0..max_attempts {
            if keys.len() == limit {
                break;
            }
            let shard = &self.shards[rng.gen_range(0..self.shards.len())];
            if let Some(key) = shard.read().keys().next() {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// As [`random_keys`](Self::random_keys) but deduplicated. When
    /// `limit >= len()` every key is returned.
    pub fn random_distinct_keys(&self, limit: usize) -> Vec<Bytes> {
        if limit >= self.len() {
            return self.keys();
        }
        let mut set = HashSet::with_capacity(limit);
        let mut rng = rand::thread_rng();
        let max_attempts = (limit * 8).max(self.shards.len());
        for _ in 0..max_attempts {
            if set.len() == limit {
                break;
            }
            let shard = &self.shards[rng.gen_range(0..self.shards.len())];
            if let Some(key) = shard.read().keys().next() {
                set.insert(key.clone());
            }
        }
        set.into_iter().collect()
    }

    /// Empties every shard, preserving the shard count.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
        self.count.store(0, Ordering::Relaxed);
    }
}

impl<V> std::fmt::Debug for ConcurrentDict<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentDict")
            .field("shards", &self.shards.len())
            .field("len", &self.count.load(Ordering::Relaxed))
            .finish()
    }
}
