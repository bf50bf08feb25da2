//! Unsharded map with the same surface as the concurrent dict.
//!
//! Backs the scratch databases used while rewriting the append-only
//! log, where only one thread ever touches the data and shard locking
//! would be wasted. A single mutex stands in for Go-style unsynchronized
//! interior mutability; it is never contended.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

pub struct SimpleDict<V> {
    map: Mutex<HashMap<Bytes, V>>,
}

impl<V: Clone> SimpleDict<V> {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Bytes, V>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &Bytes) -> Option<V> {
        self.lock().get(key).cloned()
    }

    pub fn view<R>(&self, key: &Bytes, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.lock().get(key).map(f)
    }

    pub fn update<R>(&self, key: &Bytes, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.lock().get_mut(key).map(f)
    }

    pub fn put(&self, key: Bytes, value: V) -> u32 {
        self.lock().insert(key, value);
        1
    }

    pub fn put_if_absent(&self, key: Bytes, value: V) -> u32 {
        let mut map = self.lock();
        if map.contains_key(&key) {
            return 0;
        }
        map.insert(key, value);
        1
    }

    pub fn put_if_exists(&self, key: Bytes, value: V) -> u32 {
        let mut map = self.lock();
        match map.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    pub fn remove(&self, key: &Bytes) -> u32 {
        u32::from(self.lock().remove(key).is_some())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn for_each(&self, mut consumer: impl FnMut(&Bytes, &V) -> bool) {
        let map = self.lock();
        for (key, value) in map.iter() {
            if !consumer(key, value) {
                return;
            }
        }
    }

    pub fn keys(&self) -> Vec<Bytes> {
        self.lock().keys().cloned().collect()
    }

    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        let map = self.lock();
        let mut keys = Vec::with_capacity(limit);
        if map.is_empty() {
            return keys;
        }
        for _ in 0..limit {
            // map iteration order is arbitrary; taking the first key of
            // a fresh iterator is as random as this variant needs
            if let Some(key) = map.keys().next() {
                keys.push(key.clone());
            }
        }
        keys
    }

    pub fn random_distinct_keys(&self, limit: usize) -> Vec<Bytes> {
        let map = self.lock();
        if limit >= map.len() {
            return map.keys().cloned().collect();
        }
        let set: HashSet<Bytes> = map.keys().take(limit).cloned().collect();
        set.into_iter().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<V: Clone> Default for SimpleDict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for SimpleDict<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleDict").finish_non_exhaustive()
    }
}
