//! Keyspace maps.
//!
//! [`Dict`] is the storage primitive behind a database's data, TTL, and
//! version tables. Two variants share one operation surface: the sharded
//! [`ConcurrentDict`] for live databases, and the single-threaded
//! [`SimpleDict`] for the scratch databases built during append-only log
//! rewrites. Dispatch is a plain enum match — no trait objects on the
//! hot path.

mod concurrent;
mod simple;

pub use concurrent::ConcurrentDict;
pub use simple::SimpleDict;

use bytes::Bytes;

#[derive(Debug)]
pub enum Dict<V> {
    Concurrent(ConcurrentDict<V>),
    Simple(SimpleDict<V>),
}

impl<V: Clone> Dict<V> {
    /// A sharded dict sized from the given hint (power-of-two rounded).
    pub fn concurrent(shard_count: usize) -> Self {
        Dict::Concurrent(ConcurrentDict::new(shard_count))
    }

    /// An unsharded dict for single-threaded use.
    pub fn simple() -> Self {
        Dict::Simple(SimpleDict::new())
    }

    pub fn get(&self, key: &Bytes) -> Option<V> {
        match self {
            Dict::Concurrent(d) => d.get(key),
            Dict::Simple(d) => d.get(key),
        }
    }

    pub fn view<R>(&self, key: &Bytes, f: impl FnOnce(&V) -> R) -> Option<R> {
        match self {
            Dict::Concurrent(d) => d.view(key, f),
            Dict::Simple(d) => d.view(key, f),
        }
    }

    pub fn update<R>(&self, key: &Bytes, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        match self {
            Dict::Concurrent(d) => d.update(key, f),
            Dict::Simple(d) => d.update(key, f),
        }
    }

    pub fn put(&self, key: Bytes, value: V) -> u32 {
        match self {
            Dict::Concurrent(d) => d.put(key, value),
            Dict::Simple(d) => d.put(key, value),
        }
    }

    pub fn put_if_absent(&self, key: Bytes, value: V) -> u32 {
        match self {
            Dict::Concurrent(d) => d.put_if_absent(key, value),
            Dict::Simple(d) => d.put_if_absent(key, value),
        }
    }

    pub fn put_if_exists(&self, key: Bytes, value: V) -> u32 {
        match self {
            Dict::Concurrent(d) => d.put_if_exists(key, value),
            Dict::Simple(d) => d.put_if_exists(key, value),
        }
    }

    pub fn remove(&self, key: &Bytes) -> u32 {
        match self {
            Dict::Concurrent(d) => d.remove(key),
            Dict::Simple(d) => d.remove(key),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Dict::Concurrent(d) => d.len(),
            Dict::Simple(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each(&self, consumer: impl FnMut(&Bytes, &V) -> bool) {
        match self {
            Dict::Concurrent(d) => d.for_each(consumer),
            Dict::Simple(d) => d.for_each(consumer),
        }
    }

    pub fn keys(&self) -> Vec<Bytes> {
        match self {
            Dict::Concurrent(d) => d.keys(),
            Dict::Simple(d) => d.keys(),
        }
    }

    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        match self {
            Dict::Concurrent(d) => d.random_keys(limit),
            Dict::Simple(d) => d.random_keys(limit),
        }
    }

    pub fn random_distinct_keys(&self, limit: usize) -> Vec<Bytes> {
        match self {
            Dict::Concurrent(d) => d.random_distinct_keys(limit),
            Dict::Simple(d) => d.random_distinct_keys(limit),
        }
    }

    pub fn clear(&self) {
        match self {
            Dict::Concurrent(d) => d.clear(),
            Dict::Simple(d) => d.clear(),
        }
    }
}
