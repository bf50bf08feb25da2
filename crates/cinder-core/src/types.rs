//! Stored values.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;

use crate::zset::SortedSet;

/// A value held at a key: one of the supported container kinds. Owned
/// exclusively by the shard of the database it lives in; cross-kind
/// access surfaces as a WRONGTYPE error at the command layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEntity {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    Set(HashSet<Bytes>),
    Zset(SortedSet),
}

impl DataEntity {
    /// The name TYPE reports for this kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataEntity::Str(_) => "string",
            DataEntity::List(_) => "list",
            DataEntity::Hash(_) => "hash",
            DataEntity::Set(_) => "set",
            DataEntity::Zset(_) => "zset",
        }
    }
}
