//! Command-line builders for the journal.
//!
//! The rewrite pass and the undo-log generator both need to express "the
//! current state of this key" as replayable commands: one frame that
//! recreates the value, plus a `PEXPIREAT` when it carries a TTL.

use bytes::Bytes;
use cinder_protocol::CmdLine;

use crate::db::Database;
use crate::types::DataEntity;

fn bytes_from(s: String) -> Bytes {
    Bytes::from(s.into_bytes())
}

/// `SELECT <index>` — separates journal segments written against
/// different logical databases.
pub(crate) fn select_cmd(index: usize) -> CmdLine {
    vec![Bytes::from_static(b"SELECT"), bytes_from(index.to_string())]
}

/// `PEXPIREAT <key> <epoch_ms>` — the absolute form every relative
/// expiry is normalized to before it hits the journal.
pub(crate) fn expire_at_cmd(key: &Bytes, at_ms: u64) -> CmdLine {
    vec![
        Bytes::from_static(b"PEXPIREAT"),
        key.clone(),
        bytes_from(at_ms.to_string()),
    ]
}

/// The TTL-restoring command for an undo log: `PEXPIREAT` when the key
/// currently has an expiry, `PERSIST` otherwise.
pub(crate) fn ttl_cmd(db: &Database, key: &Bytes) -> CmdLine {
    match db.ttl_ms(key) {
        Some(at_ms) => expire_at_cmd(key, at_ms),
        None => vec![Bytes::from_static(b"PERSIST"), key.clone()],
    }
}

/// Formats a sorted-set score the way replies do, so journal frames and
/// wire frames agree.
pub(crate) fn format_score(score: f64) -> Bytes {
    bytes_from(format!("{score}"))
}

/// One command that recreates `entity` at `key`.
pub(crate) fn entity_to_cmd(key: &Bytes, entity: &DataEntity) -> CmdLine {
    match entity {
        DataEntity::Str(value) => {
            vec![Bytes::from_static(b"SET"), key.clone(), value.clone()]
        }
        DataEntity::List(items) => {
            let mut cmd = Vec::with_capacity(2 + items.len());
            cmd.push(Bytes::from_static(b"RPUSH"));
            cmd.push(key.clone());
            cmd.extend(items.iter().cloned());
            cmd
        }
        DataEntity::Hash(fields) => {
            let mut cmd = Vec::with_capacity(2 + fields.len() * 2);
            cmd.push(Bytes::from_static(b"HSET"));
            cmd.push(key.clone());
            for (field, value) in fields {
                cmd.push(field.clone());
                cmd.push(value.clone());
            }
            cmd
        }
        DataEntity::Set(members) => {
            let mut cmd = Vec::with_capacity(2 + members.len());
            cmd.push(Bytes::from_static(b"SADD"));
            cmd.push(key.clone());
            cmd.extend(members.iter().cloned());
            cmd
        }
        DataEntity::Zset(set) => {
            let mut cmd = Vec::with_capacity(2 + set.len() as usize * 2);
            cmd.push(Bytes::from_static(b"ZADD"));
            cmd.push(key.clone());
            set.for_each_in_rank_range(0, set.len(), false, |element| {
                cmd.push(format_score(element.score));
                cmd.push(element.member.clone());
                true
            });
            cmd
        }
    }
}
