//! Generic key commands: existence, deletion, TTL management, scans.

use std::sync::Arc;

use bytes::Bytes;
use cinder_protocol::Reply;

use crate::aof::expire_at_cmd;
use crate::db::Database;
use crate::time;

use super::{parse_i64, with_name, CommandFlags, Table};

/// DEL key [key ...]
fn exec_del(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let removed = db.removes(args);
    if removed > 0 {
        db.add_aof(with_name("DEL", args));
    }
    Reply::Integer(i64::from(removed))
}

/// EXISTS key [key ...] — counts the keys that exist (duplicates count
/// twice, as in Redis).
fn exec_exists(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let count = args.iter().filter(|key| db.exists(key)).count();
    Reply::Integer(count as i64)
}

/// TYPE key
fn exec_type(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match db.with_entity(&args[0], |entity| entity.type_name()) {
        Some(name) => Reply::Status(name.into()),
        None => Reply::Status("none".into()),
    }
}

/// Shared body of the four expire commands; `at_ms` is already absolute.
fn apply_expire(db: &Arc<Database>, key: &Bytes, at_ms: u64) -> Reply {
    if !db.exists(key) {
        return Reply::Integer(0);
    }
    db.expire(key, at_ms);
    db.add_aof(expire_at_cmd(key, at_ms));
    Reply::Integer(1)
}

fn exec_expire(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let Some(seconds) = parse_i64(&args[1]) else {
        return Reply::not_an_integer();
    };
    let at_ms = time::now_ms().saturating_add_signed(seconds.saturating_mul(1000));
    apply_expire(db, &args[0], at_ms)
}

fn exec_pexpire(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let Some(ms) = parse_i64(&args[1]) else {
        return Reply::not_an_integer();
    };
    let at_ms = time::now_ms().saturating_add_signed(ms);
    apply_expire(db, &args[0], at_ms)
}

fn exec_expireat(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let Some(seconds) = parse_i64(&args[1]) else {
        return Reply::not_an_integer();
    };
    apply_expire(db, &args[0], (seconds.max(0) as u64).saturating_mul(1000))
}

fn exec_pexpireat(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let Some(ms) = parse_i64(&args[1]) else {
        return Reply::not_an_integer();
    };
    apply_expire(db, &args[0], ms.max(0) as u64)
}

/// TTL key — -2 missing, -1 no expiry, else seconds (rounded up).
fn exec_ttl(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match remaining_ms(db, &args[0]) {
        Err(reply) => reply,
        Ok(ms) => Reply::Integer((ms + 999) / 1000),
    }
}

/// PTTL key — like TTL but milliseconds.
fn exec_pttl(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match remaining_ms(db, &args[0]) {
        Err(reply) => reply,
        Ok(ms) => Reply::Integer(ms),
    }
}

/// `Err` carries the ready-made -2/-1 reply.
fn remaining_ms(db: &Database, key: &Bytes) -> Result<i64, Reply> {
    if !db.exists(key) {
        return Err(Reply::Integer(-2));
    }
    match db.ttl_ms(key) {
        None => Err(Reply::Integer(-1)),
        Some(at_ms) => Ok(at_ms.saturating_sub(time::now_ms()) as i64),
    }
}

/// PERSIST key — 1 when an expiry was removed.
fn exec_persist(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = &args[0];
    if !db.exists(key) || db.ttl_ms(key).is_none() {
        return Reply::Integer(0);
    }
    db.persist(key);
    db.add_aof(with_name("PERSIST", args));
    Reply::Integer(1)
}

/// KEYS pattern — glob match over the whole keyspace. Keyless, hence
/// forbidden inside MULTI.
fn exec_keys(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let pattern = &args[0];
    let mut matched = Vec::new();
    db.for_each_entry(|key, _, expires_at| {
        let alive = expires_at.map_or(true, |at| !time::is_past(at));
        if alive && glob_match(pattern, key) {
            matched.push(Reply::Bulk(key.clone()));
        }
        true
    });
    Reply::Array(matched)
}

/// RANDOMKEY — an arbitrary live key, or null on an empty keyspace.
fn exec_randomkey(db: &Arc<Database>, _args: &[Bytes]) -> Reply {
    match db.random_keys(1).into_iter().next() {
        Some(key) => Reply::Bulk(key),
        None => Reply::Null,
    }
}

/// DBSIZE — number of keys in the selected database.
fn exec_dbsize(db: &Arc<Database>, _args: &[Bytes]) -> Reply {
    Reply::Integer(db.key_count() as i64)
}

/// Glob matcher for KEYS: `*` (any run), `?` (any single byte),
/// everything else literal. Iterative with star backtracking.
fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    let (mut p, mut n) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            // widen the most recent star by one byte and retry
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

pub(super) fn register(table: &mut Table) {
    use super::{
        read_all_keys, read_first_key, register as cmd, undo_all_keys, undo_first_key,
        write_all_keys, write_first_key,
    };
    use CommandFlags::{ReadOnly, Write};

    cmd(table, "del", exec_del, Some(write_all_keys), Some(undo_all_keys), -2, Write);
    cmd(table, "exists", exec_exists, Some(read_all_keys), None, -2, ReadOnly);
    cmd(table, "type", exec_type, Some(read_first_key), None, 2, ReadOnly);
    cmd(table, "expire", exec_expire, Some(write_first_key), Some(undo_first_key), 3, Write);
    cmd(table, "pexpire", exec_pexpire, Some(write_first_key), Some(undo_first_key), 3, Write);
    cmd(table, "expireat", exec_expireat, Some(write_first_key), Some(undo_first_key), 3, Write);
    cmd(table, "pexpireat", exec_pexpireat, Some(write_first_key), Some(undo_first_key), 3, Write);
    cmd(table, "ttl", exec_ttl, Some(read_first_key), None, 2, ReadOnly);
    cmd(table, "pttl", exec_pttl, Some(read_first_key), None, 2, ReadOnly);
    cmd(table, "persist", exec_persist, Some(write_first_key), Some(undo_first_key), 2, Write);
    cmd(table, "keys", exec_keys, None, None, 2, ReadOnly);
    cmd(table, "randomkey", exec_randomkey, None, None, 1, ReadOnly);
    cmd(table, "dbsize", exec_dbsize, None, None, 1, ReadOnly);
}
