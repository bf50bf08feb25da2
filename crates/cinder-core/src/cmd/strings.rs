//! String commands.

use std::sync::Arc;

use bytes::Bytes;
use cinder_protocol::Reply;

use crate::aof::expire_at_cmd;
use crate::db::Database;
use crate::time;
use crate::types::DataEntity;

use super::{parse_i64, with_name, CommandFlags, Table};

/// SET write policy, driven by NX/XX.
#[derive(PartialEq, Clone, Copy)]
enum SetPolicy {
    Upsert,
    InsertOnly,
    UpdateOnly,
}

/// Sentinel: no TTL option seen.
const UNLIMITED_TTL: i64 = 0;

/// Reads the string value at `key`. `Err` carries the WRONGTYPE reply.
fn get_string(db: &Database, key: &Bytes) -> Result<Option<Bytes>, Reply> {
    match db.with_entity(key, |entity| match entity {
        DataEntity::Str(value) => Ok(value.clone()),
        _ => Err(()),
    }) {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(())) => Err(Reply::wrong_type()),
    }
}

/// SET key value [NX|XX] [EX seconds | PX milliseconds]
fn exec_set(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = args[0].clone();
    let value = args[1].clone();
    let mut policy = SetPolicy::Upsert;
    let mut ttl_ms = UNLIMITED_TTL;

    let mut i = 2;
    while i < args.len() {
        let opt = &args[i];
        if opt.eq_ignore_ascii_case(b"NX") {
            if policy == SetPolicy::UpdateOnly {
                return Reply::syntax_err();
            }
            policy = SetPolicy::InsertOnly;
        } else if opt.eq_ignore_ascii_case(b"XX") {
            if policy == SetPolicy::InsertOnly {
                return Reply::syntax_err();
            }
            policy = SetPolicy::UpdateOnly;
        } else if opt.eq_ignore_ascii_case(b"EX") || opt.eq_ignore_ascii_case(b"PX") {
            if ttl_ms != UNLIMITED_TTL {
                return Reply::syntax_err();
            }
            let Some(raw) = args.get(i + 1) else {
                return Reply::syntax_err();
            };
            let Some(ttl_arg) = parse_i64(raw) else {
                return Reply::syntax_err();
            };
            if ttl_arg <= 0 {
                return Reply::error("ERR invalid expire time in 'set' command");
            }
            ttl_ms = if opt.eq_ignore_ascii_case(b"EX") {
                ttl_arg.saturating_mul(1000)
            } else {
                ttl_arg
            };
            i += 1;
        } else {
            return Reply::syntax_err();
        }
        i += 1;
    }

    let entity = DataEntity::Str(value.clone());
    let result = match policy {
        SetPolicy::Upsert => db.put_entity(key.clone(), entity),
        SetPolicy::InsertOnly => db.put_if_absent(key.clone(), entity),
        SetPolicy::UpdateOnly => db.put_if_exists(key.clone(), entity),
    };
    if result == 0 {
        return Reply::Null;
    }

    if ttl_ms != UNLIMITED_TTL {
        let at_ms = time::now_ms() + ttl_ms as u64;
        db.expire(&key, at_ms);
        // journal the relative TTL in absolute form
        db.add_aof(vec![Bytes::from_static(b"SET"), key.clone(), value]);
        db.add_aof(expire_at_cmd(&key, at_ms));
    } else {
        // a plain SET makes a previously-expiring key permanent
        db.persist(&key);
        db.add_aof(with_name("SET", args));
    }
    Reply::ok()
}

/// SETNX key value
fn exec_setnx(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = args[0].clone();
    let value = args[1].clone();
    let result = db.put_if_absent(key, DataEntity::Str(value));
    if result > 0 {
        db.add_aof(with_name("SETNX", args));
    }
    Reply::Integer(i64::from(result))
}

/// GET key
fn exec_get(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match get_string(db, &args[0]) {
        Err(reply) => reply,
        Ok(None) => Reply::Null,
        Ok(Some(value)) => Reply::Bulk(value),
    }
}

/// GETEX key [EX seconds | PX milliseconds | PERSIST]
fn exec_getex(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = args[0].clone();
    let value = match get_string(db, &key) {
        Err(reply) => return reply,
        Ok(None) => return Reply::Null,
        Ok(Some(value)) => value,
    };

    let mut ttl_ms = UNLIMITED_TTL;
    let mut persist = false;
    let mut i = 1;
    while i < args.len() {
        let opt = &args[i];
        if opt.eq_ignore_ascii_case(b"EX") || opt.eq_ignore_ascii_case(b"PX") {
            if ttl_ms != UNLIMITED_TTL || persist {
                return Reply::syntax_err();
            }
            let Some(raw) = args.get(i + 1) else {
                return Reply::syntax_err();
            };
            let Some(ttl_arg) = parse_i64(raw) else {
                return Reply::syntax_err();
            };
            if ttl_arg <= 0 {
                return Reply::syntax_err();
            }
            ttl_ms = if opt.eq_ignore_ascii_case(b"EX") {
                ttl_arg.saturating_mul(1000)
            } else {
                ttl_arg
            };
            i += 1;
        } else if opt.eq_ignore_ascii_case(b"PERSIST") {
            if ttl_ms != UNLIMITED_TTL || persist {
                return Reply::syntax_err();
            }
            persist = true;
        } else {
            return Reply::syntax_err();
        }
        i += 1;
    }

    if ttl_ms != UNLIMITED_TTL {
        let at_ms = time::now_ms() + ttl_ms as u64;
        db.expire(&key, at_ms);
        db.add_aof(expire_at_cmd(&key, at_ms));
    } else if persist {
        db.persist(&key);
        db.add_aof(vec![Bytes::from_static(b"PERSIST"), key]);
    }
    Reply::Bulk(value)
}

/// GETSET key value — returns the old value, drops any TTL.
fn exec_getset(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = args[0].clone();
    let value = args[1].clone();
    let old = match get_string(db, &key) {
        Err(reply) => return reply,
        Ok(old) => old,
    };
    db.put_entity(key.clone(), DataEntity::Str(value));
    db.persist(&key);
    db.add_aof(with_name("GETSET", args));
    match old {
        Some(value) => Reply::Bulk(value),
        None => Reply::Null,
    }
}

/// STRLEN key
fn exec_strlen(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match get_string(db, &args[0]) {
        Err(reply) => reply,
        Ok(None) => Reply::Integer(0),
        Ok(Some(value)) => Reply::Integer(value.len() as i64),
    }
}

/// APPEND key value — returns the new length.
fn exec_append(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = args[0].clone();
    let suffix = &args[1];
    let old = match get_string(db, &key) {
        Err(reply) => return reply,
        Ok(old) => old,
    };
    let mut combined = Vec::with_capacity(old.as_ref().map_or(0, |b| b.len()) + suffix.len());
    if let Some(old) = old {
        combined.extend_from_slice(&old);
    }
    combined.extend_from_slice(suffix);
    let len = combined.len();
    db.put_entity(key, DataEntity::Str(Bytes::from(combined)));
    db.add_aof(with_name("APPEND", args));
    Reply::Integer(len as i64)
}

/// Shared INCR/DECR/INCRBY/DECRBY body.
fn incr_by(db: &Arc<Database>, args: &[Bytes], delta: i64, journal_name: &'static str) -> Reply {
    let key = args[0].clone();
    let current = match get_string(db, &key) {
        Err(reply) => return reply,
        Ok(current) => current,
    };
    let n = match &current {
        Some(raw) => match parse_i64(raw) {
            Some(n) => n,
            None => return Reply::not_an_integer(),
        },
        None => 0,
    };
    let Some(next) = n.checked_add(delta) else {
        return Reply::error("ERR increment or decrement would overflow");
    };
    db.put_entity(key, DataEntity::Str(Bytes::from(next.to_string().into_bytes())));
    db.add_aof(with_name(journal_name, args));
    Reply::Integer(next)
}

fn exec_incr(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    incr_by(db, args, 1, "INCR")
}

fn exec_decr(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    incr_by(db, args, -1, "DECR")
}

fn exec_incrby(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match parse_i64(&args[1]) {
        Some(delta) => incr_by(db, args, delta, "INCRBY"),
        None => Reply::not_an_integer(),
    }
}

fn exec_decrby(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match parse_i64(&args[1]) {
        Some(delta) if delta != i64::MIN => incr_by(db, args, -delta, "DECRBY"),
        _ => Reply::not_an_integer(),
    }
}

pub(super) fn register(table: &mut Table) {
    use super::{read_first_key, register as cmd, undo_first_key, write_first_key};
    use CommandFlags::{ReadOnly, Write};

    cmd(table, "set", exec_set, Some(write_first_key), Some(undo_first_key), -3, Write);
    cmd(table, "setnx", exec_setnx, Some(write_first_key), Some(undo_first_key), 3, Write);
    cmd(table, "get", exec_get, Some(read_first_key), None, 2, ReadOnly);
    cmd(table, "getex", exec_getex, Some(write_first_key), Some(undo_first_key), -2, Write);
    cmd(table, "getset", exec_getset, Some(write_first_key), Some(undo_first_key), 3, Write);
    cmd(table, "strlen", exec_strlen, Some(read_first_key), None, 2, ReadOnly);
    cmd(table, "append", exec_append, Some(write_first_key), Some(undo_first_key), 3, Write);
    cmd(table, "incr", exec_incr, Some(write_first_key), Some(undo_first_key), 2, Write);
    cmd(table, "decr", exec_decr, Some(write_first_key), Some(undo_first_key), 2, Write);
    cmd(table, "incrby", exec_incrby, Some(write_first_key), Some(undo_first_key), 3, Write);
    cmd(table, "decrby", exec_decrby, Some(write_first_key), Some(undo_first_key), 3, Write);
}
