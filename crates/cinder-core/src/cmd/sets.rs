//! Set commands.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use cinder_protocol::Reply;

use crate::db::Database;
use crate::types::DataEntity;

use super::{with_name, CommandFlags, Table};

/// SADD key member [member ...] — counts newly added members.
fn exec_sadd(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = args[0].clone();
    let members = &args[1..];

    let added = db.with_entity_mut(&key, |entity| match entity {
        DataEntity::Set(set) => {
            let mut added = 0i64;
            for member in members {
                if set.insert(member.clone()) {
                    added += 1;
                }
            }
            Ok(added)
        }
        _ => Err(()),
    });

    let added = match added {
        Some(Ok(added)) => added,
        Some(Err(())) => return Reply::wrong_type(),
        None => {
            let set: HashSet<Bytes> = members.iter().cloned().collect();
            let added = set.len() as i64;
            db.put_entity(key.clone(), DataEntity::Set(set));
            added
        }
    };
    db.add_aof(with_name("SADD", args));
    Reply::Integer(added)
}

/// SREM key member [member ...] — an emptied set is removed.
fn exec_srem(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = args[0].clone();
    let removed = db.with_entity_mut(&key, |entity| match entity {
        DataEntity::Set(set) => {
            let mut removed = 0i64;
            for member in &args[1..] {
                if set.remove(member) {
                    removed += 1;
                }
            }
            Ok((removed, set.is_empty()))
        }
        _ => Err(()),
    });
    match removed {
        None => Reply::Integer(0),
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok((removed, emptied))) => {
            if emptied {
                db.remove(&key);
            }
            if removed > 0 {
                db.add_aof(with_name("SREM", args));
            }
            Reply::Integer(removed)
        }
    }
}

/// SCARD key
fn exec_scard(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match db.with_entity(&args[0], |entity| match entity {
        DataEntity::Set(set) => Ok(set.len() as i64),
        _ => Err(()),
    }) {
        None => Reply::Integer(0),
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok(len)) => Reply::Integer(len),
    }
}

/// SISMEMBER key member
fn exec_sismember(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match db.with_entity(&args[0], |entity| match entity {
        DataEntity::Set(set) => Ok(i64::from(set.contains(&args[1]))),
        _ => Err(()),
    }) {
        None => Reply::Integer(0),
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok(found)) => Reply::Integer(found),
    }
}

/// SMEMBERS key
fn exec_smembers(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match db.with_entity(&args[0], |entity| match entity {
        DataEntity::Set(set) => Ok(set.iter().cloned().map(Reply::Bulk).collect::<Vec<_>>()),
        _ => Err(()),
    }) {
        None => Reply::Array(Vec::new()),
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok(members)) => Reply::Array(members),
    }
}

pub(super) fn register(table: &mut Table) {
    use super::{read_first_key, register as cmd, undo_first_key, write_first_key};
    use CommandFlags::{ReadOnly, Write};

    cmd(table, "sadd", exec_sadd, Some(write_first_key), Some(undo_first_key), -3, Write);
    cmd(table, "srem", exec_srem, Some(write_first_key), Some(undo_first_key), -3, Write);
    cmd(table, "scard", exec_scard, Some(read_first_key), None, 2, ReadOnly);
    cmd(table, "sismember", exec_sismember, Some(read_first_key), None, 3, ReadOnly);
    cmd(table, "smembers", exec_smembers, Some(read_first_key), None, 2, ReadOnly);
}
