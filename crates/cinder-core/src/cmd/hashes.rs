//! Hash commands.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use cinder_protocol::Reply;

use crate::db::Database;
use crate::types::DataEntity;

use super::{with_name, CommandFlags, Table};

/// HSET key field value [field value ...] — counts newly created fields.
fn exec_hset(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    if (args.len() - 1) % 2 != 0 {
        return Reply::arg_num_err("hset");
    }
    let key = args[0].clone();
    let pairs = &args[1..];

    let added = db.with_entity_mut(&key, |entity| match entity {
        DataEntity::Hash(fields) => {
            let mut added = 0i64;
            for pair in pairs.chunks_exact(2) {
                if fields.insert(pair[0].clone(), pair[1].clone()).is_none() {
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
            let mut fields = HashMap::with_capacity(pairs.len() / 2);
            for pair in pairs.chunks_exact(2) {
                fields.insert(pair[0].clone(), pair[1].clone());
            }
            let added = fields.len() as i64;
            db.put_entity(key.clone(), DataEntity::Hash(fields));
            added
        }
    };
    db.add_aof(with_name("HSET", args));
    Reply::Integer(added)
}

/// HGET key field
fn exec_hget(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match db.with_entity(&args[0], |entity| match entity {
        DataEntity::Hash(fields) => Ok(fields.get(&args[1]).cloned()),
        _ => Err(()),
    }) {
        None => Reply::Null,
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok(None)) => Reply::Null,
        Some(Ok(Some(value))) => Reply::Bulk(value),
    }
}

/// HDEL key field [field ...] — an emptied hash is removed.
fn exec_hdel(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = args[0].clone();
    let removed = db.with_entity_mut(&key, |entity| match entity {
        DataEntity::Hash(fields) => {
            let mut removed = 0i64;
            for field in &args[1..] {
                if fields.remove(field).is_some() {
                    removed += 1;
                }
            }
            Ok((removed, fields.is_empty()))
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
                db.add_aof(with_name("HDEL", args));
            }
            Reply::Integer(removed)
        }
    }
}

/// HLEN key
fn exec_hlen(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match db.with_entity(&args[0], |entity| match entity {
        DataEntity::Hash(fields) => Ok(fields.len() as i64),
        _ => Err(()),
    }) {
        None => Reply::Integer(0),
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok(len)) => Reply::Integer(len),
    }
}

/// HGETALL key — flat field/value array.
fn exec_hgetall(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match db.with_entity(&args[0], |entity| match entity {
        DataEntity::Hash(fields) => {
            let mut flat = Vec::with_capacity(fields.len() * 2);
            for (field, value) in fields {
                flat.push(Reply::Bulk(field.clone()));
                flat.push(Reply::Bulk(value.clone()));
            }
            Ok(flat)
        }
        _ => Err(()),
    }) {
        None => Reply::Array(Vec::new()),
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok(flat)) => Reply::Array(flat),
    }
}

pub(super) fn register(table: &mut Table) {
    use super::{read_first_key, register as cmd, undo_first_key, write_first_key};
    use CommandFlags::{ReadOnly, Write};

    cmd(table, "hset", exec_hset, Some(write_first_key), Some(undo_first_key), -4, Write);
    cmd(table, "hget", exec_hget, Some(read_first_key), None, 3, ReadOnly);
    cmd(table, "hdel", exec_hdel, Some(write_first_key), Some(undo_first_key), -3, Write);
    cmd(table, "hlen", exec_hlen, Some(read_first_key), None, 2, ReadOnly);
    cmd(table, "hgetall", exec_hgetall, Some(read_first_key), None, 2, ReadOnly);
}

#[cfg(test)]
mod tests {
    use crate::engine::{Engine, EngineConfig};
    use crate::session::Session;
    use crate::testutil::run;
    use cinder_protocol::Reply;

    fn setup() -> (Engine, Session) {
        (Engine::new(EngineConfig::default()).unwrap(), Session::new())
    }

    #[test]
    fn hset_counts_new_fields() {
        let (engine, session) = setup();
        assert_eq!(
            run(&engine, &session, &["HSET", "h", "a", "1", "b", "2"]),
            Reply::Integer(2)
        );
        assert_eq!(
            run(&engine, &session, &["HSET", "h", "a", "updated", "c", "3"]),
            Reply::Integer(1)
        );
        assert_eq!(
            run(&engine, &session, &["HGET", "h", "a"]),
            Reply::bulk(&b"updated"[..])
        );
        assert_eq!(run(&engine, &session, &["HLEN", "h"]), Reply::Integer(3));
        // dangling field name
        assert_eq!(
            run(&engine, &session, &["HSET", "h", "odd"]),
            Reply::arg_num_err("hset")
        );
        engine.close();
    }

    #[test]
    fn hget_missing() {
        let (engine, session) = setup();
        assert_eq!(run(&engine, &session, &["HGET", "h", "f"]), Reply::Null);
        run(&engine, &session, &["HSET", "h", "f", "v"]);
        assert_eq!(run(&engine, &session, &["HGET", "h", "nope"]), Reply::Null);
        engine.close();
    }

    #[test]
    fn hdel_removes_and_cleans_up() {
        let (engine, session) = setup();
        run(&engine, &session, &["HSET", "h", "a", "1", "b", "2"]);
        assert_eq!(
            run(&engine, &session, &["HDEL", "h", "a", "missing"]),
            Reply::Integer(1)
        );
        assert_eq!(run(&engine, &session, &["HDEL", "h", "b"]), Reply::Integer(1));
        assert_eq!(run(&engine, &session, &["EXISTS", "h"]), Reply::Integer(0));
        engine.close();
    }

    #[test]
    fn hgetall_flattens() {
        let (engine, session) = setup();
        run(&engine, &session, &["HSET", "h", "f", "v"]);
        match run(&engine, &session, &["HGETALL", "h"]) {
            Reply::Array(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0], Reply::bulk(&b"f"[..]));
                assert_eq!(items[1], Reply::bulk(&b"v"[..]));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            run(&engine, &session, &["HGETALL", "none"]),
            Reply::Array(vec![])
        );
        engine.close();
    }

    #[test]
    fn wrong_type_checks() {
        let (engine, session) = setup();
        run(&engine, &session, &["SET", "s", "v"]);
        assert_eq!(
            run(&engine, &session, &["HSET", "s", "f", "v"]),
            Reply::wrong_type()
        );
        assert_eq!(
            run(&engine, &session, &["HGETALL", "s"]),
            Reply::wrong_type()
        );
        engine.close();
    }
}
