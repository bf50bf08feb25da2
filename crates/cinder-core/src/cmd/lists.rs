//! List commands.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use cinder_protocol::Reply;

use crate::db::Database;
use crate::types::DataEntity;

use super::{normalize_range, parse_i64, with_name, CommandFlags, Table};

/// Shared LPUSH/RPUSH body.
fn push(db: &Arc<Database>, args: &[Bytes], front: bool, journal_name: &'static str) -> Reply {
    let key = args[0].clone();
    let values = &args[1..];

    let pushed = db.with_entity_mut(&key, |entity| match entity {
        DataEntity::List(list) => {
            for value in values {
                if front {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            Ok(list.len())
        }
        _ => Err(()),
    });

    let len = match pushed {
        Some(Ok(len)) => len,
        Some(Err(())) => return Reply::wrong_type(),
        None => {
            let mut list = VecDeque::with_capacity(values.len());
            for value in values {
                if front {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            let len = list.len();
            db.put_entity(key.clone(), DataEntity::List(list));
            len
        }
    };
    db.add_aof(with_name(journal_name, args));
    Reply::Integer(len as i64)
}

fn exec_lpush(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    push(db, args, true, "LPUSH")
}

fn exec_rpush(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    push(db, args, false, "RPUSH")
}

/// Shared LPOP/RPOP body. An emptied list is removed from the keyspace.
fn pop(db: &Arc<Database>, args: &[Bytes], front: bool, journal_name: &'static str) -> Reply {
    let key = args[0].clone();
    let popped = db.with_entity_mut(&key, |entity| match entity {
        DataEntity::List(list) => {
            let value = if front {
                list.pop_front()
            } else {
                list.pop_back()
            };
            Ok((value, list.is_empty()))
        }
        _ => Err(()),
    });
    match popped {
        None => Reply::Null,
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok((None, _))) => Reply::Null,
        Some(Ok((Some(value), emptied))) => {
            if emptied {
                db.remove(&key);
            }
            db.add_aof(with_name(journal_name, args));
            Reply::Bulk(value)
        }
    }
}

fn exec_lpop(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    pop(db, args, true, "LPOP")
}

fn exec_rpop(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    pop(db, args, false, "RPOP")
}

/// LLEN key
fn exec_llen(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match db.with_entity(&args[0], |entity| match entity {
        DataEntity::List(list) => Ok(list.len() as i64),
        _ => Err(()),
    }) {
        None => Reply::Integer(0),
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok(len)) => Reply::Integer(len),
    }
}

/// LRANGE key start stop — inclusive indices, negative from the end.
fn exec_lrange(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
        return Reply::not_an_integer();
    };
    match db.with_entity(&args[0], |entity| match entity {
        DataEntity::List(list) => {
            let Some((start, stop)) = normalize_range(start, stop, list.len() as u64) else {
                return Ok(Vec::new());
            };
            Ok(list
                .iter()
                .skip(start as usize)
                .take((stop - start) as usize)
                .cloned()
                .map(Reply::Bulk)
                .collect())
        }
        _ => Err(()),
    }) {
        None => Reply::Array(Vec::new()),
        Some(Err(())) => Reply::wrong_type(),
        Some(Ok(items)) => Reply::Array(items),
    }
}

pub(super) fn register(table: &mut Table) {
    use super::{read_first_key, register as cmd, undo_first_key, write_first_key};
    use CommandFlags::{ReadOnly, Write};

    cmd(table, "lpush", exec_lpush, Some(write_first_key), Some(undo_first_key), -3, Write);
    cmd(table, "rpush", exec_rpush, Some(write_first_key), Some(undo_first_key), -3, Write);
    cmd(table, "lpop", exec_lpop, Some(write_first_key), Some(undo_first_key), 2, Write);
    cmd(table, "rpop", exec_rpop, Some(write_first_key), Some(undo_first_key), 2, Write);
    cmd(table, "llen", exec_llen, Some(read_first_key), None, 2, ReadOnly);
    cmd(table, "lrange", exec_lrange, Some(read_first_key), None, 4, ReadOnly);
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

    fn bulks(items: &[&str]) -> Reply {
        Reply::Array(
            items
                .iter()
                .map(|s| Reply::bulk(s.as_bytes().to_vec()))
                .collect(),
        )
    }

    #[test]
    fn push_pop_both_ends() {
        let (engine, session) = setup();
        assert_eq!(
            run(&engine, &session, &["RPUSH", "l", "a", "b"]),
            Reply::Integer(2)
        );
        assert_eq!(
            run(&engine, &session, &["LPUSH", "l", "z"]),
            Reply::Integer(3)
        );
        assert_eq!(run(&engine, &session, &["LLEN", "l"]), Reply::Integer(3));
        assert_eq!(
            run(&engine, &session, &["LPOP", "l"]),
            Reply::bulk(&b"z"[..])
        );
        assert_eq!(
            run(&engine, &session, &["RPOP", "l"]),
            Reply::bulk(&b"b"[..])
        );
        engine.close();
    }

    #[test]
    fn popping_the_last_element_removes_the_key() {
        let (engine, session) = setup();
        run(&engine, &session, &["RPUSH", "l", "only"]);
        assert_eq!(
            run(&engine, &session, &["LPOP", "l"]),
            Reply::bulk(&b"only"[..])
        );
        assert_eq!(run(&engine, &session, &["EXISTS", "l"]), Reply::Integer(0));
        assert_eq!(run(&engine, &session, &["LPOP", "l"]), Reply::Null);
        engine.close();
    }

    #[test]
    fn lrange_indexing() {
        let (engine, session) = setup();
        run(&engine, &session, &["RPUSH", "l", "a", "b", "c", "d"]);
        assert_eq!(
            run(&engine, &session, &["LRANGE", "l", "0", "-1"]),
            bulks(&["a", "b", "c", "d"])
        );
        assert_eq!(
            run(&engine, &session, &["LRANGE", "l", "1", "2"]),
            bulks(&["b", "c"])
        );
        assert_eq!(
            run(&engine, &session, &["LRANGE", "l", "-2", "-1"]),
            bulks(&["c", "d"])
        );
        assert_eq!(
            run(&engine, &session, &["LRANGE", "l", "5", "9"]),
            Reply::Array(vec![])
        );
        assert_eq!(
            run(&engine, &session, &["LRANGE", "missing", "0", "-1"]),
            Reply::Array(vec![])
        );
        engine.close();
    }

    #[test]
    fn wrong_type_checks() {
        let (engine, session) = setup();
        run(&engine, &session, &["SET", "s", "v"]);
        assert_eq!(
            run(&engine, &session, &["LPUSH", "s", "x"]),
            Reply::wrong_type()
        );
        assert_eq!(run(&engine, &session, &["LLEN", "s"]), Reply::wrong_type());
        engine.close();
    }
}
