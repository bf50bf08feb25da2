//! Sorted-set commands.

use std::sync::Arc;

use bytes::Bytes;
use cinder_protocol::Reply;

use crate::aof::format_score;
use crate::db::Database;
use crate::types::DataEntity;
use crate::zset::{Element, ScoreBorder, SortedSet};

use super::{normalize_range, parse_f64, parse_i64, with_name, CommandFlags, Table};

fn with_zset<R>(
    db: &Database,
    key: &Bytes,
    f: impl FnOnce(&SortedSet) -> R,
) -> Result<Option<R>, Reply> {
    match db.with_entity(key, |entity| match entity {
        DataEntity::Zset(set) => Ok(f(set)),
        _ => Err(()),
    }) {
        None => Ok(None),
        Some(Ok(result)) => Ok(Some(result)),
        Some(Err(())) => Err(Reply::wrong_type()),
    }
}

fn with_zset_mut<R>(
    db: &Database,
    key: &Bytes,
    f: impl FnOnce(&mut SortedSet) -> R,
) -> Result<Option<R>, Reply> {
    match db.with_entity_mut(key, |entity| match entity {
        DataEntity::Zset(set) => Ok(f(set)),
        _ => Err(()),
    }) {
        None => Ok(None),
        Some(Ok(result)) => Ok(Some(result)),
        Some(Err(())) => Err(Reply::wrong_type()),
    }
}

fn parse_border(raw: &[u8]) -> Result<ScoreBorder, Reply> {
    ScoreBorder::parse(raw).ok_or_else(|| Reply::error("ERR min or max is not a float"))
}

/// Renders elements, with scores interleaved when requested.
fn elements_reply(elements: Vec<Element>, with_scores: bool) -> Reply {
    let mut items = Vec::with_capacity(elements.len() * if with_scores { 2 } else { 1 });
    for element in elements {
        items.push(Reply::Bulk(element.member));
        if with_scores {
            items.push(Reply::Bulk(format_score(element.score)));
        }
    }
    Reply::Array(items)
}

/// ZADD key score member [score member ...]
fn exec_zadd(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    if (args.len() - 1) % 2 != 0 {
        return Reply::syntax_err();
    }
    let key = args[0].clone();
    let mut pairs = Vec::with_capacity((args.len() - 1) / 2);
    for chunk in args[1..].chunks_exact(2) {
        let Some(score) = parse_f64(&chunk[0]) else {
            return Reply::not_a_float();
        };
        pairs.push((chunk[1].clone(), score));
    }

    let added = with_zset_mut(db, &key, |set| {
        let mut added = 0i64;
        for (member, score) in &pairs {
            if set.add(member.clone(), *score) {
                added += 1;
            }
        }
        added
    });
    let added = match added {
        Err(reply) => return reply,
        Ok(Some(added)) => added,
        Ok(None) => {
            let mut set = SortedSet::new();
            let mut added = 0i64;
            for (member, score) in &pairs {
                if set.add(member.clone(), *score) {
                    added += 1;
                }
            }
            db.put_entity(key.clone(), DataEntity::Zset(set));
            added
        }
    };
    db.add_aof(with_name("ZADD", args));
    Reply::Integer(added)
}

/// ZSCORE key member
fn exec_zscore(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match with_zset(db, &args[0], |set| set.score(&args[1])) {
        Err(reply) => reply,
        Ok(None) | Ok(Some(None)) => Reply::Null,
        Ok(Some(Some(score))) => Reply::Bulk(format_score(score)),
    }
}

/// ZCARD key
fn exec_zcard(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match with_zset(db, &args[0], |set| set.len() as i64) {
        Err(reply) => reply,
        Ok(None) => Reply::Integer(0),
        Ok(Some(len)) => Reply::Integer(len),
    }
}

fn rank_reply(rank: Option<Option<u64>>) -> Reply {
    match rank {
        None | Some(None) => Reply::Null,
        Some(Some(rank)) => Reply::Integer(rank as i64),
    }
}

/// ZRANK key member — ascending, 0-based.
fn exec_zrank(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match with_zset(db, &args[0], |set| set.rank(&args[1], false)) {
        Err(reply) => reply,
        Ok(rank) => rank_reply(rank),
    }
}

/// ZREVRANK key member — descending, 0-based.
fn exec_zrevrank(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    match with_zset(db, &args[0], |set| set.rank(&args[1], true)) {
        Err(reply) => reply,
        Ok(rank) => rank_reply(rank),
    }
}

/// ZCOUNT key min max
fn exec_zcount(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let min = match parse_border(&args[1]) {
        Ok(border) => border,
        Err(reply) => return reply,
    };
    let max = match parse_border(&args[2]) {
        Ok(border) => border,
        Err(reply) => return reply,
    };
    match with_zset(db, &args[0], |set| set.count_by_score(&min, &max) as i64) {
        Err(reply) => reply,
        Ok(None) => Reply::Integer(0),
        Ok(Some(count)) => Reply::Integer(count),
    }
}

/// Shared ZRANGE/ZREVRANGE body.
fn range_by_rank(db: &Arc<Database>, args: &[Bytes], desc: bool) -> Reply {
    let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
        return Reply::not_an_integer();
    };
    let with_scores = match args.get(3) {
        None => false,
        Some(opt) if opt.eq_ignore_ascii_case(b"WITHSCORES") => true,
        Some(_) => return Reply::syntax_err(),
    };
    if args.len() > 4 {
        return Reply::syntax_err();
    }
    match with_zset(db, &args[0], |set| {
        match normalize_range(start, stop, set.len()) {
            Some((start, stop)) => set.range_by_rank(start, stop, desc),
            None => Vec::new(),
        }
    }) {
        Err(reply) => reply,
        Ok(None) => Reply::Array(Vec::new()),
        Ok(Some(elements)) => elements_reply(elements, with_scores),
    }
}

fn exec_zrange(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    range_by_rank(db, args, false)
}

fn exec_zrevrange(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    range_by_rank(db, args, true)
}

/// ZRANGEBYSCORE key min max [WITHSCORES] [LIMIT offset count]
fn exec_zrangebyscore(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let min = match parse_border(&args[1]) {
        Ok(border) => border,
        Err(reply) => return reply,
    };
    let max = match parse_border(&args[2]) {
        Ok(border) => border,
        Err(reply) => return reply,
    };

    let mut with_scores = false;
    let mut offset = 0u64;
    let mut limit = -1i64;
    let mut i = 3;
    while i < args.len() {
        let opt = &args[i];
        if opt.eq_ignore_ascii_case(b"WITHSCORES") {
            with_scores = true;
        } else if opt.eq_ignore_ascii_case(b"LIMIT") {
            let (Some(raw_offset), Some(raw_count)) = (args.get(i + 1), args.get(i + 2)) else {
                return Reply::syntax_err();
            };
            let (Some(parsed_offset), Some(parsed_count)) =
                (parse_i64(raw_offset), parse_i64(raw_count))
            else {
                return Reply::not_an_integer();
            };
            if parsed_offset < 0 {
                // a negative offset yields nothing, matching Redis
                return Reply::Array(Vec::new());
            }
            offset = parsed_offset as u64;
            limit = parsed_count;
            i += 2;
        } else {
            return Reply::syntax_err();
        }
        i += 1;
    }

    match with_zset(db, &args[0], |set| {
        set.range_by_score(&min, &max, offset, limit, false)
    }) {
        Err(reply) => reply,
        Ok(None) => Reply::Array(Vec::new()),
        Ok(Some(elements)) => elements_reply(elements, with_scores),
    }
}

/// ZREM key member [member ...] — an emptied set is removed.
fn exec_zrem(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let key = args[0].clone();
    let removed = with_zset_mut(db, &key, |set| {
        let mut removed = 0i64;
        for member in &args[1..] {
            if set.remove(member) {
                removed += 1;
            }
        }
        (removed, set.is_empty())
    });
    match removed {
        Err(reply) => reply,
        Ok(None) => Reply::Integer(0),
        Ok(Some((removed, emptied))) => {
            if emptied {
                db.remove(&key);
            }
            if removed > 0 {
                db.add_aof(with_name("ZREM", args));
            }
            Reply::Integer(removed)
        }
    }
}

/// ZREMRANGEBYRANK key start stop — inclusive rank range.
fn exec_zremrangebyrank(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
        return Reply::not_an_integer();
    };
    let key = args[0].clone();
    let removed = with_zset_mut(db, &key, |set| {
        match normalize_range(start, stop, set.len()) {
            Some((start, stop)) => {
                let removed = set.remove_range_by_rank(start, stop) as i64;
                (removed, set.is_empty())
            }
            None => (0, set.is_empty()),
        }
    });
    finish_range_removal(db, &key, args, removed, "ZREMRANGEBYRANK")
}

/// ZREMRANGEBYSCORE key min max
fn exec_zremrangebyscore(db: &Arc<Database>, args: &[Bytes]) -> Reply {
    let min = match parse_border(&args[1]) {
        Ok(border) => border,
        Err(reply) => return reply,
    };
    let max = match parse_border(&args[2]) {
        Ok(border) => border,
        Err(reply) => return reply,
    };
    let key = args[0].clone();
    let removed = with_zset_mut(db, &key, |set| {
        let removed = set.remove_range_by_score(&min, &max) as i64;
        (removed, set.is_empty())
    });
    finish_range_removal(db, &key, args, removed, "ZREMRANGEBYSCORE")
}

fn finish_range_removal(
    db: &Arc<Database>,
    key: &Bytes,
    args: &[Bytes],
    removed: Result<Option<(i64, bool)>, Reply>,
    journal_name: &'static str,
) -> Reply {
    match removed {
        Err(reply) => reply,
        Ok(None) => Reply::Integer(0),
        Ok(Some((removed, emptied))) => {
            if emptied {
                db.remove(key);
            }
            if removed > 0 {
                db.add_aof(with_name(journal_name, args));
            }
            Reply::Integer(removed)
        }
    }
}

pub(super) fn register(table: &mut Table) {
    use super::{read_first_key, register as cmd, undo_first_key, write_first_key};
    use CommandFlags::{ReadOnly, Write};

    cmd(table, "zadd", exec_zadd, Some(write_first_key), Some(undo_first_key), -4, Write);
    cmd(table, "zscore", exec_zscore, Some(read_first_key), None, 3, ReadOnly);
    cmd(table, "zcard", exec_zcard, Some(read_first_key), None, 2, ReadOnly);
    cmd(table, "zrank", exec_zrank, Some(read_first_key), None, 3, ReadOnly);
    cmd(table, "zrevrank", exec_zrevrank, Some(read_first_key), None, 3, ReadOnly);
    cmd(table, "zcount", exec_zcount, Some(read_first_key), None, 4, ReadOnly);
    cmd(table, "zrange", exec_zrange, Some(read_first_key), None, -4, ReadOnly);
    cmd(table, "zrevrange", exec_zrevrange, Some(read_first_key), None, -4, ReadOnly);
    cmd(table, "zrangebyscore", exec_zrangebyscore, Some(read_first_key), None, -4, ReadOnly);
    cmd(table, "zrem", exec_zrem, Some(write_first_key), Some(undo_first_key), -3, Write);
    cmd(table, "zremrangebyrank", exec_zremrangebyrank, Some(write_first_key), Some(undo_first_key), 4, Write);
    cmd(table, "zremrangebyscore", exec_zremrangebyscore, Some(write_first_key), Some(undo_first_key), 4, Write);
}
