//! Command registry.
//!
//! Maps a lowercase command name to its executor, key-preparation
//! function, undo-log generator, arity, and read/write flag. The table
//! is assembled once, on first lookup; each family module contributes
//! its entries.
//!
//! Arity counts the command name itself: `arity >= 0` demands exactly
//! that many words, `arity < 0` at least `|arity|`. A command without a
//! prepare function has no declarable key set and is therefore refused
//! inside MULTI.

mod hashes;
mod keys;
mod lists;
mod sets;
mod strings;
mod zsets;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use cinder_protocol::{CmdLine, Reply};

use crate::aof::{entity_to_cmd, ttl_cmd};
use crate::db::Database;

pub type ExecFn = fn(&Arc<Database>, &[Bytes]) -> Reply;
pub type PrepareFn = fn(&[Bytes]) -> (Vec<Bytes>, Vec<Bytes>);
pub type UndoFn = fn(&Arc<Database>, &[Bytes]) -> Vec<CmdLine>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFlags {
    Write,
    ReadOnly,
}

pub struct Command {
    pub executor: ExecFn,
    pub prepare: Option<PrepareFn>,
    pub undo: Option<UndoFn>,
    pub arity: i32,
    pub flags: CommandFlags,
}

type Table = HashMap<&'static str, Command>;

fn table() -> &'static Table {
    static TABLE: OnceLock<Table> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Table::new();
        strings::register(&mut table);
        keys::register(&mut table);
        lists::register(&mut table);
        hashes::register(&mut table);
        sets::register(&mut table);
        zsets::register(&mut table);
        table
    })
}

pub(crate) fn lookup(name: &str) -> Option<&'static Command> {
    table().get(name)
}

#[allow(clippy::too_many_arguments)]
fn register(
    table: &mut Table,
    name: &'static str,
    executor: ExecFn,
    prepare: Option<PrepareFn>,
    undo: Option<UndoFn>,
    arity: i32,
    flags: CommandFlags,
) {
    table.insert(
        name,
        Command {
            executor,
            prepare,
            undo,
            arity,
            flags,
        },
    );
}

/// Validates a command-line length against a registered arity.
pub(crate) fn validate_arity(arity: i32, cmd_len: usize) -> bool {
    if arity >= 0 {
        cmd_len == arity as usize
    } else {
        cmd_len >= (-arity) as usize
    }
}

// ---------------------------------------------------------------------------
// shared prepare functions
// ---------------------------------------------------------------------------

pub(crate) fn write_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[0].clone()], Vec::new())
}

pub(crate) fn read_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), vec![args[0].clone()])
}

pub(crate) fn write_all_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (args.to_vec(), Vec::new())
}

pub(crate) fn read_all_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), args.to_vec())
}

// ---------------------------------------------------------------------------
// shared undo generators
// ---------------------------------------------------------------------------

/// Compensating commands restoring the current state of `keys`: for a
/// missing key a bare `DEL`, otherwise `DEL` + recreate + TTL restore.
pub(crate) fn undo_keys(db: &Arc<Database>, keys: &[Bytes]) -> Vec<CmdLine> {
    let mut undo = Vec::new();
    for key in keys {
        match db.get_entity(key) {
            None => undo.push(vec![Bytes::from_static(b"DEL"), key.clone()]),
            Some(entity) => {
                undo.push(vec![Bytes::from_static(b"DEL"), key.clone()]);
                undo.push(entity_to_cmd(key, &entity));
                undo.push(ttl_cmd(db, key));
            }
        }
    }
    undo
}

pub(crate) fn undo_first_key(db: &Arc<Database>, args: &[Bytes]) -> Vec<CmdLine> {
    undo_keys(db, &args[..1])
}

pub(crate) fn undo_all_keys(db: &Arc<Database>, args: &[Bytes]) -> Vec<CmdLine> {
    undo_keys(db, args)
}

// ---------------------------------------------------------------------------
// argument helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_i64(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

pub(crate) fn parse_f64(arg: &[u8]) -> Option<f64> {
    let value: f64 = std::str::from_utf8(arg).ok()?.parse().ok()?;
    (!value.is_nan()).then_some(value)
}

/// Rebuilds a full command line (`name` + args) for the journal.
pub(crate) fn with_name(name: &'static str, args: &[Bytes]) -> CmdLine {
    let mut cmd = Vec::with_capacity(args.len() + 1);
    cmd.push(Bytes::from_static(name.as_bytes()));
    cmd.extend(args.iter().cloned());
    cmd
}

/// Normalizes an inclusive `[start, stop]` index pair (negative counts
/// from the end) against `len` into a half-open `[start, stop)` range,
/// or `None` when the range is empty.
pub(crate) fn normalize_range(start: i64, stop: i64, len: u64) -> Option<(u64, u64)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len {
        return None;
    }
    Some((start as u64, (stop + 1) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_rules() {
        assert!(validate_arity(2, 2));
        assert!(!validate_arity(2, 3));
        assert!(validate_arity(-3, 3));
        assert!(validate_arity(-3, 7));
        assert!(!validate_arity(-3, 2));
    }

    #[test]
    fn table_has_the_core_commands() {
        for name in ["set", "get", "del", "pexpireat", "zadd", "lpush", "hset", "sadd"] {
            assert!(lookup(name).is_some(), "missing command {name}");
        }
        assert!(lookup("mystery").is_none());
    }

    #[test]
    fn keyless_commands_are_multi_forbidden() {
        for name in ["keys", "randomkey", "dbsize"] {
            let command = lookup(name).unwrap();
            assert!(command.prepare.is_none(), "{name} should have no prepare");
        }
    }

    #[test]
    fn range_normalization() {
        assert_eq!(normalize_range(0, -1, 5), Some((0, 5)));
        assert_eq!(normalize_range(1, 3, 5), Some((1, 4)));
        assert_eq!(normalize_range(-2, -1, 5), Some((3, 5)));
        assert_eq!(normalize_range(0, 99, 5), Some((0, 5)));
        assert_eq!(normalize_range(3, 1, 5), None);
        assert_eq!(normalize_range(9, 12, 5), None);
        assert_eq!(normalize_range(0, -1, 0), None);
    }

    #[test]
    fn numeric_parsers() {
        assert_eq!(parse_i64(b"42"), Some(42));
        assert_eq!(parse_i64(b"-7"), Some(-7));
        assert_eq!(parse_i64(b"4.5"), None);
        assert_eq!(parse_i64(b"x"), None);
        assert_eq!(parse_f64(b"2.5"), Some(2.5));
        assert_eq!(parse_f64(b"nan"), None);
    }
}
