//! Transactional execution: the EXEC path.
//!
//! Queued commands run atomically: every key any of them will write or
//! read — plus every watched key — is locked up front, watched versions
//! are validated, and only then do the commands execute, each preceded
//! by capturing an undo log of its first key's prior state. A command
//! that fails at runtime aborts the whole transaction: the undo logs
//! replay in reverse and EXEC answers EXECABORT. This rollback is
//! deliberate; it trades Redis's keep-going behavior for atomicity.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use cinder_protocol::{CmdLine, Reply};

use crate::cmd;
use crate::db::Database;

/// Runs the queued commands of a transaction. Called with the session's
/// multi flag already cleared; the queue and watch set are snapshots.
pub(crate) fn exec_multi(
    db: &Arc<Database>,
    cmds: &[CmdLine],
    watching: &HashMap<Bytes, u32>,
) -> Reply {
    // aggregate the lock footprint of the whole transaction
    let mut write_keys = Vec::new();
    let mut read_keys = Vec::new();
    for cmd_line in cmds {
        let name = String::from_utf8_lossy(&cmd_line[0]).to_ascii_lowercase();
        let Some(command) = cmd::lookup(&name) else {
            return Reply::unknown_command(&name);
        };
        if let Some(prepare) = command.prepare {
            let (write, read) = prepare(&cmd_line[1..]);
            write_keys.extend(write);
            read_keys.extend(read);
        }
    }
    // read-lock the watched keys too, so no writer can bump their
    // versions between validation and commit
    read_keys.extend(watching.keys().cloned());

    let _locks = db.locks.rw_locks(&write_keys, &read_keys);

    if watching
        .iter()
        .any(|(key, version)| db.get_version(key) != *version)
    {
        // optimistic lock failure: a watched key changed since WATCH
        return Reply::NullArray;
    }

    let mut results = Vec::with_capacity(cmds.len());
    let mut undo_stack: Vec<Vec<CmdLine>> = Vec::with_capacity(cmds.len());
    let mut aborted = false;
    for cmd_line in cmds {
        undo_stack.push(undo_log(db, cmd_line));
        let reply = db.execute_with_locks_held(cmd_line);
        if reply.is_error() {
            // the failed command took no effect; its undo is unneeded
            undo_stack.pop();
            aborted = true;
            break;
        }
        results.push(reply);
    }

    if !aborted {
        db.add_version(&write_keys);
        return Reply::Array(results);
    }

    // roll back: newest first, each undo's commands in order
    for undo_cmds in undo_stack.iter().rev() {
        for cmd_line in undo_cmds {
            let _ = db.execute_with_locks_held(cmd_line);
        }
    }
    Reply::error("EXECABORT Transaction discarded because of previous errors.")
}

/// Compensating commands for `cmd_line`, captured before it runs.
pub(crate) fn undo_log(db: &Arc<Database>, cmd_line: &CmdLine) -> Vec<CmdLine> {
    let name = String::from_utf8_lossy(&cmd_line[0]).to_ascii_lowercase();
    let Some(command) = cmd::lookup(&name) else {
        return Vec::new();
    };
    match command.undo {
        Some(undo) => undo(db, &cmd_line[1..]),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use cinder_protocol::Reply;

    use crate::engine::{Engine, EngineConfig};
    use crate::session::Session;
    use crate::testutil::run;

    fn setup() -> (Engine, Session) {
        (Engine::new(EngineConfig::default()).unwrap(), Session::new())
    }

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn transaction_commits_atomically() {
        let (engine, session) = setup();
        assert_eq!(run(&engine, &session, &["MULTI"]), Reply::ok());
        assert_eq!(
            run(&engine, &session, &["SET", "a", "1"]),
            Reply::queued()
        );
        assert_eq!(
            run(&engine, &session, &["SET", "b", "2"]),
            Reply::queued()
        );

        // nothing applied while queued
        let observer = Session::new();
        assert_eq!(run(&engine, &observer, &["GET", "a"]), Reply::Null);

        assert_eq!(
            run(&engine, &session, &["EXEC"]),
            Reply::Array(vec![Reply::ok(), Reply::ok()])
        );
        assert_eq!(
            run(&engine, &observer, &["GET", "a"]),
            Reply::bulk(&b"1"[..])
        );
        assert_eq!(
            run(&engine, &observer, &["GET", "b"]),
            Reply::bulk(&b"2"[..])
        );

        // committed write keys got exactly one version bump
        let db = engine.db(0).unwrap();
        assert_eq!(db.get_version(&key("a")), 1);
        assert_eq!(db.get_version(&key("b")), 1);
        engine.close();
    }

    #[test]
    fn runtime_error_rolls_the_whole_transaction_back() {
        let (engine, session) = setup();
        run(&engine, &session, &["SET", "a", "old"]);

        run(&engine, &session, &["MULTI"]);
        assert_eq!(
            run(&engine, &session, &["SET", "a", "new"]),
            Reply::queued()
        );
        // INCR on a non-numeric value fails at runtime, not at queueing
        assert_eq!(run(&engine, &session, &["INCR", "a"]), Reply::queued());

        let reply = run(&engine, &session, &["EXEC"]);
        match reply {
            Reply::Error(msg) => assert!(msg.starts_with("EXECABORT"), "got {msg}"),
            other => panic!("expected EXECABORT, got {other:?}"),
        }
        assert_eq!(
            run(&engine, &session, &["GET", "a"]),
            Reply::bulk(&b"old"[..])
        );
        engine.close();
    }

    #[test]
    fn rollback_restores_missing_keys_and_ttls() {
        let (engine, session) = setup();
        run(&engine, &session, &["SET", "timed", "v"]);
        run(&engine, &session, &["EXPIRE", "timed", "100"]);

        run(&engine, &session, &["MULTI"]);
        run(&engine, &session, &["SET", "fresh", "x"]);
        run(&engine, &session, &["DEL", "timed"]);
        run(&engine, &session, &["INCR", "timed"]); // "v" is not a number... key deleted, so INCR creates 1
        run(&engine, &session, &["INCR", "fresh"]); // fails: "x" is not a number
        let reply = run(&engine, &session, &["EXEC"]);
        assert!(reply.is_error());

        // "fresh" was created inside the transaction: rolled back to absent
        assert_eq!(run(&engine, &session, &["GET", "fresh"]), Reply::Null);
        // "timed" came back with its value and an expiry
        assert_eq!(
            run(&engine, &session, &["GET", "timed"]),
            Reply::bulk(&b"v"[..])
        );
        match run(&engine, &session, &["TTL", "timed"]) {
            Reply::Integer(secs) => assert!((1..=100).contains(&secs), "ttl {secs}"),
            other => panic!("expected ttl, got {other:?}"),
        }
        engine.close();
    }

    #[test]
    fn watch_conflict_aborts_with_null_array() {
        let (engine, session) = setup();
        run(&engine, &session, &["SET", "k", "0"]);
        assert_eq!(run(&engine, &session, &["WATCH", "k"]), Reply::ok());
        run(&engine, &session, &["MULTI"]);
        run(&engine, &session, &["SET", "k", "1"]);

        // another session writes the watched key before EXEC
        let intruder = Session::new();
        assert_eq!(run(&engine, &intruder, &["SET", "k", "9"]), Reply::ok());

        assert_eq!(run(&engine, &session, &["EXEC"]), Reply::NullArray);
        assert_eq!(
            run(&engine, &session, &["GET", "k"]),
            Reply::bulk(&b"9"[..])
        );
        engine.close();
    }

    #[test]
    fn unchanged_watch_lets_the_transaction_through() {
        let (engine, session) = setup();
        run(&engine, &session, &["SET", "k", "0"]);
        run(&engine, &session, &["WATCH", "k"]);
        run(&engine, &session, &["MULTI"]);
        run(&engine, &session, &["SET", "k", "1"]);
        assert_eq!(
            run(&engine, &session, &["EXEC"]),
            Reply::Array(vec![Reply::ok()])
        );
        engine.close();
    }

    #[test]
    fn queueing_errors_poison_the_exec() {
        let (engine, session) = setup();
        run(&engine, &session, &["MULTI"]);
        assert!(run(&engine, &session, &["NOSUCHCMD"]).is_error());
        assert_eq!(
            run(&engine, &session, &["SET", "a", "1"]),
            Reply::queued()
        );
        let reply = run(&engine, &session, &["EXEC"]);
        match reply {
            Reply::Error(msg) => assert!(msg.starts_with("EXECABORT")),
            other => panic!("expected EXECABORT, got {other:?}"),
        }
        assert_eq!(run(&engine, &session, &["GET", "a"]), Reply::Null);
        engine.close();
    }

    #[test]
    fn keyless_commands_cannot_be_queued() {
        let (engine, session) = setup();
        run(&engine, &session, &["MULTI"]);
        assert!(run(&engine, &session, &["KEYS", "*"]).is_error());
        assert!(run(&engine, &session, &["EXEC"]).is_error());
        engine.close();
    }

    #[test]
    fn discard_resets_the_transaction() {
        let (engine, session) = setup();
        run(&engine, &session, &["MULTI"]);
        run(&engine, &session, &["SET", "a", "1"]);
        assert_eq!(run(&engine, &session, &["DISCARD"]), Reply::ok());
        assert!(!session.in_multi());
        assert_eq!(run(&engine, &session, &["GET", "a"]), Reply::Null);
        // a later MULTI starts clean
        run(&engine, &session, &["MULTI"]);
        assert_eq!(run(&engine, &session, &["EXEC"]), Reply::Array(vec![]));
        engine.close();
    }

    #[test]
    fn control_command_misuse() {
        let (engine, session) = setup();
        assert!(run(&engine, &session, &["EXEC"]).is_error());
        assert!(run(&engine, &session, &["DISCARD"]).is_error());
        run(&engine, &session, &["MULTI"]);
        assert!(run(&engine, &session, &["MULTI"]).is_error());
        assert!(run(&engine, &session, &["WATCH", "k"]).is_error());
        assert!(run(&engine, &session, &["SELECT", "1"]).is_error());
        run(&engine, &session, &["DISCARD"]);
        engine.close();
    }
}
