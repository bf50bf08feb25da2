//! The engine: a fixed set of logical databases behind one dispatch
//! point.
//!
//! Owns the time wheel and the journal. Each database slot is an
//! atomically replaceable `Arc`, which is what makes FLUSHDB a swap
//! instead of a scan-and-delete. Sessions address a database by index;
//! `SELECT` only mutates the session.
//!
//! Executor panics are caught here, at the dispatch boundary: the
//! session gets a generic error and stays connected.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use cinder_protocol::{CmdLine, Reply};
use tracing::{error, info};

use crate::aof::{Aof, SyncMode};
use crate::db::Database;
use crate::error::EngineError;
use crate::session::Session;
use crate::wheel::TimeWheel;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of logical databases.
    pub databases: usize,
    /// Shard-count hint for the data and version dicts.
    pub data_dict_size: usize,
    /// Shard-count hint for the TTL dict.
    pub ttl_dict_size: usize,
    /// Lock-table size hint.
    pub locker_size: usize,
    /// Whether the journal writer is active.
    pub append_only: bool,
    /// Journal file path; required when `append_only`.
    pub append_filename: Option<PathBuf>,
    /// Journal fsync policy.
    pub append_mode: SyncMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            databases: 16,
            data_dict_size: 1024,
            ttl_dict_size: 1024,
            locker_size: 1024,
            append_only: false,
            append_filename: None,
            append_mode: SyncMode::default(),
        }
    }
}

pub struct Engine {
    slots: Vec<RwLock<Arc<Database>>>,
    wheel: Option<TimeWheel>,
    pub(crate) aof: Option<Aof>,
    config: EngineConfig,
}

impl Engine {
    /// Builds a live engine: spawns the time wheel, creates the
    /// databases, and — when persistence is on — replays the journal
    /// and starts the journal writer.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let wheel = TimeWheel::start();
        let databases = config.databases.max(1);
        let slots = (0..databases)
            .map(|index| {
                RwLock::new(Arc::new(Database::new(index, &config, Some(wheel.clone()))))
            })
            .collect();

        let mut engine = Engine {
            slots,
            wheel: Some(wheel),
            aof: None,
            config,
        };

        if engine.config.append_only {
            let path = engine
                .config
                .append_filename
                .clone()
                .ok_or(EngineError::MissingJournalPath)?;
            let aof = Aof::new(
                &engine,
                path,
                engine.config.append_mode,
                Box::new(move || Engine::basic(databases)),
            )?;
            for slot in &engine.slots {
                read_slot(slot).set_aof_link(aof.link());
            }
            engine.aof = Some(aof);
            info!("append-only journal enabled");
        }

        Ok(engine)
    }

    /// A bare engine: unsynchronized databases, no wheel, no journal.
    /// Rewrites replay the journal prefix into one of these.
    pub(crate) fn basic(databases: usize) -> Self {
        let slots = (0..databases.max(1))
            .map(|index| RwLock::new(Arc::new(Database::basic(index))))
            .collect();
        Engine {
            slots,
            wheel: None,
            aof: None,
            config: EngineConfig {
                databases,
                append_only: false,
                ..EngineConfig::default()
            },
        }
    }

    pub fn databases(&self) -> usize {
        self.slots.len()
    }

    /// The database at `index`, if in range.
    pub fn db(&self, index: usize) -> Option<Arc<Database>> {
        self.slots.get(index).map(read_slot)
    }

    /// Executes one command line for a session. Never panics outward;
    /// an executor panic becomes an error reply.
    pub fn execute(&self, session: &Session, cmd: &CmdLine) -> Reply {
        match catch_unwind(AssertUnwindSafe(|| self.execute_inner(session, cmd))) {
            Ok(reply) => reply,
            Err(_) => {
                error!("command execution panicked");
                Reply::error("ERR unknown error")
            }
        }
    }

    fn execute_inner(&self, session: &Session, cmd: &CmdLine) -> Reply {
        if cmd.is_empty() {
            return Reply::error("ERR empty command");
        }
        let name = String::from_utf8_lossy(&cmd[0]).to_ascii_lowercase();
        match name.as_str() {
            "ping" => match cmd.len() {
                1 => Reply::Status("PONG".into()),
                2 => Reply::Bulk(cmd[1].clone()),
                _ => Reply::arg_num_err(&name),
            },
            "echo" => {
                if cmd.len() == 2 {
                    Reply::Bulk(cmd[1].clone())
                } else {
                    Reply::arg_num_err(&name)
                }
            }
            "select" => self.exec_select(session, cmd),
            "flushdb" => {
                if session.in_multi() {
                    return Reply::error("ERR command 'flushdb' cannot be used in MULTI");
                }
                if cmd.len() != 1 {
                    return Reply::arg_num_err(&name);
                }
                self.flush_db(session.db_index())
            }
            "bgrewriteaof" => {
                if cmd.len() != 1 {
                    return Reply::arg_num_err(&name);
                }
                self.bg_rewrite_aof()
            }
            _ => match self.db(session.db_index()) {
                Some(db) => db.execute(session, cmd),
                None => Reply::error("ERR DB index is out of range"),
            },
        }
    }

    /// SELECT only changes the session's index. Switching databases in
    /// the middle of a transaction is rejected.
    fn exec_select(&self, session: &Session, cmd: &CmdLine) -> Reply {
        if session.in_multi() {
            return Reply::error("ERR cannot select database within multi");
        }
        if cmd.len() != 2 {
            return Reply::arg_num_err("select");
        }
        let index = match std::str::from_utf8(&cmd[1])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            Some(index) => index,
            None => return Reply::error("ERR invalid DB index"),
        };
        if index >= self.slots.len() {
            return Reply::error("ERR DB index is out of range");
        }
        session.select_db(index);
        Reply::ok()
    }

    /// Swaps the slot with a fresh database, carrying over the journal
    /// link, and journals the flush so replay reproduces it.
    fn flush_db(&self, index: usize) -> Reply {
        let Some(slot) = self.slots.get(index) else {
            return Reply::error("ERR DB index is out of range");
        };
        let fresh = if self.wheel.is_some() {
            Database::new(index, &self.config, self.wheel.clone())
        } else {
            Database::basic(index)
        };
        let old = read_slot(slot);
        if let Some(link) = old.aof_link() {
            fresh.set_aof_link(link.clone());
        }
        let fresh = Arc::new(fresh);
        *slot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&fresh);
        fresh.add_aof(vec![bytes::Bytes::from_static(b"FLUSHDB")]);
        Reply::ok()
    }

    fn bg_rewrite_aof(&self) -> Reply {
        let Some(aof) = &self.aof else {
            return Reply::error("ERR append only file support is disabled");
        };
        let aof = aof.clone();
        std::thread::Builder::new()
            .name("aof-rewrite".into())
            .spawn(move || {
                if let Err(e) = aof.rewrite() {
                    error!(error = %e, "background aof rewrite failed");
                }
            })
            .expect("spawn aof rewrite thread");
        Reply::Status("Background append only file rewriting started".into())
    }

    /// Graceful shutdown: drain and close the journal, then stop the
    /// wheel. Sessions must already be closed — nothing may produce
    /// journal payloads past this point.
    pub fn close(&self) {
        if let Some(aof) = &self.aof {
            aof.close();
        }
        if let Some(wheel) = &self.wheel {
            wheel.stop();
        }
        info!("engine closed");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("databases", &self.slots.len())
            .field("append_only", &self.config.append_only)
            .finish()
    }
}

fn read_slot(slot: &RwLock<Arc<Database>>) -> Arc<Database> {
    Arc::clone(&slot.read().unwrap_or_else(PoisonError::into_inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_protocol::cmd_line;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn run(engine: &Engine, session: &Session, parts: &[&str]) -> Reply {
        engine.execute(session, &cmd_line(parts.iter().map(|s| s.to_string())))
    }

    #[test]
    fn ping_and_echo() {
        let engine = engine();
        let session = Session::new();
        assert_eq!(
            run(&engine, &session, &["PING"]),
            Reply::Status("PONG".into())
        );
        assert_eq!(
            run(&engine, &session, &["PING", "hi"]),
            Reply::bulk(&b"hi"[..])
        );
        assert_eq!(
            run(&engine, &session, &["ECHO", "hello"]),
            Reply::bulk(&b"hello"[..])
        );
        engine.close();
    }

    #[test]
    fn select_scopes_keys_per_database() {
        let engine = engine();
        let session = Session::new();
        run(&engine, &session, &["SET", "k", "zero"]);
        assert_eq!(run(&engine, &session, &["SELECT", "1"]), Reply::ok());
        assert_eq!(run(&engine, &session, &["GET", "k"]), Reply::Null);
        run(&engine, &session, &["SELECT", "0"]);
        assert_eq!(
            run(&engine, &session, &["GET", "k"]),
            Reply::bulk(&b"zero"[..])
        );
        engine.close();
    }

    #[test]
    fn select_out_of_range_keeps_the_session_index() {
        let engine = engine();
        let session = Session::new();
        let reply = run(&engine, &session, &["SELECT", "99"]);
        assert!(reply.is_error());
        assert_eq!(session.db_index(), 0);
        assert!(run(&engine, &session, &["SELECT", "notanumber"]).is_error());
        assert_eq!(session.db_index(), 0);
        engine.close();
    }

    #[test]
    fn flushdb_swaps_the_keyspace() {
        let engine = engine();
        let session = Session::new();
        run(&engine, &session, &["SET", "a", "1"]);
        run(&engine, &session, &["SET", "b", "2"]);
        assert_eq!(run(&engine, &session, &["DBSIZE"]), Reply::Integer(2));
        assert_eq!(run(&engine, &session, &["FLUSHDB"]), Reply::ok());
        assert_eq!(run(&engine, &session, &["DBSIZE"]), Reply::Integer(0));
        assert_eq!(run(&engine, &session, &["GET", "a"]), Reply::Null);
        engine.close();
    }

    #[test]
    fn unknown_commands_and_arity() {
        let engine = engine();
        let session = Session::new();
        assert_eq!(
            run(&engine, &session, &["NOSUCHCMD", "x"]),
            Reply::unknown_command("nosuchcmd")
        );
        assert_eq!(
            run(&engine, &session, &["GET"]),
            Reply::arg_num_err("get")
        );
        assert_eq!(
            run(&engine, &session, &["GET", "a", "b"]),
            Reply::arg_num_err("get")
        );
        engine.close();
    }

    #[test]
    fn bgrewriteaof_without_journal_errors() {
        let engine = engine();
        let session = Session::new();
        assert!(run(&engine, &session, &["BGREWRITEAOF"]).is_error());
        engine.close();
    }
}
