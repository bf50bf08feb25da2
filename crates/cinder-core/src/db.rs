//! A single logical database: one keyspace.
//!
//! Holds the data, TTL, and version dicts plus the key lock table.
//! Commands arrive through [`Database::execute`], which routes the
//! transactional verbs (MULTI/EXEC/DISCARD/WATCH), queues commands for
//! sessions inside a transaction, and otherwise runs the normal path:
//! registry lookup, arity check, key preparation, version bump, lock
//! acquisition, executor.
//!
//! Expired keys are removed on two paths that may race harmlessly: lazy
//! removal when an access notices the TTL has passed, and a time-wheel
//! task scheduled at the expiry instant.

use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use cinder_protocol::{CmdLine, Reply};
use tracing::debug;

use crate::aof::AofLink;
use crate::cmd;
use crate::dict::Dict;
use crate::engine::EngineConfig;
use crate::lock::LockTable;
use crate::session::Session;
use crate::time;
use crate::types::DataEntity;
use crate::tx;
use crate::wheel::TimeWheel;

/// Size of the lock table for scratch databases, where no concurrency
/// ever happens.
const BASIC_LOCKER_SIZE: usize = 1;

pub struct Database {
    index: usize,
    data: Dict<DataEntity>,
    /// key -> absolute expiry, epoch milliseconds. A key present here
    /// always also exists in `data` (modulo the one stale access an
    /// expired key is allowed before it is purged).
    ttl: Dict<u64>,
    /// key -> write counter, bumped on every mutation. WATCH compares
    /// these at EXEC time.
    version: Dict<u32>,
    pub(crate) locks: LockTable,
    wheel: Option<TimeWheel>,
    aof: OnceLock<AofLink>,
}

impl Database {
    /// A concurrent database for live serving.
    pub(crate) fn new(index: usize, config: &EngineConfig, wheel: Option<TimeWheel>) -> Self {
        Self {
            index,
            data: Dict::concurrent(config.data_dict_size),
            ttl: Dict::concurrent(config.ttl_dict_size),
            version: Dict::concurrent(config.data_dict_size),
            locks: LockTable::new(config.locker_size),
            wheel,
            aof: OnceLock::new(),
        }
    }

    /// An unsynchronized database: used as rewrite scratch space, where
    /// a single thread replays the journal. No wheel, no journal link.
    pub(crate) fn basic(index: usize) -> Self {
        Self {
            index,
            data: Dict::simple(),
            ttl: Dict::simple(),
            version: Dict::simple(),
            locks: LockTable::new(BASIC_LOCKER_SIZE),
            wheel: None,
            aof: OnceLock::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Entry point for a command line against this database.
    pub fn execute(self: &Arc<Self>, session: &Session, cmd: &CmdLine) -> Reply {
        let name = cmd_name(cmd);
        match name.as_str() {
            "multi" => {
                if cmd.len() != 1 {
                    return Reply::arg_num_err(&name);
                }
                self.start_multi(session)
            }
            "discard" => {
                if cmd.len() != 1 {
                    return Reply::arg_num_err(&name);
                }
                self.discard_multi(session)
            }
            "exec" => {
                if cmd.len() != 1 {
                    return Reply::arg_num_err(&name);
                }
                self.do_multi(session)
            }
            "watch" => {
                if !cmd::validate_arity(-2, cmd.len()) {
                    return Reply::arg_num_err(&name);
                }
                self.watch(session, &cmd[1..])
            }
            _ if session.in_multi() => self.enqueue_cmd(session, &name, cmd),
            _ => self.execute_normal(&name, cmd),
        }
    }

    /// The normal, self-locking execution path.
    fn execute_normal(self: &Arc<Self>, name: &str, cmd_line: &CmdLine) -> Reply {
        let Some(command) = cmd::lookup(name) else {
            return Reply::unknown_command(name);
        };
        if !cmd::validate_arity(command.arity, cmd_line.len()) {
            return Reply::arg_num_err(name);
        }
        let (write_keys, read_keys) = match command.prepare {
            Some(prepare) => prepare(&cmd_line[1..]),
            None => (Vec::new(), Vec::new()),
        };
        self.add_version(&write_keys);
        let _locks = self.locks.rw_locks(&write_keys, &read_keys);
        (command.executor)(self, &cmd_line[1..])
    }

    /// Runs a command without touching the lock table. The caller (the
    /// transaction path, undo replay) already holds every relevant lock.
    pub(crate) fn execute_with_locks_held(self: &Arc<Self>, cmd_line: &CmdLine) -> Reply {
        let name = cmd_name(cmd_line);
        let Some(command) = cmd::lookup(&name) else {
            return Reply::unknown_command(&name);
        };
        if !cmd::validate_arity(command.arity, cmd_line.len()) {
            return Reply::arg_num_err(&name);
        }
        (command.executor)(self, &cmd_line[1..])
    }

    // ------------------------------------------------------------------
    // data access
    // ------------------------------------------------------------------

    /// Fetches a copy of the entity at `key`. An expired entry is purged
    /// on the way and reported as absent.
    pub fn get_entity(&self, key: &Bytes) -> Option<DataEntity> {
        let entity = self.data.get(key)?;
        if self.is_expired(key) {
            self.remove(key);
            return None;
        }
        Some(entity)
    }

    /// Read access to the entity in place, under the shard lock.
    pub fn with_entity<R>(&self, key: &Bytes, f: impl FnOnce(&DataEntity) -> R) -> Option<R> {
        if self.data.view(key, |_| ()).is_none() {
            return None;
        }
        if self.is_expired(key) {
            self.remove(key);
            return None;
        }
        self.data.view(key, f)
    }

    /// Mutable access to the entity in place, under the shard lock.
    pub fn with_entity_mut<R>(
        &self,
        key: &Bytes,
        f: impl FnOnce(&mut DataEntity) -> R,
    ) -> Option<R> {
        if self.data.view(key, |_| ()).is_none() {
            return None;
        }
        if self.is_expired(key) {
            self.remove(key);
            return None;
        }
        self.data.update(key, f)
    }

    pub fn exists(&self, key: &Bytes) -> bool {
        self.with_entity(key, |_| ()).is_some()
    }

    pub fn put_entity(&self, key: Bytes, entity: DataEntity) -> u32 {
        self.data.put(key, entity)
    }

    pub fn put_if_absent(&self, key: Bytes, entity: DataEntity) -> u32 {
        self.data.put_if_absent(key, entity)
    }

    pub fn put_if_exists(&self, key: Bytes, entity: DataEntity) -> u32 {
        self.data.put_if_exists(key, entity)
    }

    /// Removes a key from data and TTL and cancels its expiry task.
    pub fn remove(&self, key: &Bytes) -> u32 {
        let removed = self.data.remove(key);
        self.ttl.remove(key);
        if let Some(wheel) = &self.wheel {
            wheel.cancel(&expire_task_key(key));
        }
        removed
    }

    pub fn removes(&self, keys: &[Bytes]) -> u32 {
        keys.iter().map(|key| self.remove(key)).sum()
    }

    pub fn key_count(&self) -> usize {
        self.data.len()
    }

    pub fn expires_count(&self) -> usize {
        self.ttl.len()
    }

    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        self.data.random_keys(limit)
    }

    pub fn random_distinct_keys(&self, limit: usize) -> Vec<Bytes> {
        self.data.random_distinct_keys(limit)
    }

    /// Walks every entry with its optional expiry. The consumer must not
    /// reenter this database for the visited key.
    pub fn for_each_entry(&self, mut consumer: impl FnMut(&Bytes, &DataEntity, Option<u64>) -> bool) {
        self.data.for_each(|key, entity| {
            let expires_at = self.ttl.get(key);
            consumer(key, entity, expires_at)
        });
    }

    // ------------------------------------------------------------------
    // versions & watch
    // ------------------------------------------------------------------

    /// Bumps the version of every write key. Runs before the locks are
    /// taken on the normal path and after commit on the transactional
    /// path; either way the new version is visible before the key's
    /// lock is released.
    pub(crate) fn add_version(&self, write_keys: &[Bytes]) {
        for key in write_keys {
            let next = self.get_version(key).wrapping_add(1);
            self.version.put(key.clone(), next);
        }
    }

    pub fn get_version(&self, key: &Bytes) -> u32 {
        self.version.get(key).unwrap_or(0)
    }

    fn watch(self: &Arc<Self>, session: &Session, keys: &[Bytes]) -> Reply {
        if session.in_multi() {
            return Reply::error("ERR WATCH inside MULTI is not allowed");
        }
        for key in keys {
            session.watch(key.clone(), self.get_version(key));
        }
        Reply::ok()
    }

    // ------------------------------------------------------------------
    // expiry
    // ------------------------------------------------------------------

    /// Marks `key` to expire at the absolute instant `at_ms` and
    /// schedules the proactive removal task. The task re-checks the TTL
    /// under the key's write lock: it may have been replaced or removed
    /// by the time the wheel fires.
    pub fn expire(self: &Arc<Self>, key: &Bytes, at_ms: u64) {
        self.ttl.put(key.clone(), at_ms);
        let Some(wheel) = &self.wheel else {
            return;
        };
        let db = Arc::clone(self);
        let key = key.clone();
        let task_key = expire_task_key(&key);
        wheel.schedule_at(
            at_ms,
            task_key,
            Box::new(move || {
                let _guard = db.locks.lock_key(&key);
                debug!(key = %String::from_utf8_lossy(&key), "expire task fired");
                let Some(at) = db.ttl.get(&key) else {
                    return;
                };
                if time::is_past(at) {
                    db.remove(&key);
                }
            }),
        );
    }

    /// Drops the expiry of `key`, making it permanent.
    pub fn persist(&self, key: &Bytes) {
        self.ttl.remove(key);
        if let Some(wheel) = &self.wheel {
            wheel.cancel(&expire_task_key(key));
        }
    }

    /// Checks whether `key` is past its expiry; a passed TTL entry is
    /// dropped on the spot. Callers pair this with a `data` removal.
    pub fn is_expired(&self, key: &Bytes) -> bool {
        let Some(at) = self.ttl.get(key) else {
            return false;
        };
        let expired = time::is_past(at);
        if expired {
            self.ttl.remove(key);
        }
        expired
    }

    /// The raw expiry instant, if one is set.
    pub fn ttl_ms(&self, key: &Bytes) -> Option<u64> {
        self.ttl.get(key)
    }

    // ------------------------------------------------------------------
    // journal
    // ------------------------------------------------------------------

    pub(crate) fn set_aof_link(&self, link: AofLink) {
        let _ = self.aof.set(link);
    }

    pub(crate) fn aof_link(&self) -> Option<&AofLink> {
        self.aof.get()
    }

    /// Enqueues a mutation frame for the journal writer. A no-op when
    /// persistence is disabled or this is a scratch database.
    pub fn add_aof(&self, cmd: CmdLine) {
        if let Some(link) = self.aof.get() {
            link.append(self.index, cmd);
        }
    }

    // ------------------------------------------------------------------
    // transactions
    // ------------------------------------------------------------------

    fn start_multi(self: &Arc<Self>, session: &Session) -> Reply {
        if session.in_multi() {
            return Reply::error("ERR MULTI calls can not be nested");
        }
        session.set_multi(true);
        Reply::ok()
    }

    fn discard_multi(self: &Arc<Self>, session: &Session) -> Reply {
        if !session.in_multi() {
            return Reply::error("ERR DISCARD without MULTI");
        }
        session.clear_queue();
        session.set_abort(false);
        session.set_multi(false);
        Reply::ok()
    }

    fn do_multi(self: &Arc<Self>, session: &Session) -> Reply {
        if !session.in_multi() {
            return Reply::error("ERR EXEC without MULTI");
        }
        session.set_multi(false);
        if session.aborted() {
            session.clear_queue();
            session.set_abort(false);
            return Reply::error(
                "EXECABORT Transaction discarded because of previous errors.",
            );
        }
        let queue = session.take_queue();
        let watching = session.watching();
        tx::exec_multi(self, &queue, &watching)
    }

    /// Queues a command for EXEC after validating it. An invalid command
    /// flags the session so the eventual EXEC aborts.
    fn enqueue_cmd(self: &Arc<Self>, session: &Session, name: &str, cmd_line: &CmdLine) -> Reply {
        let Some(command) = cmd::lookup(name) else {
            session.set_abort(true);
            return Reply::unknown_command(name);
        };
        if command.prepare.is_none() {
            session.set_abort(true);
            return Reply::error(format!("ERR command '{name}' cannot be used in MULTI"));
        }
        if !cmd::validate_arity(command.arity, cmd_line.len()) {
            session.set_abort(true);
            return Reply::arg_num_err(name);
        }
        session.enqueue(cmd_line.clone());
        Reply::queued()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("index", &self.index)
            .field("keys", &self.data.len())
            .field("expires", &self.ttl.len())
            .finish()
    }
}

fn cmd_name(cmd: &CmdLine) -> String {
    String::from_utf8_lossy(&cmd[0]).to_ascii_lowercase()
}

/// Wheel task key for a key's expiry: unique per key, so re-scheduling
/// an expiry cancels the previous task.
fn expire_task_key(key: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(7 + key.len());
    buf.extend_from_slice(b"expire:");
    buf.extend_from_slice(key);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Arc<Database> {
        Arc::new(Database::new(0, &EngineConfig::default(), None))
    }

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn entity(s: &str) -> DataEntity {
        DataEntity::Str(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn entity_round_trip() {
        let db = db();
        assert_eq!(db.get_entity(&key("a")), None);
        db.put_entity(key("a"), entity("1"));
        assert_eq!(db.get_entity(&key("a")), Some(entity("1")));
        assert_eq!(db.key_count(), 1);
        assert_eq!(db.remove(&key("a")), 1);
        assert_eq!(db.get_entity(&key("a")), None);
    }

    #[test]
    fn lazy_expiry_purges_data_and_ttl() {
        let db = db();
        db.put_entity(key("gone"), entity("x"));
        // expiry in the past
        db.expire(&key("gone"), time::now_ms().saturating_sub(10));
        assert_eq!(db.get_entity(&key("gone")), None);
        assert_eq!(db.key_count(), 0);
        assert_eq!(db.expires_count(), 0);
    }

    #[test]
    fn future_expiry_leaves_the_key_alone() {
        let db = db();
        db.put_entity(key("keep"), entity("x"));
        db.expire(&key("keep"), time::now_ms() + 60_000);
        assert!(db.exists(&key("keep")));
        assert_eq!(db.expires_count(), 1);

        db.persist(&key("keep"));
        assert_eq!(db.expires_count(), 0);
        assert!(db.exists(&key("keep")));
    }

    #[test]
    fn remove_clears_ttl() {
        let db = db();
        db.put_entity(key("a"), entity("x"));
        db.expire(&key("a"), time::now_ms() + 60_000);
        db.remove(&key("a"));
        assert_eq!(db.expires_count(), 0);
        assert_eq!(db.ttl_ms(&key("a")), None);
    }

    #[test]
    fn versions_are_monotonic() {
        let db = db();
        assert_eq!(db.get_version(&key("k")), 0);
        db.add_version(&[key("k")]);
        db.add_version(&[key("k")]);
        assert_eq!(db.get_version(&key("k")), 2);
        // other keys are untouched
        assert_eq!(db.get_version(&key("other")), 0);
    }

    #[test]
    fn for_each_entry_reports_expiries() {
        let db = db();
        db.put_entity(key("plain"), entity("1"));
        db.put_entity(key("timed"), entity("2"));
        let at = time::now_ms() + 60_000;
        db.expire(&key("timed"), at);

        let mut seen = Vec::new();
        db.for_each_entry(|k, _, expires| {
            seen.push((k.clone(), expires));
            true
        });
        seen.sort();
        assert_eq!(seen, vec![(key("plain"), None), (key("timed"), Some(at))]);
    }
}
