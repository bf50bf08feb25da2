//! Per-client state visible to the engine.
//!
//! The network half of a connection lives in the server crate; this is
//! the part the engine reads and writes while executing commands: the
//! selected database index and the transaction fields (multi flag,
//! abort flag, command queue, watch set).
//!
//! A session is driven by a single connection task, but the engine
//! takes it by shared reference, so the transaction fields sit behind a
//! mutex that is only ever briefly held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use cinder_protocol::CmdLine;

#[derive(Debug, Default)]
struct TxState {
    in_multi: bool,
    abort: bool,
    queue: Vec<CmdLine>,
    watching: HashMap<Bytes, u32>,
}

#[derive(Debug, Default)]
pub struct Session {
    db_index: AtomicUsize,
    tx: Mutex<TxState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn tx(&self) -> MutexGuard<'_, TxState> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The database this session currently targets. New sessions start
    /// at index 0.
    pub fn db_index(&self) -> usize {
        self.db_index.load(Ordering::Relaxed)
    }

    pub fn select_db(&self, index: usize) {
        self.db_index.store(index, Ordering::Relaxed);
    }

    pub fn in_multi(&self) -> bool {
        self.tx().in_multi
    }

    pub(crate) fn set_multi(&self, on: bool) {
        self.tx().in_multi = on;
    }

    pub(crate) fn aborted(&self) -> bool {
        self.tx().abort
    }

    pub(crate) fn set_abort(&self, abort: bool) {
        self.tx().abort = abort;
    }

    pub(crate) fn enqueue(&self, cmd: CmdLine) {
        self.tx().queue.push(cmd);
    }

    /// Takes the queued commands, leaving the queue empty.
    pub(crate) fn take_queue(&self) -> Vec<CmdLine> {
        std::mem::take(&mut self.tx().queue)
    }

    pub(crate) fn clear_queue(&self) {
        self.tx().queue.clear();
    }

    pub(crate) fn watch(&self, key: Bytes, version: u32) {
        self.tx().watching.insert(key, version);
    }

    /// A snapshot of the watch set at EXEC time.
    pub(crate) fn watching(&self) -> HashMap<Bytes, u32> {
        self.tx().watching.clone()
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.tx().queue.len()
    }
}
