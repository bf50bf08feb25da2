//! Client session: the network half.
//!
//! Pairs the engine-visible state (`cinder_core::Session`) with the
//! write side of the TCP stream. Writes are serialized behind an async
//! mutex and counted, so `close` can wait for in-flight replies to
//! drain — bounded by a timeout — before shutting the socket down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// How long `close` waits for pending replies before closing anyway.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ClientSession {
    id: u64,
    peer: SocketAddr,
    /// Engine-visible state: selected database + transaction fields.
    pub core: cinder_core::Session,
    writer: Mutex<OwnedWriteHalf>,
    /// Replies currently being written. `close` drains this to zero.
    pending: AtomicUsize,
    drained: Notify,
    /// Signals the read loop to stop.
    close_signal: Notify,
    closed: AtomicBool,
}

impl ClientSession {
    pub fn new(id: u64, peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer,
            core: cinder_core::Session::new(),
            writer: Mutex::new(writer),
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
            close_signal: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one reply frame. The write mutex keeps frames whole; the
    /// pending counter lets `close` wait for this write to finish.
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        self.pending.fetch_add(1, Ordering::SeqCst);
        let result = writer.write_all(bytes).await;
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
        result
    }

    /// Resolves when the read loop should stop.
    pub async fn close_requested(&self) {
        self.close_signal.notified().await;
    }

    /// Waits (bounded) for pending replies, then shuts the stream down.
    /// Safe to call more than once; later calls are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if tokio::time::timeout(CLOSE_TIMEOUT, self.drain()).await.is_err() {
            debug!(peer = %self.peer, "session drain timed out; closing anyway");
        }
        self.close_signal.notify_one();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
