//! Accept loop and per-connection handling.
//!
//! Each connection gets a [`ClientSession`] and a read loop that feeds
//! stream bytes through the protocol codec: complete command frames
//! dispatch into the engine, protocol violations answer an error and
//! resynchronize at the next CRLF, and anything that is not an array of
//! bulk strings is rejected without touching the engine.
//!
//! Shutdown order matters: set the closing flag so new connections are
//! refused, close every active session (each drains its in-flight
//! replies, bounded), then close the engine — which drains the journal
//! channel, waits for the writer to finish, fsyncs, and stops the time
//! wheel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use cinder_core::Engine;
use cinder_protocol::{parse_reply, skip_past_crlf, Reply};
use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::session::ClientSession;

/// Initial per-connection read buffer.
const BUF_CAPACITY: usize = 4096;

/// Read buffer ceiling; a client holding more than this in incomplete
/// frames is disconnected.
const MAX_BUF_SIZE: usize = 64 * 1024 * 1024;

pub struct Handler {
    engine: Engine,
    sessions: DashMap<u64, Arc<ClientSession>>,
    closing: AtomicBool,
    next_id: AtomicU64,
}

impl Handler {
    pub fn new(engine: Engine) -> Arc<Self> {
        Arc::new(Self {
            engine,
            sessions: DashMap::new(),
            closing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs the accept loop until the listener fails or shutdown begins.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if self.closing.load(Ordering::SeqCst) {
                        // refuse new connections during shutdown
                        drop(stream);
                        continue;
                    }
                    let handler = Arc::clone(&self);
                    tokio::spawn(async move {
                        handler.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    if self.closing.load(Ordering::SeqCst) {
                        return;
                    }
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: std::net::SocketAddr) {
        let (mut reader, writer) = stream.into_split();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(ClientSession::new(id, peer, writer));
        self.sessions.insert(id, Arc::clone(&session));
        debug!(%peer, id, "connection opened");

        let mut buf = BytesMut::with_capacity(BUF_CAPACITY);
        'conn: loop {
            // drain every complete frame in the buffer (pipelining)
            loop {
                match parse_reply(&buf) {
                    Ok(Some((reply, consumed))) => {
                        buf.advance(consumed);
                        if !self.dispatch(&session, reply).await {
                            break 'conn;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // frame-local violation: answer, resync, go on
                        let reply = Reply::error(format!("ERR Protocol error: {e}"));
                        if session.write(&reply.to_bytes()).await.is_err() {
                            break 'conn;
                        }
                        let skip = skip_past_crlf(&buf);
                        buf.advance(skip);
                    }
                }
            }

            if buf.len() > MAX_BUF_SIZE {
                let reply = Reply::error("ERR Protocol error: request too large");
                let _ = session.write(&reply.to_bytes()).await;
                break;
            }

            tokio::select! {
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => break,          // clean disconnect
                    Ok(_) => {}
                    Err(e) => {
                        debug!(%peer, error = %e, "read failed");
                        break;
                    }
                },
                _ = session.close_requested() => break,
            }
        }

        self.sessions.remove(&id);
        session.close().await;
        debug!(%peer, id, "connection closed");
    }

    /// Routes one parsed frame. Returns `false` when the connection
    /// should be dropped.
    async fn dispatch(&self, session: &Arc<ClientSession>, reply: Reply) -> bool {
        // command lines are arrays of bulk strings, nothing else
        let Some(cmd) = reply.as_cmd_line() else {
            let reply = Reply::error("ERR Protocol error: expected an array of bulk strings");
            return session.write(&reply.to_bytes()).await.is_ok();
        };
        if cmd.is_empty() {
            // empty frames (blank inline lines, *0) produce no state
            return true;
        }

        // the engine blocks (lock table, bounded journal sends), so run
        // it where blocking is allowed
        let result =
            tokio::task::block_in_place(|| self.engine.execute(&session.core, &cmd));
        session.write(&result.to_bytes()).await.is_ok()
    }

    /// Graceful shutdown: refuse new work, drain sessions, close the
    /// engine.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        info!("shutting down: closing {} active sessions", self.sessions.len());

        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            session.close().await;
        }
        self.sessions.clear();

        let engine = &self.engine;
        tokio::task::block_in_place(|| engine.close());
        info!("shutdown complete");
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("sessions", &self.sessions.len())
            .field("closing", &self.closing.load(Ordering::SeqCst))
            .finish()
    }
}
