//! Append-only command journal.
//!
//! Mutating executors enqueue `(db_index, command)` payloads onto a
//! bounded channel; a single writer thread drains it, serializing each
//! command as a multi-bulk frame — interleaving `SELECT` frames whenever
//! the database index changes — and appending to the journal file under
//! the configured fsync policy. The channel is the only buffering
//! between the engine and the disk: when the disk falls behind, sends
//! block and backpressure reaches the clients.
//!
//! A `pausing` read/write lock gates the writer: the writer holds it
//! shared for exactly one message at a time, and the rewrite protocol
//! (see [`rewrite`](self::Aof::rewrite)) takes it exclusively around the
//! start and finish phases.
//!
//! On startup the existing file replays through the protocol codec into
//! the engine with a synthetic session; a missing file is simply an
//! empty journal.

pub(crate) mod marshal;
mod rewrite;

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use bytes::BytesMut;
use cinder_protocol::{write_multi_bulk, CmdLine, ProtocolError, ReplyStream};
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::session::Session;

pub(crate) use marshal::{entity_to_cmd, expire_at_cmd, format_score, select_cmd, ttl_cmd};

/// Journal channel capacity. Bounded so a slow disk throttles writers
/// instead of buffering without limit.
const AOF_QUEUE_SIZE: usize = 1 << 16;

/// How long `close` waits for the writer to drain the channel.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// When to fsync the journal file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// fsync after every frame. Safest, slowest.
    Always,
    /// fsync once per second from a ticker thread.
    #[default]
    EverySec,
    /// Let the OS flush when it pleases.
    No,
}

enum Payload {
    Cmd { db_index: usize, line: CmdLine },
    /// Drains the queue and stops the writer. Sent by `close`; because
    /// it travels through the same channel, every frame enqueued before
    /// it reaches the file first.
    Shutdown,
}

/// Cheap handle a database holds to feed the journal.
#[derive(Clone)]
pub(crate) struct AofLink {
    tx: SyncSender<Payload>,
}

impl AofLink {
    /// Blocking enqueue; this is where disk backpressure surfaces.
    /// Errors (writer already gone during shutdown) are ignored.
    pub(crate) fn append(&self, db_index: usize, line: CmdLine) {
        let _ = self.tx.send(Payload::Cmd { db_index, line });
    }
}

struct AofFile {
    file: File,
    /// The database index the tail of the file is positioned at. Owned
    /// by the writer; the rewrite finish phase reads it while holding
    /// the exclusive pause lock.
    current_db: usize,
}

struct AofInner {
    path: PathBuf,
    mode: SyncMode,
    databases: usize,
    tx: SyncSender<Payload>,
    state: Mutex<AofFile>,
    /// Held shared by the writer for one message at a time; held
    /// exclusively by rewrite start/finish to pause appends.
    pausing: RwLock<()>,
    finished: Mutex<Option<Receiver<()>>>,
    ticker_stop: Option<SyncSender<()>>,
    scratch: Box<dyn Fn() -> Engine + Send + Sync>,
}

impl AofInner {
    fn state(&self) -> MutexGuard<'_, AofFile> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The journal handler. Cheap to clone; the background rewrite thread
/// holds one.
#[derive(Clone)]
pub struct Aof {
    inner: Arc<AofInner>,
}

impl Aof {
    /// Replays the existing journal into `engine`, opens the file for
    /// appending, and spawns the writer (and, for `EverySec`, the sync
    /// ticker).
    ///
    /// `scratch` builds the throwaway engine a rewrite replays into.
    pub(crate) fn new(
        engine: &Engine,
        path: PathBuf,
        mode: SyncMode,
        scratch: Box<dyn Fn() -> Engine + Send + Sync>,
    ) -> std::io::Result<Self> {
        // recovery first: the file is read before the writer exists, so
        // nothing can append mid-replay
        load_into(engine, &path, None);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let (tx, rx) = sync_channel(AOF_QUEUE_SIZE);
        let (finished_tx, finished_rx) = sync_channel(1);
        let (ticker_tx, ticker_rx) = sync_channel(1);

        let inner = Arc::new(AofInner {
            path,
            mode,
            databases: engine.databases(),
            tx,
            state: Mutex::new(AofFile {
                file,
                current_db: 0,
            }),
            pausing: RwLock::new(()),
            finished: Mutex::new(Some(finished_rx)),
            ticker_stop: (mode == SyncMode::EverySec).then_some(ticker_tx),
            scratch,
        });

        {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("aof-writer".into())
                .spawn(move || writer_loop(&inner, rx, finished_tx))
                .expect("spawn aof writer thread");
        }
        if mode == SyncMode::EverySec {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("aof-sync".into())
                .spawn(move || ticker_loop(&inner, ticker_rx))
                .expect("spawn aof sync thread");
        }

        Ok(Self { inner })
    }

    pub(crate) fn link(&self) -> AofLink {
        AofLink {
            tx: self.inner.tx.clone(),
        }
    }

    /// Drains the channel, stops the writer and ticker, and fsyncs.
    /// Called once during engine shutdown, after every session has
    /// stopped producing.
    pub(crate) fn close(&self) {
        let _ = self.inner.tx.send(Payload::Shutdown);
        let finished = self
            .inner
            .finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = finished {
            if rx.recv_timeout(CLOSE_TIMEOUT).is_err() {
                warn!("aof writer did not finish within {CLOSE_TIMEOUT:?}");
            }
        }
        if let Some(stop) = &self.inner.ticker_stop {
            let _ = stop.send(());
        }
        let state = self.inner.state();
        if let Err(e) = state.file.sync_data() {
            warn!(error = %e, "aof final fsync failed");
        }
        info!("aof closed");
    }
}

impl std::fmt::Debug for Aof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aof")
            .field("path", &self.inner.path)
            .field("mode", &self.inner.mode)
            .finish()
    }
}

fn writer_loop(inner: &AofInner, rx: Receiver<Payload>, finished: SyncSender<()>) {
    let mut buf = BytesMut::with_capacity(256);
    while let Ok(payload) = rx.recv() {
        let Payload::Cmd { db_index, line } = payload else {
            break;
        };
        // one pause-gate acquisition per message, released before the
        // next recv — rewrites only wait for the frame in flight
        let _pause = inner
            .pausing
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut state = inner.state();

        if db_index != state.current_db {
            buf.clear();
            write_multi_bulk(&select_cmd(db_index), &mut buf);
            if let Err(e) = state.file.write_all(&buf) {
                warn!(error = %e, "aof select write failed");
                continue;
            }
            if inner.mode == SyncMode::Always {
                let _ = state.file.sync_data();
            }
            state.current_db = db_index;
        }

        buf.clear();
        write_multi_bulk(&line, &mut buf);
        if let Err(e) = state.file.write_all(&buf) {
            warn!(error = %e, "aof write failed");
            continue;
        }
        if inner.mode == SyncMode::Always {
            let _ = state.file.sync_data();
        }
    }
    let _ = finished.send(());
}

/// EverySec mode: fsync once a second until stopped.
fn ticker_loop(inner: &AofInner, stop: Receiver<()>) {
    loop {
        match stop.recv_timeout(Duration::from_secs(1)) {
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                let state = inner.state();
                let _ = state.file.sync_data();
            }
            _ => return,
        }
    }
}

/// Replays journal frames into `engine` through the codec. Reads at most
/// `max_bytes` when given (the rewrite replays only the pre-rewrite
/// prefix). A missing file is an empty journal, not an error.
pub(crate) fn load_into(engine: &Engine, path: &Path, max_bytes: Option<u64>) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            error!(error = %e, path = %path.display(), "aof open for replay failed");
            return;
        }
    };
    let reader: Box<dyn Read> = match max_bytes {
        Some(n) => Box::new(file.take(n)),
        None => Box::new(file),
    };

    // synthetic, non-network session: starts at db 0 and tracks the
    // SELECT frames embedded in the journal
    let session = Session::new();
    let mut replayed = 0usize;
    for payload in ReplyStream::new(BufReader::new(reader)) {
        match payload {
            Ok(reply) => {
                let Some(cmd) = reply.as_cmd_line() else {
                    error!("aof replay: frame is not a command line, skipping");
                    continue;
                };
                if cmd.is_empty() {
                    continue;
                }
                let result = engine.execute(&session, &cmd);
                if result.is_error() {
                    error!(?result, "aof replay: command failed");
                } else {
                    replayed += 1;
                }
            }
            // a truncated trailing frame is where a crash cut the file
            Err(ProtocolError::UnexpectedEof) => break,
            Err(e) if e.is_fatal() => {
                error!(error = %e, "aof replay aborted");
                break;
            }
            Err(e) => {
                error!(error = %e, "aof replay: protocol error, resyncing");
            }
        }
    }
    info!(replayed, path = %path.display(), "aof replay complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use cinder_protocol::{cmd_line, Reply};

    fn aof_config(path: &Path) -> EngineConfig {
        EngineConfig {
            append_only: true,
            append_filename: Some(path.to_path_buf()),
            append_mode: SyncMode::Always,
            ..EngineConfig::default()
        }
    }

    fn run(engine: &Engine, session: &Session, parts: &[&str]) -> Reply {
        engine.execute(session, &cmd_line(parts.iter().copied().map(str::to_owned)))
    }

    #[test]
    fn journal_replays_to_the_same_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.aof");

        {
            let engine = Engine::new(aof_config(&path)).unwrap();
            let session = Session::new();
            assert_eq!(run(&engine, &session, &["SET", "a", "1"]), Reply::ok());
            assert_eq!(run(&engine, &session, &["SET", "b", "2"]), Reply::ok());
            assert_eq!(
                run(&engine, &session, &["DEL", "b"]),
                Reply::Integer(1)
            );
            assert_eq!(
                run(&engine, &session, &["INCR", "a"]),
                Reply::Integer(2)
            );
            engine.close();
        }

        let engine = Engine::new(aof_config(&path)).unwrap();
        let session = Session::new();
        assert_eq!(
            run(&engine, &session, &["GET", "a"]),
            Reply::bulk(&b"2"[..])
        );
        assert_eq!(run(&engine, &session, &["GET", "b"]), Reply::Null);
        engine.close();
    }

    #[test]
    fn journal_interleaves_select_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.aof");

        {
            let engine = Engine::new(aof_config(&path)).unwrap();
            let session = Session::new();
            run(&engine, &session, &["SET", "zero", "0"]);
            run(&engine, &session, &["SELECT", "2"]);
            run(&engine, &session, &["SET", "two", "2"]);
            engine.close();
        }

        let raw = std::fs::read(&path).unwrap();
        let text = String::from_utf8_lossy(&raw);
        assert!(text.contains("SELECT"), "journal should switch databases");

        let engine = Engine::new(aof_config(&path)).unwrap();
        let session = Session::new();
        assert_eq!(
            run(&engine, &session, &["GET", "zero"]),
            Reply::bulk(&b"0"[..])
        );
        assert_eq!(run(&engine, &session, &["GET", "two"]), Reply::Null);
        run(&engine, &session, &["SELECT", "2"]);
        assert_eq!(
            run(&engine, &session, &["GET", "two"]),
            Reply::bulk(&b"2"[..])
        );
        engine.close();
    }

    #[test]
    fn expiry_survives_replay_as_pexpireat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.aof");

        {
            let engine = Engine::new(aof_config(&path)).unwrap();
            let session = Session::new();
            run(&engine, &session, &["SET", "k", "v", "EX", "100"]);
            engine.close();
        }

        let engine = Engine::new(aof_config(&path)).unwrap();
        let session = Session::new();
        let ttl = run(&engine, &session, &["TTL", "k"]);
        match ttl {
            Reply::Integer(secs) => assert!((1..=100).contains(&secs), "ttl was {secs}"),
            other => panic!("expected integer ttl, got {other:?}"),
        }
        engine.close();
    }

    #[test]
    fn missing_file_is_an_empty_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written.aof");
        let engine = Engine::new(aof_config(&path)).unwrap();
        let session = Session::new();
        assert_eq!(run(&engine, &session, &["DBSIZE"]), Reply::Integer(0));
        engine.close();
    }

    #[test]
    fn truncated_tail_is_ignored_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.aof");

        {
            let engine = Engine::new(aof_config(&path)).unwrap();
            let session = Session::new();
            run(&engine, &session, &["SET", "whole", "1"]);
            engine.close();
        }
        // simulate a crash mid-append
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"*3\r\n$3\r\nSET\r\n$4\r\npart").unwrap();
        }

        let engine = Engine::new(aof_config(&path)).unwrap();
        let session = Session::new();
        assert_eq!(
            run(&engine, &session, &["GET", "whole"]),
            Reply::bulk(&b"1"[..])
        );
        assert_eq!(run(&engine, &session, &["GET", "part"]), Reply::Null);
        engine.close();
    }
}
