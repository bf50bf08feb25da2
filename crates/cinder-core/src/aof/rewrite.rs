//! Live journal rewrite: crash-safe compaction.
//!
//! The journal only grows; a rewrite replaces it with the minimal set of
//! commands reproducing the current state, without losing commands
//! issued while the rewrite runs. Three phases:
//!
//! 1. **Start** (pause held): fsync, record the file size `S` and the
//!    writer's current database index, create the temp file.
//! 2. **Do** (no pause): replay the first `S` bytes into a scratch
//!    engine, then dump every database to the temp file as
//!    `SELECT i` + one recreate-command per key (+ `PEXPIREAT` for TTLs).
//!    The live writer keeps appending to the original file meanwhile.
//! 3. **Finish** (pause held): copy everything after offset `S` from the
//!    original (the commands that arrived during Do) into the temp file
//!    behind a `SELECT` of the recorded index, atomically rename the
//!    temp file over the journal, reopen it, and append a `SELECT` of
//!    the writer's current index so subsequent appends land in the right
//!    segment.
//!
//! A crash during Do loses nothing: the original file is untouched. A
//! crash after the rename is recovered on restart from the renamed file.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::PoisonError;

use bytes::BytesMut;
use cinder_protocol::write_multi_bulk;
use tracing::{info, warn};

use super::{entity_to_cmd, expire_at_cmd, load_into, select_cmd, Aof};

struct RewriteContext {
    tmp_path: PathBuf,
    tmp: File,
    /// Journal size at rewrite start; everything before this offset is
    /// compacted, everything after is copied verbatim.
    file_size: u64,
    /// The writer's database index at rewrite start.
    db_index: usize,
}

impl Aof {
    /// Runs a full rewrite. On error the original journal is intact and
    /// the temp file is discarded.
    pub fn rewrite(&self) -> io::Result<()> {
        let mut ctx = self.start_rewrite()?;
        if let Err(e) = self.do_rewrite(&mut ctx) {
            let _ = std::fs::remove_file(&ctx.tmp_path);
            return Err(e);
        }
        if let Err(e) = self.finish_rewrite(ctx) {
            warn!(error = %e, "aof rewrite finish failed; journal preserved");
            return Err(e);
        }
        info!("aof rewrite complete");
        Ok(())
    }

    fn start_rewrite(&self) -> io::Result<RewriteContext> {
        let _pause = self
            .inner
            .pausing
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let state = self.inner.state();
        state.file.sync_data()?;

        let file_size = std::fs::metadata(&self.inner.path)?.len();
        let dir = self
            .inner
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let tmp_path = dir.join(format!("rewrite-{}.aof.tmp", std::process::id()));
        let tmp = File::create(&tmp_path)?;

        Ok(RewriteContext {
            tmp_path,
            tmp,
            file_size,
            db_index: state.current_db,
        })
    }

    fn do_rewrite(&self, ctx: &mut RewriteContext) -> io::Result<()> {
        // replay the pre-rewrite prefix into a throwaway engine; this is
        // the in-process stand-in for forking the address space
        let scratch = (self.inner.scratch)();
        load_into(&scratch, &self.inner.path, Some(ctx.file_size));

        let mut out = BufWriter::new(&ctx.tmp);
        let mut buf = BytesMut::with_capacity(256);
        for index in 0..self.inner.databases {
            buf.clear();
            write_multi_bulk(&select_cmd(index), &mut buf);
            out.write_all(&buf)?;

            let db = scratch
                .db(index)
                .expect("scratch engine has every database index");
            let mut write_error = None;
            db.for_each_entry(|key, entity, expires_at| {
                buf.clear();
                write_multi_bulk(&entity_to_cmd(key, entity), &mut buf);
                if let Some(at_ms) = expires_at {
                    write_multi_bulk(&expire_at_cmd(key, at_ms), &mut buf);
                }
                match out.write_all(&buf) {
                    Ok(()) => true,
                    Err(e) => {
                        write_error = Some(e);
                        false
                    }
                }
            });
            if let Some(e) = write_error {
                return Err(e);
            }
        }
        out.flush()
    }

    fn finish_rewrite(&self, ctx: RewriteContext) -> io::Result<()> {
        let _pause = self
            .inner
            .pausing
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut state = self.inner.state();

        // copy the commands that arrived during Do from the original
        // journal, positioned after the prefix the scratch replay covered
        let mut src = File::open(&self.inner.path)?;
        src.seek(SeekFrom::Start(ctx.file_size))?;

        let mut tmp = ctx.tmp;
        let mut buf = BytesMut::with_capacity(64);
        write_multi_bulk(&select_cmd(ctx.db_index), &mut buf);
        tmp.write_all(&buf)?;
        io::copy(&mut src, &mut tmp)?;
        tmp.sync_data()?;
        drop(tmp);

        // the rename is the commit point
        std::fs::rename(&ctx.tmp_path, &self.inner.path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.inner.path)?;
        state.file = file;

        // the compacted tail may sit on a different SELECT segment than
        // the writer believes; pin it explicitly
        buf.clear();
        write_multi_bulk(&select_cmd(state.current_db), &mut buf);
        state.file.write_all(&buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use cinder_protocol::{cmd_line, Reply};

    use crate::aof::SyncMode;
    use crate::engine::{Engine, EngineConfig};
    use crate::session::Session;

    fn aof_config(path: &Path) -> EngineConfig {
        EngineConfig {
            append_only: true,
            append_filename: Some(path.to_path_buf()),
            append_mode: SyncMode::Always,
            ..EngineConfig::default()
        }
    }

    fn run(engine: &Engine, session: &Session, parts: &[&str]) -> Reply {
        engine.execute(session, &cmd_line(parts.iter().map(|s| s.to_string())))
    }

    #[test]
    fn rewrite_shrinks_and_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.aof");

        {
            let engine = Engine::new(aof_config(&path)).unwrap();
            let session = Session::new();
            // churn one key so the journal holds far more frames than keys
            for i in 0..100 {
                run(&engine, &session, &["SET", "churn", &i.to_string()]);
            }
            run(&engine, &session, &["SET", "stable", "yes"]);

            let before = std::fs::metadata(&path).unwrap().len();
            engine.aof.as_ref().unwrap().rewrite().unwrap();
            let after = std::fs::metadata(&path).unwrap().len();
            assert!(
                after < before,
                "rewrite should shrink the journal ({before} -> {after})"
            );
            engine.close();
        }

        let engine = Engine::new(aof_config(&path)).unwrap();
        let session = Session::new();
        assert_eq!(
            run(&engine, &session, &["GET", "churn"]),
            Reply::bulk(&b"99"[..])
        );
        assert_eq!(
            run(&engine, &session, &["GET", "stable"]),
            Reply::bulk(&b"yes"[..])
        );
        engine.close();
    }

    #[test]
    fn writes_during_rewrite_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.aof");

        {
            let engine = Engine::new(aof_config(&path)).unwrap();
            let session = Session::new();
            for i in 0..50 {
                run(&engine, &session, &["SET", &format!("pre:{i}"), "x"]);
            }

            // run the rewrite on another thread while writes continue
            let aof = engine.aof.as_ref().unwrap().clone();
            let rewriter = std::thread::spawn(move || aof.rewrite().unwrap());
            for i in 0..50 {
                run(&engine, &session, &["SET", &format!("mid:{i}"), "y"]);
            }
            rewriter.join().unwrap();
            for i in 0..10 {
                run(&engine, &session, &["SET", &format!("post:{i}"), "z"]);
            }
            engine.close();
        }

        let engine = Engine::new(aof_config(&path)).unwrap();
        let session = Session::new();
        for i in 0..50 {
            assert_eq!(
                run(&engine, &session, &["GET", &format!("pre:{i}")]),
                Reply::bulk(&b"x"[..]),
                "pre:{i} lost"
            );
            assert_eq!(
                run(&engine, &session, &["GET", &format!("mid:{i}")]),
                Reply::bulk(&b"y"[..]),
                "mid:{i} lost"
            );
        }
        for i in 0..10 {
            assert_eq!(
                run(&engine, &session, &["GET", &format!("post:{i}")]),
                Reply::bulk(&b"z"[..]),
                "post:{i} lost"
            );
        }
        engine.close();
    }

    #[test]
    fn rewrite_preserves_ttls_and_other_databases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.aof");

        {
            let engine = Engine::new(aof_config(&path)).unwrap();
            let session = Session::new();
            run(&engine, &session, &["SET", "timed", "v", "EX", "100"]);
            run(&engine, &session, &["SELECT", "3"]);
            run(&engine, &session, &["SET", "other", "w"]);
            run(&engine, &session, &["LPUSH", "list", "b", "a"]);
            engine.aof.as_ref().unwrap().rewrite().unwrap();
            engine.close();
        }

        let engine = Engine::new(aof_config(&path)).unwrap();
        let session = Session::new();
        match run(&engine, &session, &["TTL", "timed"]) {
            Reply::Integer(secs) => assert!((1..=100).contains(&secs)),
            other => panic!("expected ttl, got {other:?}"),
        }
        run(&engine, &session, &["SELECT", "3"]);
        assert_eq!(
            run(&engine, &session, &["GET", "other"]),
            Reply::bulk(&b"w"[..])
        );
        assert_eq!(
            run(&engine, &session, &["LRANGE", "list", "0", "-1"]),
            Reply::Array(vec![Reply::bulk(&b"a"[..]), Reply::bulk(&b"b"[..])])
        );
        engine.close();
    }
}
