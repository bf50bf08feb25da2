//! Test helpers shared by the unit suites.

use bytes::Bytes;
use cinder_protocol::{CmdLine, Reply};

use crate::engine::Engine;
use crate::session::Session;

/// Runs a command given as string parts, the way tests like to write it.
pub(crate) fn run(engine: &Engine, session: &Session, parts: &[&str]) -> Reply {
    let cmd: CmdLine = parts
        .iter()
        .map(|part| Bytes::copy_from_slice(part.as_bytes()))
        .collect();
    engine.execute(session, &cmd)
}
