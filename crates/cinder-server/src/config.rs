//! Server configuration.
//!
//! All options arrive as CLI flags. The handful of options the engine
//! does not consume yet (`--db-filename`, `--require-pass`) are accepted
//! for config-file compatibility and warned about at startup.

use std::path::PathBuf;

use cinder_core::{EngineConfig, SyncMode};
use clap::Parser;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "cinder-server", about = "In-memory key-value server with an append-only journal")]
pub struct ServerConfig {
    /// Listener address.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Listener port.
    #[arg(long, default_value_t = 6389)]
    pub port: u16,

    /// Number of logical databases.
    #[arg(long, default_value_t = 16)]
    pub databases: usize,

    /// Enable the append-only journal.
    #[arg(long)]
    pub append_only: bool,

    /// Journal file path. Required with --append-only.
    #[arg(long)]
    pub append_filename: Option<PathBuf>,

    /// Journal fsync policy: always, everysec, or no.
    #[arg(long, default_value = "everysec", value_parser = parse_sync_mode)]
    pub append_mode: SyncMode,

    /// Shard-count hint for the data dicts (rounded to a power of two).
    #[arg(long, default_value_t = 1024)]
    pub data_dict_size: usize,

    /// Shard-count hint for the TTL dicts (rounded to a power of two).
    #[arg(long, default_value_t = 1024)]
    pub ttl_dict_size: usize,

    /// Lock-table size (rounded to a power of two).
    #[arg(long, default_value_t = 1024)]
    pub locker_size: usize,

    /// Reserved: snapshot file name. Accepted but unused.
    #[arg(long)]
    pub db_filename: Option<PathBuf>,

    /// Reserved: authentication password. Accepted but unused.
    #[arg(long)]
    pub require_pass: Option<String>,
}

/// Parses an fsync policy name.
pub fn parse_sync_mode(input: &str) -> Result<SyncMode, String> {
    match input.to_ascii_lowercase().as_str() {
        "always" => Ok(SyncMode::Always),
        "everysec" => Ok(SyncMode::EverySec),
        "no" => Ok(SyncMode::No),
        _ => Err(format!(
            "unknown append mode '{input}'. valid options: always, everysec, no"
        )),
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Validates cross-option constraints. Run once at startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.append_only && self.append_filename.is_none() {
            return Err("--append-only requires --append-filename".into());
        }
        if self.databases == 0 {
            return Err("--databases must be at least 1".into());
        }
        Ok(())
    }

    /// Logs warnings for accepted-but-inert options.
    pub fn warn_reserved(&self) {
        if self.db_filename.is_some() {
            warn!("--db-filename is reserved; snapshots are not implemented");
        }
        if self.require_pass.is_some() {
            warn!("--require-pass is reserved; authentication is not implemented");
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            databases: self.databases,
            data_dict_size: self.data_dict_size,
            ttl_dict_size: self.ttl_dict_size,
            locker_size: self.locker_size,
            append_only: self.append_only,
            append_filename: self.append_filename.clone(),
            append_mode: self.append_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServerConfig {
        ServerConfig::try_parse_from(std::iter::once("cinder-server").chain(args.iter().copied()))
            .expect("args should parse")
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, 6389);
        assert_eq!(config.databases, 16);
        assert!(!config.append_only);
        assert_eq!(config.append_mode, SyncMode::EverySec);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_sync_modes() {
        assert_eq!(parse_sync_mode("always").unwrap(), SyncMode::Always);
        assert_eq!(parse_sync_mode("EVERYSEC").unwrap(), SyncMode::EverySec);
        assert_eq!(parse_sync_mode("no").unwrap(), SyncMode::No);
        assert!(parse_sync_mode("sometimes").is_err());
    }

    #[test]
    fn append_only_needs_a_filename() {
        let config = parse(&["--append-only"]);
        assert!(config.validate().is_err());

        let config = parse(&["--append-only", "--append-filename", "/tmp/x.aof"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn engine_config_carries_the_options() {
        let config = parse(&[
            "--databases",
            "4",
            "--data-dict-size",
            "64",
            "--locker-size",
            "32",
        ]);
        let engine = config.engine_config();
        assert_eq!(engine.databases, 4);
        assert_eq!(engine.data_dict_size, 64);
        assert_eq!(engine.locker_size, 32);
    }

    #[test]
    fn zero_databases_rejected() {
        let config = parse(&["--databases", "0"]);
        assert!(config.validate().is_err());
    }
}
