//! Engine error types.

use thiserror::Error;

/// Errors surfaced while bringing the engine up.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `append_only` was requested without a journal path.
    #[error("append_only requires append_filename")]
    MissingJournalPath,

    /// Opening or replaying the journal failed.
    #[error("journal i/o: {0}")]
    Journal(#[from] std::io::Error),
}
