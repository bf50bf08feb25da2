//! Protocol error types for RESP parsing.

use thiserror::Error;

/// Errors that can occur when decoding the RESP wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input buffer doesn't contain a complete frame yet.
    /// The caller should read more data and try again.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The underlying stream ended in the middle of a frame.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A nested element started with a byte that isn't a RESP type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Failed to parse an integer value from a header line.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string declared an invalid length.
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// A bulk string body was not terminated by CRLF.
    #[error("bulk string missing CRLF terminator")]
    UnterminatedBulk,

    /// An array declared an invalid element count.
    #[error("invalid multibulk length: {0}")]
    InvalidMultiLength(i64),

    /// An array declared more elements than the codec accepts.
    #[error("multibulk length {0} exceeds limit")]
    TooManyElements(usize),

    /// Arrays nested deeper than the codec accepts.
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    /// A bulk string larger than the codec accepts.
    #[error("bulk string of {0} bytes exceeds limit")]
    BulkTooLarge(usize),

    /// The underlying stream failed. The payload stream ends after this.
    #[error("i/o error: {0}")]
    Io(String),
}

impl ProtocolError {
    /// Whether this error terminates the stream (as opposed to a frame-local
    /// violation the parser can resynchronize past).
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Io(_) | ProtocolError::UnexpectedEof)
    }
}
