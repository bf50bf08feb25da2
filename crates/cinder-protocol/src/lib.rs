//! cinder-protocol: RESP wire protocol implementation.
//!
//! Provides incremental parsing and direct-to-buffer serialization of
//! the RESP protocol used for client-server communication and for the
//! append-only log file format (which is the same framing).
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use cinder_protocol::{parse_reply, Reply};
//!
//! // parse a status line
//! let input = b"+OK\r\n";
//! let (reply, consumed) = parse_reply(input).unwrap().unwrap();
//! assert_eq!(reply, Reply::Status("OK".into()));
//! assert_eq!(consumed, input.len());
//!
//! // serialize a reply
//! let mut buf = BytesMut::new();
//! reply.serialize(&mut buf);
//! assert_eq!(&buf[..], b"+OK\r\n");
//! ```

pub mod error;
pub mod parse;
mod serialize;
pub mod types;

pub use error::ProtocolError;
pub use parse::{parse_reply, skip_past_crlf, ReplyStream};
pub use serialize::write_multi_bulk;
pub use types::{cmd_line, CmdLine, Reply};
