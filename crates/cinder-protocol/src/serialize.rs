//! Direct-to-buffer RESP serialization.
//!
//! Writes replies directly into a `BytesMut` with no intermediate
//! allocations. Integer-to-string conversion uses `itoa` for fast
//! stack-based formatting. Encodings are byte-exact inverses of the
//! parser, so `parse(serialize(r)) == r` for every reply.

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::Reply;

impl Reply {
    /// Serializes this reply into the provided buffer, including the
    /// type prefix and trailing `\r\n` delimiters.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Reply::Status(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Reply::Error(msg) => {
                dst.put_u8(b'-');
                dst.put_slice(msg.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                dst.put_u8(b':');
                write_i64(*n, dst);
                dst.put_slice(b"\r\n");
            }
            Reply::Bulk(data) => {
                dst.put_u8(b'$');
                write_i64(data.len() as i64, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Reply::Null => {
                dst.put_slice(b"$-1\r\n");
            }
            Reply::Array(items) => {
                dst.put_u8(b'*');
                write_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Reply::NullArray => {
                dst.put_slice(b"*-1\r\n");
            }
        }
    }

    /// Serializes into a fresh buffer. Convenience for one-shot callers.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf.freeze()
    }
}

/// Serializes a command line as a multi-bulk frame, the encoding used for
/// both client requests and append-only log records. Avoids building an
/// intermediate `Reply::Array` on the journal's hot path.
pub fn write_multi_bulk(args: &[Bytes], dst: &mut BytesMut) {
    dst.put_u8(b'*');
    write_i64(args.len() as i64, dst);
    dst.put_slice(b"\r\n");
    for arg in args {
        dst.put_u8(b'$');
        write_i64(arg.len() as i64, dst);
        dst.put_slice(b"\r\n");
        dst.put_slice(arg);
        dst.put_slice(b"\r\n");
    }
}

fn write_i64(val: i64, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}
