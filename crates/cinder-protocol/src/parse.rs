//! Incremental RESP parser.
//!
//! Operates on buffered byte slices. The caller is responsible for reading
//! data from the network (or a file) into a buffer — the parser itself is
//! purely synchronous. A `Cursor<&[u8]>` tracks the position through the
//! input without consuming it, so the caller can retry once more data
//! arrives: [`parse_reply`] returns `Ok(None)` while the buffer holds only
//! a partial frame, and `Ok(Some((reply, consumed)))` once a frame is
//! complete.
//!
//! Both sides of the system share this parser: the connection handler
//! frames client requests with it, and [`ReplyStream`] wraps it around any
//! `io::Read` to lazily decode persisted command frames during append-only
//! log recovery.
//!
//! Top-level frames may be any RESP value (`+`, `-`, `:`, `$`, `*`) or an
//! inline command: a bare text line whose whitespace-separated words become
//! the command arguments. Nested elements must carry a type prefix.

use std::io::{self, Cursor, Read};

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;
use crate::types::Reply;

/// Maximum nesting depth for arrays. Prevents stack overflow from
/// malformed deeply-nested frames.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum number of elements in an array. Prevents memory amplification
/// where a tiny header declares a disproportionately large allocation.
const MAX_ARRAY_ELEMENTS: usize = 1_048_576;

/// Maximum length of a bulk string in bytes (512 MB, matching Redis).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Cap for `Vec::with_capacity` in array parsing, limiting the upfront
/// allocation while still letting the Vec grow as elements are parsed.
const PREALLOC_CAP: usize = 1024;

/// Parses one complete RESP frame from the front of `buf`.
///
/// Returns `Ok(Some((reply, consumed)))` when a complete frame was parsed,
/// `Ok(None)` when the buffer doesn't contain enough data yet, or
/// `Err(...)` when the data is malformed. On error no consumed count is
/// available; callers resynchronize with [`skip_past_crlf`].
pub fn parse_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);

    match try_parse(&mut cursor, 0) {
        Ok(reply) => {
            let consumed = cursor.position() as usize;
            Ok(Some((reply, consumed)))
        }
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Returns how many bytes to drop from the front of `buf` to resynchronize
/// after a protocol error: everything up to and including the next CRLF,
/// or the whole buffer if no CRLF is present yet.
pub fn skip_past_crlf(buf: &[u8]) -> usize {
    let mut pos = 0;
    while let Some(offset) = memchr::memchr(b'\r', &buf[pos..]) {
        let cr = pos + offset;
        if cr + 1 < buf.len() && buf[cr + 1] == b'\n' {
            return cr + 2;
        }
        pos = cr + 1;
    }
    buf.len()
}

// ---------------------------------------------------------------------------
// single-pass parser
// ---------------------------------------------------------------------------

fn try_parse(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Reply, ProtocolError> {
    let prefix = peek_byte(cursor)?;

    match prefix {
        b'+' => {
            advance(cursor, 1);
            let line = read_line(cursor)?;
            Ok(Reply::Status(lossy_string(line)))
        }
        b'-' => {
            advance(cursor, 1);
            let line = read_line(cursor)?;
            Ok(Reply::Error(lossy_string(line)))
        }
        b':' => {
            advance(cursor, 1);
            let val = read_integer_line(cursor)?;
            Ok(Reply::Integer(val))
        }
        b'$' => {
            advance(cursor, 1);
            parse_bulk(cursor)
        }
        b'*' => {
            advance(cursor, 1);
            parse_array(cursor, depth)
        }
        _ if depth == 0 => parse_inline(cursor),
        other => Err(ProtocolError::InvalidPrefix(other)),
    }
}

fn parse_bulk(cursor: &mut Cursor<&[u8]>) -> Result<Reply, ProtocolError> {
    let len = read_integer_line(cursor)?;
    if len == -1 {
        return Ok(Reply::Null);
    }
    if len < 0 {
        return Err(ProtocolError::InvalidBulkLength(len));
    }
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::BulkTooLarge(len as usize));
    }
    let len = len as usize;

    // need `len` bytes of data + trailing \r\n
    if remaining(cursor) < len + 2 {
        return Err(ProtocolError::Incomplete);
    }

    let pos = cursor.position() as usize;
    let buf = cursor.get_ref();
    if buf[pos + len] != b'\r' || buf[pos + len + 1] != b'\n' {
        return Err(ProtocolError::UnterminatedBulk);
    }
    let data = bytes::Bytes::copy_from_slice(&buf[pos..pos + len]);
    cursor.set_position((pos + len + 2) as u64);
    Ok(Reply::Bulk(data))
}

fn parse_array(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Reply, ProtocolError> {
    let next_depth = depth + 1;
    if next_depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
    }

    let count = read_integer_line(cursor)?;
    if count == -1 {
        return Ok(Reply::NullArray);
    }
    if count < 0 {
        return Err(ProtocolError::InvalidMultiLength(count));
    }
    if count as usize > MAX_ARRAY_ELEMENTS {
        return Err(ProtocolError::TooManyElements(count as usize));
    }

    let count = count as usize;
    let mut items = Vec::with_capacity(count.min(PREALLOC_CAP));
    for _ in 0..count {
        items.push(try_parse(cursor, next_depth)?);
    }
    Ok(Reply::Array(items))
}

/// Parses an inline command: a bare text line split on whitespace into
/// bulk-string arguments. A blank line yields an empty command line,
/// which the server skips.
fn parse_inline(cursor: &mut Cursor<&[u8]>) -> Result<Reply, ProtocolError> {
    let line = read_line(cursor)?;
    let args = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| Reply::Bulk(bytes::Bytes::copy_from_slice(word)))
        .collect();
    Ok(Reply::Array(args))
}

// ---------------------------------------------------------------------------
// low-level cursor helpers
// ---------------------------------------------------------------------------

fn peek_byte(cursor: &Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    if pos >= cursor.get_ref().len() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(cursor.get_ref()[pos])
}

fn advance(cursor: &mut Cursor<&[u8]>, n: u64) {
    cursor.set_position(cursor.position() + n);
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    let len = cursor.get_ref().len();
    let pos = cursor.position() as usize;
    len.saturating_sub(pos)
}

/// Returns the slice up to (but not including) the next `\r\n` and
/// advances the cursor past it.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let buf: &'a [u8] = *cursor.get_ref();
    let start = cursor.position() as usize;

    // memchr scans for \r, then verify \n follows
    let mut pos = start;
    while let Some(offset) = memchr::memchr(b'\r', &buf[pos..]) {
        let cr = pos + offset;
        if cr + 1 < buf.len() && buf[cr + 1] == b'\n' {
            cursor.set_position((cr + 2) as u64);
            return Ok(&buf[start..cr]);
        }
        pos = cr + 1;
    }

    Err(ProtocolError::Incomplete)
}

fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = read_line(cursor)?;
    parse_i64_bytes(line)
}

fn lossy_string(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

/// Parses an i64 directly from a byte slice without allocating.
///
/// Negative numbers accumulate in the negative direction so that
/// `i64::MIN` is representable without overflow.
fn parse_i64_bytes(buf: &[u8]) -> Result<i64, ProtocolError> {
    if buf.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    let (negative, digits) = if buf[0] == b'-' {
        (true, &buf[1..])
    } else {
        (false, buf)
    };

    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        let digit = (b - b'0') as i64;
        n = n
            .checked_mul(10)
            .and_then(|n| {
                if negative {
                    n.checked_sub(digit)
                } else {
                    n.checked_add(digit)
                }
            })
            .ok_or(ProtocolError::InvalidInteger)?;
    }
    Ok(n)
}

// ---------------------------------------------------------------------------
// lazy payload stream over io::Read
// ---------------------------------------------------------------------------

/// Read chunk size for [`ReplyStream`].
const STREAM_CHUNK: usize = 4096;

/// A lazy sequence of parsed replies drained from a byte stream.
///
/// Used by the append-only log loader to frame persisted command lines.
/// Each item is either a parsed reply or a protocol error. After a
/// frame-local protocol error the stream resynchronizes at the next CRLF
/// and continues; after an I/O error or a truncated trailing frame it
/// yields one terminal error and then ends.
pub struct ReplyStream<R> {
    reader: R,
    buf: BytesMut,
    done: bool,
}

impl<R: Read> ReplyStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(STREAM_CHUNK),
            done: false,
        }
    }

    /// Reads one chunk from the underlying reader into the buffer.
    /// Returns the number of bytes read.
    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; STREAM_CHUNK];
        let n = self.reader.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}

impl<R: Read> Iterator for ReplyStream<R> {
    type Item = Result<Reply, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match parse_reply(&self.buf) {
                Ok(Some((reply, consumed))) => {
                    self.buf.advance(consumed);
                    return Some(Ok(reply));
                }
                Ok(None) => match self.fill() {
                    Ok(0) => {
                        self.done = true;
                        if self.buf.is_empty() {
                            return None;
                        }
                        // trailing partial frame: the writer stopped
                        // mid-record (e.g. a crash during an append)
                        return Some(Err(ProtocolError::UnexpectedEof));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(ProtocolError::Io(e.to_string())));
                    }
                },
                Err(e) => {
                    let skip = skip_past_crlf(&self.buf);
                    self.buf.advance(skip);
                    return Some(Err(e));
                }
            }
        }
    }
}
