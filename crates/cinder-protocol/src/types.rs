//! RESP reply values.
//!
//! [`Reply`] represents a single parsed RESP value. It is used in both
//! directions: client requests arrive as arrays of bulk strings (a
//! "command line"), and the server answers with one of the reply kinds.
//! Bulk payloads use `Bytes` for reference-counted, copy-free handling
//! as frames move between the codec, the engine, and the append-only log.

use bytes::Bytes;

/// A command line as it travels through the server: one binary-safe
/// argument per element, the command name first.
pub type CmdLine = Vec<Bytes>;

/// A single RESP protocol value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Simple status line, e.g. `+OK\r\n`.
    Status(String),

    /// Error line, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Binary-safe bulk string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Null bulk string, `$-1\r\n`. GET on a missing key answers this.
    Null,

    /// Array of replies, e.g. `*2\r\n+a\r\n+b\r\n`. `*0\r\n` is the
    /// empty array. Elements may be any reply kind, including nulls.
    Array(Vec<Reply>),

    /// Null array, `*-1\r\n`. EXEC answers this when a watched key
    /// changed before the transaction took its locks.
    NullArray,
}

impl Reply {
    /// The canonical `+OK` status.
    pub fn ok() -> Self {
        Reply::Status("OK".into())
    }

    /// The `+QUEUED` status sent for each command buffered inside MULTI.
    pub fn queued() -> Self {
        Reply::Status("QUEUED".into())
    }

    /// An error reply with the given message (no `-` prefix).
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    /// A bulk reply from anything convertible to `Bytes`.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// An array of bulk strings — the encoding of a command line.
    pub fn multi_bulk(args: &[Bytes]) -> Self {
        Reply::Array(args.iter().cloned().map(Reply::Bulk).collect())
    }

    pub fn unknown_command(name: &str) -> Self {
        Reply::Error(format!("ERR unknown command '{name}'"))
    }

    pub fn arg_num_err(name: &str) -> Self {
        Reply::Error(format!(
            "ERR wrong number of arguments for '{name}' command"
        ))
    }

    pub fn syntax_err() -> Self {
        Reply::Error("ERR syntax error".into())
    }

    pub fn wrong_type() -> Self {
        Reply::Error(
            "WRONGTYPE Operation against a key holding the wrong kind of value".into(),
        )
    }

    pub fn not_an_integer() -> Self {
        Reply::Error("ERR value is not an integer or out of range".into())
    }

    pub fn not_a_float() -> Self {
        Reply::Error("ERR value is not a valid float".into())
    }

    /// Returns `true` if this reply is an error of any kind.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Returns `true` if this reply is the null bulk string.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null)
    }

    /// Interprets this reply as a command line: an array whose elements
    /// are all bulk strings. Returns `None` for any other shape — the
    /// server rejects such frames, and the AOF loader skips them.
    pub fn as_cmd_line(&self) -> Option<CmdLine> {
        let Reply::Array(items) = self else {
            return None;
        };
        let mut args = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Reply::Bulk(data) => args.push(data.clone()),
                _ => return None,
            }
        }
        Some(args)
    }
}

/// Builds a command line from string-ish parts. Test and journal helper.
pub fn cmd_line<I, T>(parts: I) -> CmdLine
where
    I: IntoIterator<Item = T>,
    T: Into<Bytes>,
{
    parts.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_replies() {
        assert_eq!(Reply::ok(), Reply::Status("OK".into()));
        assert_eq!(Reply::queued(), Reply::Status("QUEUED".into()));
        assert!(Reply::syntax_err().is_error());
        assert!(Reply::wrong_type().is_error());
        assert!(!Reply::ok().is_error());
    }

    #[test]
    fn cmd_line_round_trip() {
        let line = cmd_line(["SET", "key", "value"]);
        let reply = Reply::multi_bulk(&line);
        assert_eq!(reply.as_cmd_line(), Some(line));
    }

    #[test]
    fn as_cmd_line_rejects_non_bulk_elements() {
        let reply = Reply::Array(vec![
            Reply::Bulk(Bytes::from_static(b"GET")),
            Reply::Integer(1),
        ]);
        assert_eq!(reply.as_cmd_line(), None);
        assert_eq!(Reply::Status("OK".into()).as_cmd_line(), None);
    }

    #[test]
    fn empty_array_is_empty_cmd_line() {
        assert_eq!(Reply::Array(vec![]).as_cmd_line(), Some(vec![]));
    }
}
