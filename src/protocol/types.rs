//! RESP Reply Values
//!
//! Every reply the server writes is a [`RespValue`]. Handlers build them, the
//! dispatch loop builds them for control replies (`OK`, `QUEUED`, transaction
//! errors), and the encoder turns them into wire bytes. The set of variants is
//! closed, so serialization is total.
//!
//! ## Wire Format
//!
//! | Variant        | Prefix | Example                     |
//! |----------------|--------|-----------------------------|
//! | `SimpleString` | `+`    | `+QUEUED\r\n`               |
//! | `Error`        | `-`    | `-ERR EXEC without MULTI\r\n` |
//! | `Integer`      | `:`    | `:42\r\n`                   |
//! | `BulkString`   | `$`    | `$5\r\nhello\r\n`           |
//! | `Null`         | `$`    | `$-1\r\n`                   |
//! | `Array`        | `*`    | `*2\r\n:1\r\n:2\r\n`        |

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A RESP value, used both for replies and for decoded request frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe status line. Must not contain CR or LF.
    SimpleString(String),

    /// Error line. The first word is the conventional error tag (`ERR`, `EXECABORT`).
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Binary-safe string.
    BulkString(Bytes),

    /// Null bulk string (`$-1`), also produced when decoding a null array.
    Null,

    /// Ordered list of values. EXEC replies are always arrays.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a simple string reply.
    ///
    /// # Example
    /// ```
    /// use resp_dispatch::protocol::RespValue;
    /// assert_eq!(RespValue::simple_string("OK").serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates an error reply. The caller supplies the tag.
    ///
    /// # Example
    /// ```
    /// use resp_dispatch::protocol::RespValue;
    /// let err = RespValue::error("ERR EXEC without MULTI");
    /// assert!(err.is_error());
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a bulk string reply.
    ///
    /// # Example
    /// ```
    /// use resp_dispatch::protocol::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// `+OK`, the reply to an accepted MULTI.
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// `+QUEUED`, the reply to a command accepted into a transaction.
    pub fn queued() -> Self {
        RespValue::SimpleString("QUEUED".to_string())
    }

    /// Serializes the value to a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer, appending to it.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Returns the text of a SimpleString, or a UTF-8 BulkString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

fn write_line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

impl From<i64> for RespValue {
    fn from(n: i64) -> Self {
        RespValue::Integer(n)
    }
}

impl From<Bytes> for RespValue {
    fn from(data: Bytes) -> Self {
        RespValue::BulkString(data)
    }
}

impl From<Option<Bytes>> for RespValue {
    fn from(data: Option<Bytes>) -> Self {
        data.map_or(RespValue::Null, RespValue::BulkString)
    }
}

impl From<Vec<RespValue>> for RespValue {
    fn from(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }
}

// redis-cli style rendering, used in trace logs.
impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) if values.is_empty() => write!(f, "(empty array)"),
            RespValue::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}
