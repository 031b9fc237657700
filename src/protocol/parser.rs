//! Incremental RESP Parser
//!
//! The parser works on whatever bytes the connection has buffered so far and
//! reports one of three outcomes:
//!
//! - `Ok(Some((value, consumed)))`: one complete value was decoded from the
//!   first `consumed` bytes. The caller drops those bytes.
//! - `Ok(None)`: the buffer holds only a prefix of a value. Read more and
//!   call again with the same bytes plus whatever arrived.
//! - `Err(ParseError)`: the bytes are not valid RESP.
//!
//! Decoding is resumable: elements of an array that were complete on an
//! earlier call are kept, and the next call picks up where the last one
//! stopped instead of starting again from the first byte.
//!
//! Most errors are confined to one line (a bad length, a non-numeric
//! integer, invalid UTF-8). For those, [`RespParser::resync_point`] says how
//! many bytes to discard to get past the offending line, and the stream can
//! carry on. A bulk string whose payload is not followed by CRLF leaves no
//! usable boundary; that one is final.
//!
//! Whether a *well-framed* value is an acceptable request (an array of bulk
//! strings) is decided one layer up, by [`crate::commands::Request`].
//!
//! Lines that do not start with a RESP type byte are read as inline commands
//! (`PING hello\r\n`) and returned as an array of bulk strings.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::mem;
use thiserror::Error;

/// Errors raised while decoding client bytes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Invalid integer in a length or integer line
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a line that must be text
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, nesting too deep)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A single bulk string is larger than the protocol allows
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

type Parsed = ParseResult<Option<(RespValue, usize)>>;

/// An array whose header has been read but not all of its elements.
#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    elements: Vec<RespValue>,
}

/// What one line (plus payload, for bulk strings) decodes to.
enum Item {
    Value(RespValue),
    ArrayHeader(usize),
}

/// A resumable RESP parser.
///
/// After `Ok(None)` the next call must be given the same bytes, extended.
/// After `Ok(Some(..))` or `Err(..)` the parser starts fresh.
///
/// # Example
///
/// ```
/// use resp_dispatch::protocol::{RespParser, RespValue};
///
/// let mut parser = RespParser::new();
/// assert_eq!(parser.parse(b"*1\r\n$4\r\nPI").unwrap(), None);
///
/// let (value, consumed) = parser.parse(b"*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
/// assert_eq!(consumed, 14);
/// assert_eq!(value.as_array().map(|a| a.len()), Some(1));
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Open arrays, innermost last.
    stack: Vec<PartialArray>,
    /// Bytes of the current value decoded so far.
    pos: usize,
    /// End of the offending line of the last error, if it had one.
    resync: Option<usize>,
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to decode one value from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> Parsed {
        self.resync = None;
        if self.pos > buf.len() {
            self.reset();
        }

        let result = self.advance(buf);
        if result.is_err() {
            self.reset();
        }
        result
    }

    /// After an `Err` from [`parse`](Self::parse): the number of leading
    /// bytes to discard to skip the line that caused it. `None` when the
    /// error left no line boundary to resume from.
    pub fn resync_point(&self) -> Option<usize> {
        self.resync
    }

    /// Drops any partially decoded value.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.pos = 0;
    }

    fn advance(&mut self, buf: &[u8]) -> Parsed {
        'items: loop {
            let (item, end) = match self.item(buf, self.pos)? {
                Some(step) => step,
                None => return Ok(None),
            };
            self.pos = end;

            let mut value = match item {
                Item::Value(value) => value,
                Item::ArrayHeader(0) => RespValue::Array(Vec::new()),
                Item::ArrayHeader(count) => {
                    if self.stack.len() >= MAX_NESTING_DEPTH {
                        return Err(ParseError::ProtocolError(format!(
                            "maximum nesting depth exceeded: {}",
                            MAX_NESTING_DEPTH
                        )));
                    }
                    // The count is client-controlled; the buffer is not.
                    let capacity = count.min(buf.len() - end);
                    self.stack.push(PartialArray {
                        remaining: count,
                        elements: Vec::with_capacity(capacity),
                    });
                    continue;
                }
            };

            while let Some(open) = self.stack.last_mut() {
                open.elements.push(value);
                open.remaining -= 1;
                if open.remaining > 0 {
                    continue 'items;
                }
                value = RespValue::Array(mem::take(&mut open.elements));
                self.stack.pop();
            }

            return Ok(Some((value, mem::take(&mut self.pos))));
        }
    }

    /// Decodes the item starting at `at`.
    fn item(&mut self, buf: &[u8], at: usize) -> ParseResult<Option<(Item, usize)>> {
        let kind = match buf.get(at) {
            Some(&kind) => kind,
            None => return Ok(None),
        };

        let step = match kind {
            prefix::SIMPLE_STRING => self
                .text(buf, at)?
                .map(|(s, end)| (Item::Value(RespValue::SimpleString(s.to_string())), end)),
            prefix::ERROR => self
                .text(buf, at)?
                .map(|(s, end)| (Item::Value(RespValue::Error(s.to_string())), end)),
            prefix::INTEGER => self
                .number(buf, at)?
                .map(|(n, end)| (Item::Value(RespValue::Integer(n)), end)),
            prefix::BULK_STRING => self.bulk_string(buf, at)?,
            prefix::ARRAY => match self.number(buf, at)? {
                Some((-1, end)) => Some((Item::Value(RespValue::Null), end)),
                Some((count, end)) if count < 0 => {
                    return Err(self.malformed(end, ParseError::InvalidArrayLength(count)))
                }
                Some((count, end)) => Some((Item::ArrayHeader(count as usize), end)),
                None => None,
            },
            _ if self.stack.is_empty() => self.inline(buf, at)?,
            other => {
                return Err(ParseError::ProtocolError(format!(
                    "unexpected type byte {:?} inside array",
                    other as char
                )))
            }
        };

        Ok(step)
    }

    /// `$<length>\r\n<data>\r\n`
    fn bulk_string(&mut self, buf: &[u8], at: usize) -> ParseResult<Option<(Item, usize)>> {
        let (length, header_end) = match self.number(buf, at)? {
            Some(line) => line,
            None => return Ok(None),
        };

        if length == -1 {
            return Ok(Some((Item::Value(RespValue::Null), header_end)));
        }
        if length < 0 {
            return Err(self.malformed(header_end, ParseError::InvalidBulkLength(length)));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            let error = ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            };
            return Err(self.malformed(header_end, error));
        }

        let total = header_end + length + CRLF.len();
        if buf.len() < total {
            return Ok(None);
        }
        if &buf[header_end + length..total] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header_end..header_end + length]);
        Ok(Some((Item::Value(RespValue::BulkString(data)), total)))
    }

    /// A bare line of whitespace-separated words, as typed into telnet.
    fn inline(&mut self, buf: &[u8], at: usize) -> ParseResult<Option<(Item, usize)>> {
        let (line, end) = match line_at(buf, at) {
            Some(line) => line,
            None => return Ok(None),
        };

        let line = std::str::from_utf8(line)
            .map_err(|e| self.malformed(end, ParseError::InvalidUtf8(e.to_string())))?;

        let words = line
            .split_whitespace()
            .map(|word| RespValue::BulkString(Bytes::copy_from_slice(word.as_bytes())))
            .collect();

        Ok(Some((Item::Value(RespValue::Array(words)), end)))
    }

    /// The text after the type byte at `at`, up to CRLF.
    fn text<'b>(&mut self, buf: &'b [u8], at: usize) -> ParseResult<Option<(&'b str, usize)>> {
        let (line, end) = match line_at(buf, at + 1) {
            Some(line) => line,
            None => return Ok(None),
        };

        std::str::from_utf8(line)
            .map(|s| Some((s, end)))
            .map_err(|e| self.malformed(end, ParseError::InvalidUtf8(e.to_string())))
    }

    fn number(&mut self, buf: &[u8], at: usize) -> ParseResult<Option<(i64, usize)>> {
        let (s, end) = match self.text(buf, at)? {
            Some(line) => line,
            None => return Ok(None),
        };

        s.parse::<i64>().map(|n| Some((n, end))).map_err(|e| {
            self.malformed(end, ParseError::InvalidInteger(format!("{:?}: {}", s, e)))
        })
    }

    /// Records that the stream can resume at `line_end`.
    fn malformed(&mut self, line_end: usize, error: ParseError) -> ParseError {
        self.resync = Some(line_end);
        error
    }
}

/// The line starting at `at` (without CRLF) and the offset just past it.
fn line_at(buf: &[u8], at: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(at..)?;
    find_crlf(rest).map(|pos| (&rest[..pos], at + pos + CRLF.len()))
}

/// Position of the first `\r\n`, pointing at the `\r`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single value from a complete buffer.
pub fn parse_message(buf: &[u8]) -> Parsed {
    RespParser::new().parse(buf)
}
