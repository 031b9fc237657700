//! Decoded client requests.

use crate::protocol::RespValue;
use bytes::Bytes;
use thiserror::Error;

/// A frame that was well-formed RESP but not a usable command.
///
/// The frame's bytes have already been consumed, so the connection can answer
/// with an error and keep going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("request is not an array")]
    NotAnArray,

    #[error("empty request")]
    Empty,

    #[error("request element {0} is not a bulk string")]
    NotBulk(usize),

    #[error("command name is not valid UTF-8")]
    InvalidName,
}

/// One command sent by a client: a lowercased name plus its arguments.
///
/// Requests are immutable. Arguments are binary-safe; use [`Request::arg_str`]
/// when a handler needs text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    name: String,
    args: Vec<Bytes>,
}

impl Request {
    /// Builds a request, lowercasing the name.
    ///
    /// # Example
    /// ```
    /// use resp_dispatch::commands::Request;
    /// let req = Request::new("GET", ["key"]);
    /// assert_eq!(req.name(), "get");
    /// assert_eq!(req.arg_str(0), Some("key"));
    /// ```
    pub fn new<I, A>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        Self {
            name: name.to_lowercase(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index)
    }

    /// Argument `index` as UTF-8 text, if present and valid.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .and_then(|arg| std::str::from_utf8(arg).ok())
    }

    /// Number of tokens including the command name, as clients count it.
    pub fn argc(&self) -> usize {
        self.args.len() + 1
    }
}

impl TryFrom<RespValue> for Request {
    type Error = RequestError;

    fn try_from(frame: RespValue) -> Result<Self, Self::Error> {
        let elements = match frame {
            RespValue::Array(elements) => elements,
            _ => return Err(RequestError::NotAnArray),
        };

        let mut tokens = Vec::with_capacity(elements.len());
        for (i, element) in elements.into_iter().enumerate() {
            match element {
                RespValue::BulkString(data) => tokens.push(data),
                _ => return Err(RequestError::NotBulk(i)),
            }
        }

        let mut tokens = tokens.into_iter();
        let name = tokens.next().ok_or(RequestError::Empty)?;
        let name = std::str::from_utf8(&name).map_err(|_| RequestError::InvalidName)?;

        Ok(Self {
            name: name.to_lowercase(),
            args: tokens.collect(),
        })
    }
}
