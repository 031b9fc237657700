//! RESP Protocol
//!
//! The wire codec the dispatch loop talks through. It knows nothing about
//! commands or transactions.
//!
//! - `types`: [`RespValue`], the closed set of reply kinds, and its encoder
//! - `parser`: the incremental decoder for client frames
//!
//! ## Example
//!
//! ```
//! use resp_dispatch::protocol::{parse_message, RespValue};
//!
//! let data = b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert!(value.as_array().is_some());
//!
//! assert_eq!(RespValue::queued().serialize(), b"+QUEUED\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
