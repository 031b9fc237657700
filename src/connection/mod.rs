//! Connection Dispatch Module
//!
//! Every accepted client gets its own [`ConnectionHandler`] running on its
//! own task. The handler owns the read buffer, the RESP parser and the
//! connection's [`crate::transaction::Transaction`]; nothing here is shared
//! between connections except the `Server` it borrows.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ConnectionHandler                        │
//! │                                                              │
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────────┐  │
//! │  │ Read bytes │──>│ Parse RESP │──>│ QUIT / MULTI / EXEC  │  │
//! │  └────────────┘   └────────────┘   │ queue or execute     │  │
//! │        ▲                           └──────────┬───────────┘  │
//! │        │                                      ▼              │
//! │        │                              ┌──────────────┐       │
//! │        └──────────────────────────────│ Write reply  │       │
//! │                                       └──────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Requests are answered strictly in arrival order. A pipelined burst is
//! answered reply by reply, each flushed before the next request runs.

pub mod handler;
pub mod stats;

pub use handler::{ConnectionError, ConnectionHandler};
pub use stats::ConnectionStats;
