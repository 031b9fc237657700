//! # resp-dispatch
//!
//! A small RESP server framework: register a handler per command name,
//! point the [`Server`] at a listener, and every client connection gets a
//! dispatch loop with built-in `MULTI`/`EXEC` transactions and `QUIT`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              Server                                 │
//! │                                                                     │
//! │  ┌─────────────┐   spawn    ┌──────────────────────┐                │
//! │  │  Listener   │──────────> │  ConnectionHandler   │  (per client)  │
//! │  │ (keepalive) │            │  RespParser          │                │
//! │  └─────────────┘            │  Transaction         │                │
//! │                             └──────────┬───────────┘                │
//! │                                        │ Request                    │
//! │                                        ▼                            │
//! │  ┌─────────────┐            ┌──────────────────────┐                │
//! │  │  EXEC lock  │<── batch ──│      Registry        │                │
//! │  └─────────────┘            │  name -> Handler     │                │
//! │                             │  per-command counts  │                │
//! │                             └──────────────────────┘                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use resp_dispatch::{RespValue, Request, Server, TracingLogger};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut server = Server::new().with_logger(TracingLogger);
//!     server.handle("ping", |_: &Request| Ok(RespValue::simple_string("PONG")));
//!
//!     Arc::new(server).listen_and_serve("127.0.0.1:6379").await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: RESP values and the incremental parser
//! - [`commands`]: requests, handlers and the command registry
//! - [`transaction`]: the per-connection MULTI/EXEC state machine
//! - [`connection`]: the per-connection dispatch loop
//! - [`server`]: configuration, listeners and the accept loop

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod transaction;

pub use commands::{CommandCount, CommandError, Handler, HandlerResult, Request};
pub use connection::{ConnectionError, ConnectionStats};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::{
    KeepAliveListener, Listener, Logger, NoopLogger, Server, ServerConfig, TracingLogger,
};

/// Default port for the demo binary
pub const DEFAULT_PORT: u16 = 6379;

/// Default host for the demo binary
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
