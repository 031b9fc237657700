//! Error sink for connection failures.
//!
//! The server reports each connection that ends with a real error (anything
//! but the client hanging up) to a [`Logger`]. The default discards them.

use std::fmt;

/// Receives one formatted line per failed connection.
///
/// ```
/// use resp_dispatch::{Logger, Server};
/// use std::fmt;
///
/// struct Stderr;
///
/// impl Logger for Stderr {
///     fn log(&self, args: fmt::Arguments<'_>) {
///         eprintln!("{}", args);
///     }
/// }
///
/// let server = Server::new().with_logger(Stderr);
/// ```
pub trait Logger: Send + Sync + 'static {
    fn log(&self, args: fmt::Arguments<'_>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _args: fmt::Arguments<'_>) {}
}

/// Forwards to `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, args: fmt::Arguments<'_>) {
        tracing::error!("{}", args);
    }
}
