//! Command Registry
//!
//! Maps lowercase command names to handlers. The registry is filled while the
//! server is being configured and only read afterwards, which is what lets
//! every connection task look commands up without locking.
//!
//! Each entry also counts how often its handler ran, for [`Registry::stats`].

use super::error::{error_reply, HandlerResult};
use super::request::Request;
use crate::protocol::RespValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A command implementation.
///
/// Implemented for every `Fn(&Request) -> HandlerResult` closure, so most
/// callers never name this trait:
///
/// ```
/// use resp_dispatch::commands::{CommandError, Request};
/// use resp_dispatch::protocol::RespValue;
/// use resp_dispatch::Server;
///
/// let mut server = Server::new();
/// server.handle("echo", |req: &Request| match req.args() {
///     [msg] => Ok(RespValue::bulk_string(msg.clone())),
///     _ => Err(CommandError::WrongArgs),
/// });
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: &Request) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, req: &Request) -> HandlerResult {
        self(req)
    }
}

/// How many times one command's handler has been invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCount {
    pub name: String,
    pub count: u64,
}

struct Entry {
    handler: Arc<dyn Handler>,
    calls: AtomicU64,
}

/// Lowercase command name to handler.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, case-insensitively. A later
    /// registration for the same name replaces the earlier one.
    ///
    /// # Panics
    ///
    /// If `name` is empty. That is a programming error in the host
    /// application, not something a client can trigger.
    pub fn register(&mut self, name: &str, handler: impl Handler) {
        assert!(!name.is_empty(), "command registered with an empty name");
        self.entries.insert(
            name.to_lowercase(),
            Entry {
                handler: Arc::new(handler),
                calls: AtomicU64::new(0),
            },
        );
    }

    /// Expects an already-lowercased name.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the handler for `req` and translates its result into a reply.
    ///
    /// Returns `None` when no handler is registered under the request's name.
    pub fn invoke(&self, req: &Request) -> Option<RespValue> {
        let entry = self.entries.get(req.name())?;
        entry.calls.fetch_add(1, Ordering::Relaxed);

        let reply = match entry.handler.call(req) {
            Ok(value) => value,
            Err(err) => {
                trace!(command = req.name(), error = %err, "Handler failed");
                error_reply(req.name(), &err)
            }
        };
        Some(reply)
    }

    /// Call counts for every command invoked at least once, sorted by name.
    pub fn stats(&self) -> Vec<CommandCount> {
        let mut counts: Vec<CommandCount> = self
            .entries
            .iter()
            .filter_map(|(name, entry)| {
                let count = entry.calls.load(Ordering::Relaxed);
                (count > 0).then(|| CommandCount {
                    name: name.clone(),
                    count,
                })
            })
            .collect();
        counts.sort_by(|a, b| a.name.cmp(&b.name));
        counts
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("commands", &names).finish()
    }
}
