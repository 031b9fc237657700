use std::sync::atomic::{AtomicU64, Ordering};

/// Server-wide connection counters, updated by every dispatch loop.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently open connections
    pub active_connections: AtomicU64,
    /// Requests decoded into commands (control commands included)
    pub commands_processed: AtomicU64,
    /// EXEC calls that ran their queue
    pub transactions_executed: AtomicU64,
    /// EXEC calls that discarded a poisoned queue
    pub transactions_aborted: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transaction_executed(&self) {
        self.transactions_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transaction_aborted(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}
