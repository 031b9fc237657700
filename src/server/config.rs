use std::time::Duration;

/// Keep-alive period applied by [`super::Server::listen_and_serve`].
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(3 * 60);

/// Largest incomplete request a connection will buffer (64 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Server tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP keep-alive idle time for accepted sockets; `None` leaves the OS default.
    pub keepalive: Option<Duration>,

    /// Upper bound on buffered bytes of a request that has not fully arrived.
    /// A client exceeding it is disconnected.
    pub max_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            keepalive: Some(DEFAULT_KEEPALIVE),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}
