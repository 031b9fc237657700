//! Server and Connection Supervisor
//!
//! A [`Server`] is configured once (handlers, logger, config), shared through
//! an `Arc`, and then serves any number of connections:
//!
//! ```text
//!                ┌──────────────────────────────┐
//!                │     serve(listener) loop     │
//!                └──────────────┬───────────────┘
//!                               │ accept() ── Err ──> return Err
//!                               │
//!              ┌────────────────┼────────────────┐
//!              ▼                ▼                ▼
//!       ┌────────────┐   ┌────────────┐   ┌────────────┐
//!       │ task: conn │   │ task: conn │   │ task: conn │  one tokio task each,
//!       │ dispatch   │   │ dispatch   │   │ dispatch   │  failures stay inside
//!       └─────┬──────┘   └─────┬──────┘   └─────┬──────┘
//!             │   read-only    │                │
//!             └────────────────┼────────────────┘
//!                              ▼
//!          Registry (immutable)  +  EXEC lock (one per server)
//! ```
//!
//! Standalone commands run on their connection's task with no locking.
//! EXEC batches take the server-wide EXEC lock, so two transactions never
//! interleave their handler calls; a standalone command may still run in the
//! middle of someone else's batch.
//!
//! ## Example
//!
//! ```no_run
//! use resp_dispatch::commands::{CommandError, Request};
//! use resp_dispatch::protocol::RespValue;
//! use resp_dispatch::{Server, TracingLogger};
//! use std::sync::Arc;
//!
//! # async fn run() -> std::io::Result<()> {
//! let mut server = Server::new().with_logger(TracingLogger);
//! server.handle("ping", |req: &Request| match req.args() {
//!     [] => Ok(RespValue::simple_string("PONG")),
//!     [msg] => Ok(RespValue::bulk_string(msg.clone())),
//!     _ => Err(CommandError::WrongArgs),
//! });
//!
//! Arc::new(server).listen_and_serve("127.0.0.1:6379").await
//! # }
//! ```

pub mod config;
pub mod listener;
pub mod logger;

pub use config::{ServerConfig, DEFAULT_KEEPALIVE, DEFAULT_MAX_BUFFER_SIZE};
pub use listener::{KeepAliveListener, Listener};
pub use logger::{Logger, NoopLogger, TracingLogger};

use crate::commands::{unknown_command, CommandCount, Handler, HandlerResult, Registry, Request};
use crate::connection::{ConnectionError, ConnectionHandler, ConnectionStats};
use crate::protocol::RespValue;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, Instrument};

/// A RESP server dispatching commands to registered handlers.
pub struct Server {
    registry: Registry,
    logger: Box<dyn Logger>,
    config: ServerConfig,
    /// Serializes EXEC batches across all connections.
    exec_lock: Mutex<()>,
    stats: ConnectionStats,
}

impl Server {
    /// A server with no commands, a [`NoopLogger`] and default config.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            logger: Box::new(NoopLogger),
            config: ServerConfig::default(),
            exec_lock: Mutex::new(()),
            stats: ConnectionStats::new(),
        }
    }

    pub fn with_logger(mut self, logger: impl Logger) -> Self {
        self.logger = Box::new(logger);
        self
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a closure as the handler for `name` (case-insensitive).
    ///
    /// # Panics
    ///
    /// If `name` is empty.
    pub fn handle<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register(name, handler);
    }

    /// Registers any [`Handler`] implementation for `name`.
    ///
    /// # Panics
    ///
    /// If `name` is empty.
    pub fn handle_with(&mut self, name: &str, handler: impl Handler) {
        self.registry.register(name, handler);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn connection_stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Per-command invocation counts, sorted by name.
    pub fn stats(&self) -> Vec<CommandCount> {
        self.registry.stats()
    }

    /// Runs one request outside any transaction and returns its reply.
    ///
    /// Handlers run inline on the calling runtime worker thread. A handler
    /// that blocks holds that worker, and any timers it drives, until it
    /// returns; long blocking work belongs on `tokio::task::spawn_blocking`
    /// or a thread of its own.
    pub fn execute(&self, req: &Request) -> RespValue {
        self.registry
            .invoke(req)
            .unwrap_or_else(|| unknown_command(req.name()))
    }

    /// Runs a committed transaction, one reply per request, while holding
    /// the EXEC lock. Like [`execute`](Self::execute), the handlers run on
    /// the current worker thread.
    pub(crate) async fn execute_batch(&self, batch: &[Request]) -> RespValue {
        let _guard = self.exec_lock.lock().await;
        RespValue::Array(batch.iter().map(|req| self.execute(req)).collect())
    }

    /// Serves a single connection until it closes.
    ///
    /// Works with any byte stream, which makes it usable without a listener.
    pub async fn handle_conn<S>(&self, stream: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ConnectionHandler::new(stream, self).run().await
    }

    /// Accepts connections until the listener fails, serving each on its own
    /// task. The listener error is returned.
    pub async fn serve<L: Listener>(self: Arc<Self>, mut listener: L) -> io::Result<()> {
        info!(commands = self.registry.len(), "Serving");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    return Err(e);
                }
            };

            let server = Arc::clone(&self);
            let span = info_span!("connection", client = ?peer);

            tokio::spawn(
                async move {
                    if let Err(e) = server.handle_conn(stream).await {
                        if !e.is_disconnect() {
                            server.logger.log(format_args!("{:?}: {}", peer, e));
                        }
                    }
                }
                .instrument(span),
            );
        }
    }

    /// Binds a TCP listener on `addr` and serves it, with the configured
    /// keep-alive period applied to every accepted socket.
    pub async fn listen_and_serve(self: Arc<Self>, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Listening");

        match self.config.keepalive {
            Some(period) => {
                debug!(?period, "TCP keep-alive enabled");
                self.serve(KeepAliveListener::new(listener, period)).await
            }
            None => self.serve(listener).await,
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandError;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[derive(Default)]
    struct CapturingLogger {
        lines: std::sync::Mutex<Vec<String>>,
    }

    impl Logger for Arc<CapturingLogger> {
        fn log(&self, args: fmt::Arguments<'_>) {
            self.lines.lock().unwrap().push(args.to_string());
        }
    }

    fn ping_server() -> Server {
        let mut server = Server::new();
        server.handle("ping", |req: &Request| match req.args() {
            [] => Ok(RespValue::simple_string("PONG")),
            [msg] => Ok(RespValue::bulk_string(msg.clone())),
            _ => Err(CommandError::WrongArgs),
        });
        server
    }

    async fn start(server: Server) -> (Arc<Server>, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(server);
        tokio::spawn(Arc::clone(&server).serve(listener));
        (server, addr)
    }

    async fn read_exactly(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        buf
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition never held");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_server_stats() {
        let (server, addr) = start(ping_server()).await;

        let mut conn = TcpStream::connect(addr).await.unwrap();
        for _ in 0..2 {
            conn.write_all(b"*2\r\n$4\r\nPING\r\n").await.unwrap();
            conn.write_all(b"$12\r\nHello, world\r\n").await.unwrap();
        }
        conn.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();

        // QUIT closes the connection after both replies.
        let mut replies = Vec::new();
        conn.read_to_end(&mut replies).await.unwrap();
        assert_eq!(replies, b"$12\r\nHello, world\r\n$12\r\nHello, world\r\n");

        assert_eq!(
            server.stats(),
            vec![CommandCount {
                name: "ping".to_string(),
                count: 2
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_connection_is_isolated_and_logged() {
        let logger = Arc::new(CapturingLogger::default());
        let (server, addr) = start(ping_server().with_logger(Arc::clone(&logger))).await;

        let mut healthy = TcpStream::connect(addr).await.unwrap();
        healthy.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut healthy, 7).await, b"+PONG\r\n");

        // A bad length line is answered and skipped.
        let mut broken = TcpStream::connect(addr).await.unwrap();
        broken.write_all(b"*1\r\n$-7\r\n").await.unwrap();
        assert_eq!(
            read_exactly(&mut broken, 22).await,
            b"-ERR unknown command\r\n"
        );

        // A bulk payload without its CRLF leaves nothing to resume from and
        // kills only this connection.
        broken.write_all(b"$3\r\nabcd\r\n").await.unwrap();
        let mut rest = Vec::new();
        broken.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        healthy.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut healthy, 7).await, b"+PONG\r\n");

        // A clean hang-up is not reported.
        drop(healthy);
        eventually(|| server.connection_stats().active_connections.load(Ordering::Relaxed) == 0)
            .await;
        eventually(|| !logger.lines.lock().unwrap().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let lines = logger.lines.lock().unwrap().clone();
        assert_eq!(lines.len(), 1, "unexpected log lines: {:?}", lines);
        assert!(lines[0].contains("bulk string missing trailing CRLF"));
    }

    #[tokio::test]
    async fn test_serve_returns_listener_error() {
        struct Broken;

        impl Listener for Broken {
            type Io = tokio::io::DuplexStream;
            type Addr = ();

            fn accept(
                &mut self,
            ) -> impl std::future::Future<Output = io::Result<(Self::Io, Self::Addr)>> + Send
            {
                async { Err(io::Error::new(io::ErrorKind::Other, "listener closed")) }
            }
        }

        let err = Arc::new(ping_server()).serve(Broken).await.unwrap_err();
        assert_eq!(err.to_string(), "listener closed");
    }

    #[tokio::test]
    async fn test_serve_over_in_memory_streams() {
        struct Channel(tokio::sync::mpsc::Receiver<tokio::io::DuplexStream>);

        impl Listener for Channel {
            type Io = tokio::io::DuplexStream;
            type Addr = &'static str;

            fn accept(
                &mut self,
            ) -> impl std::future::Future<Output = io::Result<(Self::Io, Self::Addr)>> + Send
            {
                async move {
                    match self.0.recv().await {
                        Some(stream) => Ok((stream, "memory")),
                        None => Err(io::ErrorKind::NotConnected.into()),
                    }
                }
            }
        }

        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let serving = tokio::spawn(Arc::new(ping_server()).serve(Channel(rx)));

        let (mut client, server_side) = tokio::io::duplex(1024);
        tx.send(server_side).await.unwrap();
        client.write_all(b"PING\r\n").await.unwrap();
        let mut buf = [0u8; 7];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"+PONG\r\n");

        drop(tx);
        let err = serving.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_listen_and_serve_reports_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let err = Arc::new(ping_server())
            .listen_and_serve(addr)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exec_batches_do_not_interleave() {
        let log = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let mut server = Server::new();
        let calls = Arc::clone(&log);
        server.handle("record", move |req: &Request| {
            let tag = req.arg_str(0).ok_or(CommandError::WrongArgs)?.to_string();
            calls.lock().unwrap().push(tag.clone());
            std::thread::sleep(Duration::from_millis(2));
            calls.lock().unwrap().push(tag);
            Ok(RespValue::ok())
        });
        let (_server, addr) = start(server).await;

        const N: usize = 5;
        let client = |tag: &'static str| async move {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            let mut request = b"*1\r\n$5\r\nMULTI\r\n".to_vec();
            for _ in 0..N {
                request.extend_from_slice(
                    format!("*2\r\n$6\r\nrecord\r\n$1\r\n{}\r\n", tag).as_bytes(),
                );
            }
            request.extend_from_slice(b"*1\r\n$4\r\nEXEC\r\n");
            conn.write_all(&request).await.unwrap();

            let mut expected = b"+OK\r\n".to_vec();
            expected.extend(b"+QUEUED\r\n".repeat(N));
            expected.extend(format!("*{}\r\n", N).as_bytes());
            expected.extend(b"+OK\r\n".repeat(N));
            assert_eq!(read_exactly(&mut conn, expected.len()).await, expected);
        };

        tokio::join!(client("a"), client("b"));

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4 * N);
        let switches = log.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1, "EXEC batches interleaved: {:?}", *log);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_standalone_commands_bypass_exec_lock() {
        // `wait` blocks its worker thread, which can also stall the runtime
        // timer; synchronise with plain channels instead of tokio sleeps.
        let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let mut server = ping_server();

        server.handle("wait", move |_: &Request| {
            let _ = started_tx.send(());
            match release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5)) {
                Ok(()) => Ok(RespValue::ok()),
                Err(_) => Err(CommandError::msg("never released")),
            }
        });
        server.handle("release", move |_: &Request| {
            let _ = release_tx.send(());
            Ok(RespValue::ok())
        });
        let (_server, addr) = start(server).await;

        let mut tx_conn = TcpStream::connect(addr).await.unwrap();
        tx_conn
            .write_all(b"MULTI\r\nWAIT\r\nEXEC\r\n")
            .await
            .unwrap();
        tokio::task::spawn_blocking(move || started_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .expect("EXEC batch never started");

        // Runs while the batch above still holds the EXEC lock.
        let mut other = TcpStream::connect(addr).await.unwrap();
        other.write_all(b"RELEASE\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut other, 5).await, b"+OK\r\n");

        let expected = b"+OK\r\n+QUEUED\r\n*1\r\n+OK\r\n";
        assert_eq!(read_exactly(&mut tx_conn, expected.len()).await, expected);
    }

    #[test]
    fn test_handle_with_struct_handler() {
        struct Constant(i64);

        impl Handler for Constant {
            fn call(&self, _req: &Request) -> HandlerResult {
                Ok(RespValue::integer(self.0))
            }
        }

        let mut server = Server::new();
        server.handle_with("ANSWER", Constant(42));

        let reply = server.execute(&Request::new("answer", Vec::<bytes::Bytes>::new()));
        assert_eq!(reply, RespValue::integer(42));
        assert_eq!(server.stats()[0].name, "answer");
    }

    #[test]
    #[should_panic(expected = "empty name")]
    fn test_empty_command_name_panics() {
        Server::new().handle("", |_: &Request| Ok(RespValue::null()));
    }
}
