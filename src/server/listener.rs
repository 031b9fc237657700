//! Listener abstraction
//!
//! [`super::Server::serve`] accepts from anything implementing [`Listener`]:
//! a plain tokio `TcpListener`, a `UnixListener`, or a
//! [`KeepAliveListener`] that turns on TCP keep-alive for every accepted
//! socket so half-open peers are eventually dropped by the kernel.

use socket2::{SockRef, TcpKeepalive};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

/// A source of client streams.
///
/// An `Err` from `accept` is treated as fatal: `serve` stops and returns it.
pub trait Listener: Send {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    type Addr: fmt::Debug + Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, Self::Addr)>> + Send;
}

impl Listener for TcpListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, Self::Addr)>> + Send {
        TcpListener::accept(self)
    }
}

#[cfg(unix)]
impl Listener for tokio::net::UnixListener {
    type Io = tokio::net::UnixStream;
    type Addr = tokio::net::unix::SocketAddr;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, Self::Addr)>> + Send {
        tokio::net::UnixListener::accept(self)
    }
}

/// A TCP listener that enables keep-alive probing on accepted sockets.
#[derive(Debug)]
pub struct KeepAliveListener {
    inner: TcpListener,
    period: Duration,
}

impl KeepAliveListener {
    pub fn new(inner: TcpListener, period: Duration) -> Self {
        Self { inner, period }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Listener for KeepAliveListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, Self::Addr)>> + Send {
        async move {
            let (stream, addr) = self.inner.accept().await?;

            let keepalive = TcpKeepalive::new().with_time(self.period);
            // Keep retrying at the same period once the connection is idle.
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            let keepalive = keepalive.with_interval(self.period);

            // A socket we cannot tune is still a usable connection.
            if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                warn!(client = %addr, error = %e, "Failed to enable TCP keep-alive");
            }

            Ok((stream, addr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keepalive_is_enabled_on_accept() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut listener = KeepAliveListener::new(listener, Duration::from_secs(180));
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();

        assert!(SockRef::from(&stream).keepalive().unwrap());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_keepalive_interval_matches_period() {
        let period = Duration::from_secs(45);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut listener = KeepAliveListener::new(listener, period);
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let socket = SockRef::from(&stream);

        assert_eq!(socket.keepalive_time().unwrap(), period);
        assert_eq!(socket.keepalive_interval().unwrap(), period);
    }

    #[tokio::test]
    async fn test_plain_listener_accepts() {
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (_stream, peer) = Listener::accept(&mut listener).await.unwrap();

        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_listener_accepts() {
        use tokio::net::{UnixListener, UnixStream};

        let path = std::env::temp_dir().join(format!("resp-dispatch-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut listener = UnixListener::bind(&path).unwrap();

        let _client = UnixStream::connect(&path).await.unwrap();
        let accepted = Listener::accept(&mut listener).await;
        let _ = std::fs::remove_file(&path);

        assert!(accepted.is_ok());
    }
}
