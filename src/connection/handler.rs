//! Per-Connection Dispatch Loop
//!
//! Each client gets one [`ConnectionHandler`], which owns the socket, the
//! read buffer, and the connection's [`Transaction`]. Nothing in here is
//! shared with other connections except the [`Server`] it borrows.
//!
//! ## Loop
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │ parse one frame from the buffer ──(incomplete)──> read   │
//!  │        │                                           │     │
//!  │        ▼                                     EOF / I/O ──┼──> close
//!  │ Request::try_from ──(malformed)──> "-ERR unknown command"│
//!  │        │                                                 │
//!  │        ▼                                                 │
//!  │   quit ───────────────────────────────────────────────── ┼──> close
//!  │   multi / exec ─────> Transaction                        │
//!  │   other, in MULTI ──> Transaction::queue                 │
//!  │   other ────────────> Server::execute                    │
//!  │        │                                                 │
//!  │        ▼                                                 │
//!  │ write + flush exactly one reply, loop                    │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A malformed request costs one error reply and the loop carries on. That
//! covers frames that parse but are not arrays of bulk strings, and bad
//! lines the parser can skip (a non-numeric length, invalid UTF-8 in an
//! inline command). Only bytes that leave no line boundary to resume from
//! end the connection.

use crate::commands::Request;
use crate::connection::ConnectionStats;
use crate::protocol::{ParseError, RespParser, RespValue};
use crate::server::Server;
use crate::transaction::{ExecOutcome, Transaction, TxState};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Reply to a frame that is valid RESP but not a command.
const MALFORMED_REQUEST: &str = "ERR unknown command";

/// One unit taken off the read buffer.
enum Incoming {
    Frame(RespValue),
    /// A bad line, already discarded from the buffer.
    Malformed(ParseError),
}

/// What the loop does after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Handles a single client connection.
pub struct ConnectionHandler<'a, S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
    parser: RespParser,
    transaction: Transaction,
    server: &'a Server,
}

impl<'a, S> ConnectionHandler<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, server: &'a Server) -> Self {
        server.connection_stats().connection_opened();

        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            transaction: Transaction::new(),
            server,
        }
    }

    /// Runs the loop until the client quits, hangs up, or the connection fails.
    ///
    /// `Ok(())` means the client sent QUIT. A plain hang-up is
    /// [`ConnectionError::ClientDisconnected`].
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!("Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!("Client quit"),
            Err(e) if e.is_disconnect() => debug!("Client disconnected"),
            Err(e) => warn!(error = %e, "Connection error"),
        }

        if self.transaction.is_active() {
            debug!(
                queued = self.transaction.queued().len(),
                "Discarding unfinished transaction"
            );
        }

        // Best effort: the peer may already be gone.
        let _ = self.stream.shutdown().await;
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(incoming) = self.try_parse_frame()? {
                let flow = match incoming {
                    Incoming::Frame(frame) => self.dispatch(frame).await?,
                    Incoming::Malformed(e) => {
                        warn!(error = %e, "Malformed request line");
                        self.reject().await?
                    }
                };
                if flow == Flow::Quit {
                    return Ok(());
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Handles one decoded frame and writes its reply.
    async fn dispatch(&mut self, frame: RespValue) -> Result<Flow, ConnectionError> {
        let req = match Request::try_from(frame) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "Malformed request");
                return self.reject().await;
            }
        };

        self.stats().command_processed();
        debug!(command = req.name(), args = req.args().len(), "Received request");

        let reply = match Control::of(&req) {
            Control::Quit => return Ok(Flow::Quit),
            Control::Multi => self.transaction.multi(&req),
            Control::Exec => self.exec(&req).await,
            Control::Command if self.transaction.is_active() => {
                let registered = self.server.registry().contains(req.name());
                self.transaction.queue(req, registered)
            }
            Control::Command => self.server.execute(&req),
        };

        self.send_response(&reply).await?;
        Ok(Flow::Continue)
    }

    async fn reject(&mut self) -> Result<Flow, ConnectionError> {
        self.send_response(&RespValue::error(MALFORMED_REQUEST))
            .await?;
        Ok(Flow::Continue)
    }

    async fn exec(&mut self, req: &Request) -> RespValue {
        let was_poisoned = self.transaction.state() == TxState::Poisoned;

        match self.transaction.exec(req) {
            ExecOutcome::Run(batch) => {
                debug!(commands = batch.len(), "Executing transaction");
                self.stats().transaction_executed();
                self.server.execute_batch(&batch).await
            }
            ExecOutcome::Reply(reply) => {
                if was_poisoned && !self.transaction.is_active() {
                    debug!("Transaction aborted");
                    self.stats().transaction_aborted();
                }
                reply
            }
        }
    }

    /// Attempts to take one complete frame, or one bad line, off the front
    /// of the buffer.
    fn try_parse_frame(&mut self) -> Result<Option<Incoming>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((value, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                Ok(Some(Incoming::Frame(value)))
            }
            Ok(None) => {
                trace!(buffered = self.buffer.len(), "Incomplete frame, need more data");
                Ok(None)
            }
            Err(e) => match self.parser.resync_point() {
                Some(skip) => {
                    let _ = self.buffer.split_to(skip);
                    Ok(Some(Incoming::Malformed(e)))
                }
                None => Err(ConnectionError::ParseError(e)),
            },
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= self.server.config().max_buffer_size {
            warn!(size = self.buffer.len(), "Buffer size limit exceeded");
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats().bytes_read(n);
        trace!(bytes = n, "Read data");
        Ok(())
    }

    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats().bytes_written(bytes.len());
        trace!(reply = %response, bytes = bytes.len(), "Sent reply");
        Ok(())
    }

    fn stats(&self) -> &ConnectionStats {
        self.server.connection_stats()
    }
}

impl<S> Drop for ConnectionHandler<'_, S> {
    fn drop(&mut self) {
        self.server.connection_stats().connection_closed();
    }
}

/// The commands the loop handles itself.
enum Control {
    Quit,
    Multi,
    Exec,
    Command,
}

impl Control {
    fn of(req: &Request) -> Self {
        match req.name() {
            "quit" => Control::Quit,
            "multi" => Control::Multi,
            "exec" => Control::Exec,
            _ => Control::Command,
        }
    }
}

/// Why a connection ended.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The byte stream could not be resynchronised
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Clean EOF between requests
    #[error("Client disconnected")]
    ClientDisconnected,

    /// EOF in the middle of a request
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

impl ConnectionError {
    /// True when the client simply went away; such endings are not reported
    /// as failures.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::ClientDisconnected => true,
            ConnectionError::IoError(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
            _ => false,
        }
    }
}
