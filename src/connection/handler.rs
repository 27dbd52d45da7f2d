//! The read-execute-reply loop for one client.
//!
//! Each pass reads one value under the idle timer, runs it through the
//! [`CommandHandler`] and writes the reply as a single flushed write. The
//! next request is not read until that reply is out, so replies always come
//! back in request order.
//!
//! Failures split in two groups:
//!
//! | Failure | Reply | Connection |
//! |---|---|---|
//! | malformed frame | error reply | kept |
//! | command or storage error | error reply | kept |
//! | panic while executing | `Internal server error` | kept |
//! | peer disconnect | none | closed |
//! | idle timeout, I/O error | none | closed |

use crate::commands::CommandHandler;
use crate::protocol::{write_value, DecodeError, RespReader, Value};
use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufWriter;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Reply sent when a command fails in an unexpected way.
pub const INTERNAL_ERROR: &str = "Internal server error";

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Malformed frames received
    pub protocol_errors: AtomicU64,
    /// Commands answered with an error reply
    pub command_errors: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_error(&self) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// Decoder over the read half of the socket
    reader: RespReader<OwnedReadHalf>,

    /// Buffered write half of the socket
    writer: BufWriter<OwnedWriteHalf>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// The command handler (shared store behind it)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// How long a read or write may wait before the connection is dropped
    idle_timeout: Duration,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        idle_timeout: Duration,
    ) -> Self {
        stats.connection_opened();
        let (read_half, write_half) = stream.into_split();

        Self {
            reader: RespReader::new(read_half),
            writer: BufWriter::new(write_half),
            addr,
            command_handler,
            stats,
            idle_timeout,
        }
    }

    /// Runs the connection loop until the client goes away.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::IdleTimeout(t)) => {
                info!(client = %self.addr, timeout = ?t, "Closing idle connection")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let read = timeout(self.idle_timeout, self.reader.read_value()).await;
            let request = match read {
                Err(_) => return Err(ConnectionError::IdleTimeout(self.idle_timeout)),
                Ok(Err(DecodeError::Disconnect)) => return Ok(()),
                Ok(Err(DecodeError::Io(e))) => return Err(e.into()),
                Ok(Err(DecodeError::Protocol(e))) => {
                    warn!(client = %self.addr, error = %e, "Protocol error");
                    self.stats.protocol_error();
                    self.send_response(&Value::error(e.to_string())).await?;
                    continue;
                }
                Ok(Ok(request)) => request,
            };

            let response = self.execute(request);
            self.stats.command_processed();
            self.send_response(&response).await?;
        }
    }

    /// Executes one request, turning every failure into an error reply.
    fn execute(&self, request: Value) -> Value {
        let handler = &self.command_handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler.execute(request))) {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(client = %self.addr, error = %e, "Command error");
                self.stats.command_error();
                Value::error(e.to_string())
            }
            Err(payload) => {
                error!(
                    client = %self.addr,
                    panic = panic_message(payload.as_ref()),
                    "Unexpected error while executing command"
                );
                self.stats.command_error();
                Value::error(INTERNAL_ERROR)
            }
        }
    }

    /// Sends a reply to the client as one write followed by a flush.
    async fn send_response(&mut self, response: &Value) -> Result<(), ConnectionError> {
        let written = timeout(self.idle_timeout, write_value(&mut self.writer, response))
            .await
            .map_err(|_| ConnectionError::WriteTimeout)??;

        self.stats.bytes_written(written);
        trace!(client = %self.addr, bytes = written, "Sent response");
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No complete request arrived within the idle timeout
    #[error("idle for more than {0:?}")]
    IdleTimeout(Duration),

    /// A reply could not be written within the timeout
    #[error("timed out writing response")]
    WriteTimeout,
}

/// Handles a client connection.
///
/// Creates a [`ConnectionHandler`] and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    idle_timeout: Duration,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, idle_timeout);
    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Connection ended with error");
    }
}
