//! Async client for EmberKV.
//!
//! A thin request/response wrapper: every call writes one request array and
//! reads exactly one reply from the same connection.
//!
//! ```no_run
//! use emberkv::client::Client;
//! use emberkv::protocol::Value;
//!
//! # async fn demo() -> Result<(), emberkv::client::ClientError> {
//! let mut client = Client::connect("127.0.0.1:31337").await?;
//! client.set("name", "Ariz").await?;
//! assert_eq!(client.get("name").await?, Value::text("Ariz"));
//! # Ok(())
//! # }
//! ```

use crate::protocol::{write_value, DecodeError, ProtocolError, RespReader, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::io::BufWriter;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

/// Default time allowed for connecting and for each request.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an error reply
    #[error("{0}")]
    Command(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<DecodeError> for ClientError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Disconnect => ClientError::Closed,
            DecodeError::Protocol(e) => ClientError::Protocol(e),
            DecodeError::Io(e) => ClientError::Io(e),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A single connection to an EmberKV server.
#[derive(Debug)]
pub struct Client {
    reader: RespReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    timeout: Duration,
}

impl Client {
    /// Connects with [`DEFAULT_CLIENT_TIMEOUT`].
    pub async fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        Self::with_timeout(addr, DEFAULT_CLIENT_TIMEOUT).await
    }

    /// Connects, applying `limit` to the connect and to every request.
    pub async fn with_timeout(addr: impl ToSocketAddrs, limit: Duration) -> ClientResult<Self> {
        let stream = timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(limit))??;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: RespReader::new(read_half),
            writer: BufWriter::new(write_half),
            timeout: limit,
        })
    }

    /// Sends `args` as one request array and returns the reply.
    ///
    /// An error reply is returned as [`ClientError::Command`].
    pub async fn execute(&mut self, args: Vec<Value>) -> ClientResult<Value> {
        let request = Value::array(args);
        let limit = self.timeout;

        let reply = timeout(limit, async {
            write_value(&mut self.writer, &request).await?;
            Ok::<_, ClientError>(self.reader.read_value().await?)
        })
        .await
        .map_err(|_| ClientError::Timeout(limit))??;

        match reply {
            Value::Error(message) => Err(ClientError::Command(message)),
            other => Ok(other),
        }
    }

    pub async fn get(&mut self, key: &str) -> ClientResult<Value> {
        self.execute(vec![Value::text("GET"), Value::text(key)]).await
    }

    /// Returns the server's reply: `1` if stored.
    pub async fn set(&mut self, key: &str, value: impl Into<Value>) -> ClientResult<Value> {
        self.execute(vec![Value::text("SET"), Value::text(key), value.into()])
            .await
    }

    pub async fn delete(&mut self, key: &str) -> ClientResult<Value> {
        self.execute(vec![Value::text("DELETE"), Value::text(key)])
            .await
    }

    pub async fn flush(&mut self) -> ClientResult<Value> {
        self.execute(vec![Value::text("FLUSH")]).await
    }

    pub async fn mget(&mut self, keys: &[&str]) -> ClientResult<Value> {
        let mut args = Vec::with_capacity(keys.len() + 1);
        args.push(Value::text("MGET"));
        args.extend(keys.iter().map(|k| Value::text(*k)));
        self.execute(args).await
    }

    /// Sets several pairs at once. Returns the number of pairs stored.
    pub async fn mset<V: Into<Value>>(
        &mut self,
        pairs: impl IntoIterator<Item = (String, V)>,
    ) -> ClientResult<Value> {
        let mut args = vec![Value::text("MSET")];
        for (key, value) in pairs {
            args.push(Value::Text(key));
            args.push(value.into());
        }
        self.execute(args).await
    }
}
