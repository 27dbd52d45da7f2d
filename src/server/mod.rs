//! TCP Server
//!
//! This module owns the listener, the store and the worker pool, and runs
//! the accept loop.
//!
//! ## Worker Pool
//!
//! A semaphore with `max_clients` permits bounds how many connections are
//! served at once. The accept loop takes a permit *before* accepting, so a
//! client beyond capacity waits in the listen backlog until a running
//! connection ends. Nobody is turned away.
//!
//! ```text
//!   acquire permit ──> accept() ──> spawn handler ──> ... ──> drop permit
//!        ▲                                                        │
//!        └────────────────────────────────────────────────────────┘
//! ```

pub mod config;

pub use config::ServerConfig;

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::KeyValueStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// A bound EmberKV server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    storage: Arc<KeyValueStore>,
    stats: Arc<ConnectionStats>,
    workers: Arc<Semaphore>,
}

impl Server {
    /// Creates the store and binds the listener.
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        let storage = Arc::new(KeyValueStore::new(config.max_memory_mb));
        let workers = Arc::new(Semaphore::new(config.max_clients));

        info!(
            addr = %listener.local_addr()?,
            max_clients = config.max_clients,
            max_memory_mb = config.max_memory_mb,
            idle_timeout = ?config.idle_timeout,
            "Server bound"
        );

        Ok(Self {
            config,
            listener,
            storage,
            stats: Arc::new(ConnectionStats::new()),
            workers,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The store shared by all connections.
    pub fn storage(&self) -> Arc<KeyValueStore> {
        Arc::clone(&self.storage)
    }

    /// Connection statistics.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Serves connections forever.
    pub async fn run(self) {
        self.accept_loop().await
    }

    /// Serves connections until `shutdown` completes.
    ///
    /// Connections still open at that point are left to finish on their own
    /// tasks.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        tokio::select! {
            _ = self.accept_loop() => {}
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
            }
        }

        let storage = self.storage.stats();
        info!(
            connections = self.stats.connections_accepted.load(Ordering::Relaxed),
            commands = self.stats.commands_processed.load(Ordering::Relaxed),
            keys = storage.keys,
            used_memory = storage.used_memory,
            evicted = storage.evicted,
            "Server stopped"
        );
    }

    /// Main loop that accepts incoming connections
    async fn accept_loop(&self) {
        loop {
            if self.workers.available_permits() == 0 {
                debug!("Worker pool full, waiting for a free slot");
            }
            let permit = match Arc::clone(&self.workers).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let handler = CommandHandler::new(Arc::clone(&self.storage));
                    let stats = Arc::clone(&self.stats);
                    let idle_timeout = self.config.idle_timeout;

                    tokio::spawn(async move {
                        handle_connection(stream, addr, handler, stats, idle_timeout).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RespReader, Value};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn test_config(max_clients: usize) -> ServerConfig {
        ServerConfig {
            port: 0,
            max_clients,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_and_serve() {
        let server = Server::bind(test_config(4)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let storage = server.storage();
        tokio::spawn(server.run());

        let (read_half, mut write_half) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut reader = RespReader::new(read_half);

        write_half.write_all(b"+SET a 1\r\n").await.unwrap();
        assert_eq!(reader.read_value().await.unwrap(), Value::integer(1));
        assert_eq!(storage.get("a"), Some(Value::text("1")));
    }

    #[tokio::test]
    async fn test_full_pool_delays_new_connection() {
        let server = Server::bind(test_config(1)).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let first = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The second connection completes its handshake in the backlog
        // but is not served while the first one holds the only slot
        let (read_half, mut write_half) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut reader = RespReader::new(read_half);
        write_half.write_all(b"+GET k\r\n").await.unwrap();

        let early = tokio::time::timeout(Duration::from_millis(200), reader.read_value()).await;
        assert!(early.is_err(), "second client was served while pool was full");

        drop(first);

        let reply = tokio::time::timeout(Duration::from_secs(5), reader.read_value())
            .await
            .expect("second client should be served once a slot frees")
            .unwrap();
        assert_eq!(reply, Value::Null);
    }

    #[tokio::test]
    async fn test_run_until_stops_accepting() {
        let server = Server::bind(test_config(4)).await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server should stop after shutdown signal")
            .unwrap();
    }
}
