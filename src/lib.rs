//! # EmberKV - A Small In-Memory Key-Value Store
//!
//! EmberKV keeps typed values in memory under a fixed memory budget and
//! serves them over a binary-safe, RESP-style wire protocol.
//!
//! ## Features
//!
//! - **Typed Values**: Text, binary, integers, floats, nulls, and nested
//!   arrays and maps travel over the wire and are stored as-is
//! - **Memory Budget**: Writes that overflow the budget evict the oldest
//!   writes first
//! - **Bounded Concurrency**: A fixed pool of worker slots, one per connection
//! - **Error Isolation**: A bad request gets an error reply; the connection
//!   stays usable
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              EmberKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Semaphore) │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────────┐ │
//! │                     │ RespReader/ │    │        KeyValueStore         │ │
//! │                     │ Value codec │    │  Mutex<map + write order>    │ │
//! │                     └─────────────┘    └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use emberkv::server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `GET key`
//! - `SET key value`
//! - `DELETE key`
//! - `FLUSH`
//! - `MGET key [key ...]`
//! - `MSET key value [key value ...]`
//!
//! ## Module Overview
//!
//! - [`protocol`]: Value type, encoder and streaming decoder
//! - [`storage`]: Memory-bounded store with oldest-write eviction
//! - [`commands`]: Request validation and dispatch
//! - [`connection`]: Per-client read-execute-reply loop
//! - [`server`]: Listener, worker pool and configuration
//! - [`client`]: Async client library

pub mod client;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use commands::{CommandError, CommandHandler};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{DecodeError, ProtocolError, RespReader, Value};
pub use server::{Server, ServerConfig};
pub use storage::{KeyValueStore, StorageError};

/// The default port EmberKV listens on
pub const DEFAULT_PORT: u16 = 31337;

/// The default host EmberKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default size of the worker pool
pub const DEFAULT_MAX_CLIENTS: usize = 64;

/// Default idle timeout for a connection, in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
