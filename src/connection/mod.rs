//! Per-client connection handling.
//!
//! The server spawns one [`ConnectionHandler`] task per accepted socket,
//! and holds a worker slot for as long as that task runs. The handler reads
//! one request, executes it, writes one reply, and repeats.
//!
//! ```text
//!   socket ──> RespReader ──> CommandHandler ──> write_value ──> socket
//!                  │                 │
//!         protocol error     command error / panic
//!                  └────────┬────────┘
//!                           ▼
//!                  error reply, keep reading
//! ```
//!
//! The connection ends only on a disconnect, an idle timeout or an I/O
//! failure. [`ConnectionStats`] is shared by every handler of one server.

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, INTERNAL_ERROR,
};
