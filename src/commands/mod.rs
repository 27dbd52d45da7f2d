//! Request dispatch.
//!
//! [`CommandHandler`] checks the shape of a decoded request, picks the
//! command by name and runs it against the shared
//! [`KeyValueStore`](crate::storage::KeyValueStore). Every failure comes back
//! as a [`CommandError`], which the connection turns into an error reply.
//!
//! Commands: `GET`, `SET`, `DELETE`, `FLUSH`, `MGET`, `MSET`.

pub mod handler;

pub use handler::{CommandError, CommandHandler};
