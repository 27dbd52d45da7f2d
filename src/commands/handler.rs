//! Command Handler Module
//!
//! This module turns decoded requests into store operations.
//!
//! ## Request Shapes
//!
//! - An array whose first element is the command name, followed by the
//!   positional arguments: `["SET", "key", "value"]`
//! - A single text value, split on whitespace: `"GET key"`
//!
//! Command names are case-insensitive.
//!
//! ## Supported Commands
//!
//! - `GET key` - Value or null
//! - `SET key value` - `1` if stored
//! - `DELETE key` - `1` if removed, `0` otherwise
//! - `FLUSH` - Number of keys removed
//! - `MGET key [key ...]` - Values in request order, null for missing keys
//! - `MSET key value [key value ...]` - Number of pairs stored
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  execute()  │───>│ dispatch()  │───>│   cmd_*()   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                        KeyValueStore        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::Value;
use crate::storage::{KeyValueStore, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A request-level failure, reported to the client as an error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Request must be list or simple string")]
    InvalidRequest,

    #[error("Missing command")]
    MissingCommand,

    #[error("Invalid command name")]
    InvalidCommandName,

    #[error("Unrecognized command: {0}")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("Invalid key")]
    InvalidKey,

    #[error("MSET requires pairs of key/value arguments")]
    UnpairedArguments,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Dispatches requests to the storage engine.
///
/// Cheap to clone: every connection gets its own handle onto the same store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<KeyValueStore>,
}

impl CommandHandler {
    /// Creates a new command handler with the given store.
    pub fn new(storage: Arc<KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Executes a request and returns the reply value.
    ///
    /// # Errors
    ///
    /// Any [`CommandError`]; the caller turns it into an error reply.
    pub fn execute(&self, request: Value) -> Result<Value, CommandError> {
        let mut args = match request {
            Value::Array(args) => args,
            Value::Text(line) => line.split_whitespace().map(Value::text).collect(),
            _ => return Err(CommandError::InvalidRequest),
        };

        if args.is_empty() {
            return Err(CommandError::MissingCommand);
        }

        let cmd_name = match args.remove(0) {
            Value::Text(s) => s.to_uppercase(),
            _ => return Err(CommandError::InvalidCommandName),
        };

        debug!(command = %cmd_name, args = args.len(), "Received command");
        self.dispatch(&cmd_name, args)
    }

    /// Dispatches a command to its handler.
    fn dispatch(&self, cmd: &str, args: Vec<Value>) -> Result<Value, CommandError> {
        match cmd {
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "DELETE" => self.cmd_delete(args),
            "FLUSH" => self.cmd_flush(args),
            "MGET" => self.cmd_mget(args),
            "MSET" => self.cmd_mset(args),
            _ => Err(CommandError::UnknownCommand(cmd.to_string())),
        }
    }

    /// GET key
    fn cmd_get(&self, args: Vec<Value>) -> Result<Value, CommandError> {
        let [key] = exact_args::<1>(args, "GET")?;
        let key = key_text(key)?;
        Ok(self.storage.get(&key).unwrap_or(Value::Null))
    }

    /// SET key value
    fn cmd_set(&self, args: Vec<Value>) -> Result<Value, CommandError> {
        let [key, value] = exact_args::<2>(args, "SET")?;
        let stored = self.storage.set(key_text(key)?, value)?;
        Ok(Value::integer(stored as i64))
    }

    /// DELETE key
    fn cmd_delete(&self, args: Vec<Value>) -> Result<Value, CommandError> {
        let [key] = exact_args::<1>(args, "DELETE")?;
        let removed = self.storage.delete(&key_text(key)?);
        Ok(Value::integer(removed as i64))
    }

    /// FLUSH
    fn cmd_flush(&self, args: Vec<Value>) -> Result<Value, CommandError> {
        let [] = exact_args::<0>(args, "FLUSH")?;
        Ok(Value::integer(self.storage.flush() as i64))
    }

    /// MGET key [key ...]
    fn cmd_mget(&self, args: Vec<Value>) -> Result<Value, CommandError> {
        let values = args
            .into_iter()
            .map(|key| Ok(self.storage.get(&key_text(key)?).unwrap_or(Value::Null)))
            .collect::<Result<Vec<_>, CommandError>>()?;
        Ok(Value::array(values))
    }

    /// MSET key value [key value ...]
    ///
    /// Pairs are stored in order. A storage failure stops the command;
    /// pairs stored before it stay stored.
    fn cmd_mset(&self, args: Vec<Value>) -> Result<Value, CommandError> {
        if args.len() % 2 != 0 {
            return Err(CommandError::UnpairedArguments);
        }

        let mut stored = 0i64;
        let mut iter = args.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            if self.storage.set(key_text(key)?, value)? {
                stored += 1;
            }
        }

        Ok(Value::integer(stored))
    }
}

/// Checks the argument count and hands back the arguments by value.
fn exact_args<const N: usize>(
    args: Vec<Value>,
    cmd: &'static str,
) -> Result<[Value; N], CommandError> {
    args.try_into().map_err(|_| CommandError::WrongArity(cmd))
}

/// Converts a key argument to text. Numbers are accepted by their rendering.
fn key_text(value: Value) -> Result<String, CommandError> {
    match value {
        Value::Text(s) => Ok(s),
        Value::Integer(_) | Value::Float(_) => Ok(value.to_string()),
        _ => Err(CommandError::InvalidKey),
    }
}
