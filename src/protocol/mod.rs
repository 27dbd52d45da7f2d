//! Wire Protocol Implementation
//!
//! This module implements the binary-safe protocol spoken between EmberKV
//! clients and the server. It is a close relative of RESP with one extra
//! frame type, `%` maps.
//!
//! ## Modules
//!
//! - `types`: Defines the `Value` enum and its encoding
//! - `parser`: Streaming decoder reading values from an async stream
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{decode, Value};
//!
//! # tokio_test::block_on(async {
//! // Decoding incoming data
//! let request = decode(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").await.unwrap();
//! assert_eq!(request.as_array().map(|a| a.len()), Some(2));
//!
//! // Creating replies
//! let reply = Value::integer(1);
//! assert_eq!(reply.encode(), b":1\r\n");
//! # });
//! ```

pub mod parser;
pub mod types;

pub use parser::{
    decode, write_value, DecodeError, DecodeResult, ProtocolError, RespReader, MAX_BULK_SIZE,
    MAX_LINE_LEN, MAX_NESTING_DEPTH,
};
pub use types::Value;
