//! Streaming Protocol Decoder
//!
//! This module reads [`Value`]s straight off a byte stream. Each frame is
//! pulled through a buffered reader one header line at a time, so a request
//! is decoded as soon as its last byte arrives and nothing is read past it.
//!
//! ## How the Decoder Works
//!
//! [`RespReader::read_value`] returns either:
//! - `Ok(value)` - A complete frame was decoded
//! - `Err(DecodeError::Disconnect)` - The stream ended before a frame began
//! - `Err(DecodeError::Protocol(_))` - The frame is malformed
//! - `Err(DecodeError::Io(_))` - The underlying stream failed
//!
//! A protocol error leaves the reader usable: the caller can report the
//! error and keep reading the next frame from the same stream.
//!
//! ## Limits
//!
//! - Header lines are at most [`MAX_LINE_LEN`] bytes
//! - Bulk payloads are at most [`MAX_BULK_SIZE`] bytes
//! - Arrays and maps nest at most [`MAX_NESTING_DEPTH`] levels

use crate::protocol::types::{prefix, Value, CRLF};
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Malformed frame data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Unknown type prefix byte
    #[error("invalid first byte: '{}'", .0.escape_ascii())]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Length or count header that is not a number, or is below -1
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The stream ended inside a bulk payload
    #[error("failed to read complete string")]
    IncompleteString,

    /// A bulk payload not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// The stream ended inside a header line
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// A bulk payload above [`MAX_BULK_SIZE`]
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A header line with no LF within [`MAX_LINE_LEN`] bytes
    #[error("line too long (max: {0} bytes)")]
    LineTooLong(usize),

    /// Arrays or maps nested deeper than [`MAX_NESTING_DEPTH`]
    #[error("maximum nesting depth exceeded: {0}")]
    NestingTooDeep(usize),
}

/// Everything that can stop [`RespReader::read_value`] from producing a value.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The peer closed the stream before a new frame started
    #[error("client disconnected")]
    Disconnect,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Maximum size for a single bulk payload (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of a header line, terminator included (64 KB)
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Maximum array/map nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 128;

/// Upper bound on capacity reserved up front from a declared element count.
const MAX_PREALLOC: usize = 1024;

/// Read buffer capacity
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A decoder reading protocol values from an async byte stream.
///
/// # Example
///
/// ```
/// use emberkv::protocol::{RespReader, Value};
///
/// # tokio_test::block_on(async {
/// let mut reader = RespReader::new(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
/// let value = reader.read_value().await.unwrap();
/// assert_eq!(value, Value::array(vec![Value::text("GET"), Value::text("name")]));
/// # });
/// ```
#[derive(Debug)]
pub struct RespReader<R> {
    inner: BufReader<R>,
}

impl<R> RespReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Creates a new decoder over `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
        }
    }

    /// Gets a mutable reference to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    /// Reads one complete value from the stream.
    ///
    /// Arrays and maps are decoded recursively; every element is itself a
    /// full frame of any type.
    pub fn read_value(&mut self) -> Pin<Box<dyn Future<Output = DecodeResult<Value>> + Send + '_>> {
        self.read_nested(0)
    }

    /// Reads one value found inside `depth` enclosing arrays or maps.
    fn read_nested(
        &mut self,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = DecodeResult<Value>> + Send + '_>> {
        Box::pin(async move {
            let tag = match self.read_tag().await? {
                Some(tag) => tag,
                None => return Err(DecodeError::Disconnect),
            };

            match tag {
                prefix::SIMPLE_STRING => Ok(Value::Text(self.read_text_line().await?)),
                prefix::ERROR => Ok(Value::Error(self.read_text_line().await?)),
                prefix::INTEGER => self.read_integer().await,
                prefix::BULK_STRING => self.read_bulk().await,
                prefix::ARRAY | prefix::MAP if depth >= MAX_NESTING_DEPTH => {
                    self.skip_line().await?;
                    Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH).into())
                }
                prefix::ARRAY => self.read_array(depth + 1).await,
                prefix::MAP => self.read_map(depth + 1).await,
                other => {
                    self.skip_line().await?;
                    Err(ProtocolError::UnknownPrefix(other).into())
                }
            }
        })
    }

    /// Reads the type prefix byte. `None` means the stream is closed.
    async fn read_tag(&mut self) -> DecodeResult<Option<u8>> {
        let buf = self.inner.fill_buf().await?;
        let tag = match buf.first() {
            Some(&b) => b,
            None => return Ok(None),
        };
        self.inner.consume(1);
        Ok(Some(tag))
    }

    /// Reads a header line and strips its line terminator.
    async fn read_line(&mut self) -> DecodeResult<Vec<u8>> {
        let mut line = Vec::new();
        (&mut self.inner)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut line)
            .await?;

        if line.last() != Some(&b'\n') {
            if line.len() >= MAX_LINE_LEN {
                self.skip_line().await?;
                return Err(ProtocolError::LineTooLong(MAX_LINE_LEN).into());
            }
            return Err(ProtocolError::UnexpectedEof.into());
        }
        while matches!(line.last(), Some(b'\r') | Some(b'\n')) {
            line.pop();
        }

        Ok(line)
    }

    async fn read_text_line(&mut self) -> DecodeResult<String> {
        let line = self.read_line().await?;
        String::from_utf8(line).map_err(|e| ProtocolError::InvalidUtf8(e.to_string()).into())
    }

    /// Reads a length or count header. Values below -1 are rejected.
    async fn read_length(&mut self) -> DecodeResult<i64> {
        let line = self.read_line().await?;
        let text = String::from_utf8_lossy(&line);
        let length: i64 = text
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidLength(text.to_string()))?;

        if length < -1 {
            return Err(ProtocolError::InvalidLength(length.to_string()).into());
        }
        Ok(length)
    }

    /// Parses an integer: `:<integer>\r\n`
    async fn read_integer(&mut self) -> DecodeResult<Value> {
        let line = self.read_line().await?;
        let text = String::from_utf8_lossy(&line);
        let n: i64 = text
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidInteger(text.to_string()))?;
        Ok(Value::Integer(n))
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    async fn read_bulk(&mut self) -> DecodeResult<Value> {
        let length = self.read_length().await?;
        if length == -1 {
            return Ok(Value::Null);
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            }
            .into());
        }

        // The buffer grows with the data actually received, not with the
        // declared length.
        let wanted = length + CRLF.len();
        let mut data = Vec::with_capacity(wanted.min(READ_BUFFER_SIZE));
        (&mut self.inner)
            .take(wanted as u64)
            .read_to_end(&mut data)
            .await?;

        if data.len() != wanted {
            return Err(ProtocolError::IncompleteString.into());
        }
        if &data[length..] != CRLF {
            return Err(ProtocolError::MissingCrlf.into());
        }
        data.truncate(length);

        match String::from_utf8(data) {
            Ok(s) => Ok(Value::Text(s)),
            Err(e) => Ok(Value::Binary(Bytes::from(e.into_bytes()))),
        }
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    async fn read_array(&mut self, depth: usize) -> DecodeResult<Value> {
        let count = self.read_length().await?;
        if count == -1 {
            return Ok(Value::Null);
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let element = self.read_nested(depth).await?;
            elements.push(element.into_text_if_utf8());
        }

        Ok(Value::Array(elements))
    }

    /// Parses a map: `%<pairs>\r\n<key><value>...`
    ///
    /// Keys become text through their rendering. A repeated key keeps its
    /// first position and takes the last value.
    async fn read_map(&mut self, depth: usize) -> DecodeResult<Value> {
        let count = self.read_length().await?;
        if count == -1 {
            return Ok(Value::Null);
        }

        let count = count as usize;
        let mut pairs: Vec<(String, Value)> = Vec::with_capacity(count.min(MAX_PREALLOC));
        let mut index: HashMap<String, usize> = HashMap::new();

        for _ in 0..count {
            let key = self.read_nested(depth).await?.to_string();
            let value = self.read_nested(depth).await?;

            match index.get(&key) {
                Some(&pos) => pairs[pos].1 = value,
                None => {
                    index.insert(key.clone(), pairs.len());
                    pairs.push((key, value));
                }
            }
        }

        Ok(Value::Map(pairs))
    }

    /// Consumes input up to and including the next LF.
    ///
    /// Used after a bad header so that the next read starts on a fresh line.
    /// Nothing is kept, so an endless line costs no memory.
    async fn skip_line(&mut self) -> DecodeResult<()> {
        loop {
            let (used, found) = {
                let buf = self.inner.fill_buf().await?;
                if buf.is_empty() {
                    return Ok(());
                }
                match buf.iter().position(|&b| b == b'\n') {
                    Some(pos) => (pos + 1, true),
                    None => (buf.len(), false),
                }
            };
            self.inner.consume(used);
            if found {
                return Ok(());
            }
        }
    }
}

/// Encodes `value` and writes it to `writer` as a single buffered write,
/// followed by a flush.
pub async fn write_value<W>(writer: &mut W, value: &Value) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let bytes = value.encode();
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(bytes.len())
}

/// Helper to decode a single value from an in-memory buffer.
pub async fn decode(buf: &[u8]) -> DecodeResult<Value> {
    RespReader::new(buf).read_value().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_parse_simple_string() {
        assert_eq!(decode(b"+OK\r\n").await.unwrap(), Value::text("OK"));
    }

    #[tokio::test]
    async fn test_parse_error() {
        let value = decode(b"-ERR unknown command\r\n").await.unwrap();
        assert_eq!(value, Value::error("ERR unknown command"));
    }

    #[tokio::test]
    async fn test_parse_integer() {
        assert_eq!(decode(b":123\r\n").await.unwrap(), Value::integer(123));
        assert_eq!(decode(b":-42\r\n").await.unwrap(), Value::integer(-42));
    }

    #[tokio::test]
    async fn test_parse_invalid_integer() {
        let result = decode(b":not_a_number\r\n").await;
        assert!(matches!(
            result,
            Err(DecodeError::Protocol(ProtocolError::InvalidInteger(_)))
        ));
    }

    #[tokio::test]
    async fn test_parse_bulk_string() {
        assert_eq!(decode(b"$5\r\nhello\r\n").await.unwrap(), Value::text("hello"));
    }

    #[tokio::test]
    async fn test_parse_null_bulk_string() {
        assert_eq!(decode(b"$-1\r\n").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_parse_empty_bulk_string() {
        assert_eq!(decode(b"$0\r\n\r\n").await.unwrap(), Value::text(""));
    }

    #[tokio::test]
    async fn test_binary_safe_bulk_string() {
        let value = decode(b"$3\r\n\xff\x00a\r\n").await.unwrap();
        assert_eq!(value, Value::binary(Bytes::from_static(b"\xff\x00a")));
    }

    #[tokio::test]
    async fn test_bulk_string_with_crlf_inside() {
        let value = decode(b"$4\r\na\r\nb\r\n").await.unwrap();
        assert_eq!(value, Value::text("a\r\nb"));
    }

    #[tokio::test]
    async fn test_truncated_bulk_string() {
        let result = decode(b"$10\r\nhello").await;
        assert!(matches!(
            result,
            Err(DecodeError::Protocol(ProtocolError::IncompleteString))
        ));
    }

    #[tokio::test]
    async fn test_bulk_length_not_a_number() {
        let result = decode(b"$abc\r\n").await;
        assert!(matches!(
            result,
            Err(DecodeError::Protocol(ProtocolError::InvalidLength(_)))
        ));
    }

    #[tokio::test]
    async fn test_bulk_length_below_minus_one() {
        let result = decode(b"$-5\r\n").await;
        assert!(matches!(
            result,
            Err(DecodeError::Protocol(ProtocolError::InvalidLength(_)))
        ));
    }

    #[tokio::test]
    async fn test_bulk_too_large() {
        let header = format!("${}\r\n", MAX_BULK_SIZE + 1);
        let result = decode(header.as_bytes()).await;
        assert!(matches!(
            result,
            Err(DecodeError::Protocol(ProtocolError::MessageTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn test_parse_array() {
        let value = decode(b"*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n").await.unwrap();
        assert_eq!(
            value,
            Value::array(vec![Value::text("hello"), Value::text("world")])
        );
    }

    #[tokio::test]
    async fn test_parse_null_and_empty_array() {
        assert_eq!(decode(b"*-1\r\n").await.unwrap(), Value::Null);
        assert_eq!(decode(b"*0\r\n").await.unwrap(), Value::array(vec![]));
    }

    #[tokio::test]
    async fn test_parse_nested_mixed_array() {
        let input = b"*3\r\n:1\r\n*2\r\n+two\r\n$-1\r\n%1\r\n$1\r\nk\r\n:3\r\n";
        let value = decode(input).await.unwrap();
        assert_eq!(
            value,
            Value::array(vec![
                Value::integer(1),
                Value::array(vec![Value::text("two"), Value::Null]),
                Value::map([("k", Value::integer(3))]),
            ])
        );
    }

    #[tokio::test]
    async fn test_parse_map_keeps_pair_order() {
        let input = b"%2\r\n$3\r\nkey\r\n$5\r\nvalue\r\n$4\r\nkey2\r\n$6\r\nvalue2\r\n";
        let value = decode(input).await.unwrap();
        assert_eq!(
            value,
            Value::map([("key", Value::text("value")), ("key2", Value::text("value2"))])
        );
    }

    #[tokio::test]
    async fn test_parse_map_coerces_keys_to_text() {
        let value = decode(b"%1\r\n:7\r\n$1\r\nv\r\n").await.unwrap();
        assert_eq!(value, Value::map([("7", Value::text("v"))]));
    }

    #[tokio::test]
    async fn test_parse_map_duplicate_key() {
        let input = b"%3\r\n$1\r\na\r\n:1\r\n$1\r\nb\r\n:2\r\n$1\r\na\r\n:3\r\n";
        let value = decode(input).await.unwrap();
        assert_eq!(
            value,
            Value::map([("a", Value::integer(3)), ("b", Value::integer(2))])
        );
    }

    #[tokio::test]
    async fn test_parse_null_map() {
        assert_eq!(decode(b"%-1\r\n").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_empty_stream_is_disconnect() {
        assert!(matches!(decode(b"").await, Err(DecodeError::Disconnect)));
    }

    #[tokio::test]
    async fn test_header_cut_short() {
        let result = decode(b":12").await;
        assert!(matches!(
            result,
            Err(DecodeError::Protocol(ProtocolError::UnexpectedEof))
        ));
    }

    #[tokio::test]
    async fn test_unknown_prefix_then_recovers() {
        let mut reader = RespReader::new(&b"@bogus\r\n:5\r\n"[..]);

        let err = reader.read_value().await.unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Protocol(ProtocolError::UnknownPrefix(b'@'))
        ));
        assert_eq!(err.to_string(), "invalid first byte: '@'");

        assert_eq!(reader.read_value().await.unwrap(), Value::integer(5));
        assert!(matches!(
            reader.read_value().await,
            Err(DecodeError::Disconnect)
        ));
    }

    #[tokio::test]
    async fn test_unknown_prefix_split_across_reads() {
        let mock = Builder::new()
            .read(b"@")
            .read(b"bogus\r\n")
            .read(b":5\r\n")
            .build();
        let mut reader = RespReader::new(mock);

        assert!(matches!(
            reader.read_value().await,
            Err(DecodeError::Protocol(ProtocolError::UnknownPrefix(b'@')))
        ));
        assert_eq!(reader.read_value().await.unwrap(), Value::integer(5));
    }

    fn nested_arrays(levels: usize) -> Vec<u8> {
        let mut buf = b"*1\r\n".repeat(levels);
        buf.extend_from_slice(b":1\r\n");
        buf
    }

    #[tokio::test]
    async fn test_nesting_at_limit() {
        let mut value = decode(&nested_arrays(MAX_NESTING_DEPTH)).await.unwrap();
        for _ in 0..MAX_NESTING_DEPTH {
            value = value.into_array().unwrap().remove(0);
        }
        assert_eq!(value, Value::integer(1));
    }

    #[tokio::test]
    async fn test_nesting_too_deep() {
        let buf = nested_arrays(MAX_NESTING_DEPTH + 1);
        let mut reader = RespReader::new(&buf[..]);

        let err = reader.read_value().await.unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Protocol(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH))
        ));

        // The offending header is dropped; the reader carries on after it
        assert_eq!(reader.read_value().await.unwrap(), Value::integer(1));
    }

    #[tokio::test]
    async fn test_nested_maps_count_toward_depth() {
        let mut buf = b"%1\r\n+k\r\n".repeat(MAX_NESTING_DEPTH + 1);
        buf.extend_from_slice(b":1\r\n");

        assert!(matches!(
            decode(&buf).await,
            Err(DecodeError::Protocol(ProtocolError::NestingTooDeep(_)))
        ));
    }

    #[tokio::test]
    async fn test_huge_nesting_is_rejected() {
        let result = decode(&nested_arrays(200_000)).await;
        assert!(matches!(
            result,
            Err(DecodeError::Protocol(ProtocolError::NestingTooDeep(_)))
        ));
    }

    #[tokio::test]
    async fn test_line_at_limit() {
        let mut buf = b"+".to_vec();
        buf.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN - 2));
        buf.extend_from_slice(b"\r\n");

        let value = decode(&buf).await.unwrap();
        assert_eq!(value.as_str().map(str::len), Some(MAX_LINE_LEN - 2));
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let mut buf = b"+".to_vec();
        buf.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN * 4));
        buf.extend_from_slice(b"\r\n:7\r\n");
        let mut reader = RespReader::new(&buf[..]);

        assert!(matches!(
            reader.read_value().await,
            Err(DecodeError::Protocol(ProtocolError::LineTooLong(MAX_LINE_LEN)))
        ));
        assert_eq!(reader.read_value().await.unwrap(), Value::integer(7));
    }

    #[tokio::test]
    async fn test_length_header_too_long() {
        let mut buf = b"$".to_vec();
        buf.extend(std::iter::repeat(b'9').take(MAX_LINE_LEN + 1));

        assert!(matches!(
            decode(&buf).await,
            Err(DecodeError::Protocol(ProtocolError::LineTooLong(_)))
        ));
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSE")
            .read(b"T\r\n$1\r\nk\r")
            .read(b"\n$1\r\nv\r\n")
            .build();
        let mut reader = RespReader::new(mock);

        let value = reader.read_value().await.unwrap();
        assert_eq!(
            value,
            Value::array(vec![Value::text("SET"), Value::text("k"), Value::text("v")])
        );
    }

    #[tokio::test]
    async fn test_two_frames_in_one_read() {
        let mock = Builder::new().read(b":1\r\n:2\r\n").build();
        let mut reader = RespReader::new(mock);

        assert_eq!(reader.read_value().await.unwrap(), Value::integer(1));
        assert_eq!(reader.read_value().await.unwrap(), Value::integer(2));
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let original = Value::array(vec![
            Value::text("SET"),
            Value::integer(-3),
            Value::binary(Bytes::from_static(b"\x80\x81")),
            Value::map([("inner", Value::array(vec![Value::Null, Value::error("bad")]))]),
        ]);

        let encoded = original.encode();
        assert_eq!(decode(&encoded).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_float_roundtrips_as_text() {
        let encoded = Value::float(1.5).encode();
        assert_eq!(decode(&encoded).await.unwrap(), Value::text("1.5"));
    }

    #[tokio::test]
    async fn test_write_value_single_write() {
        let mut mock = Builder::new().write(b"$5\r\nhello\r\n").build();
        let written = write_value(&mut mock, &Value::text("hello")).await.unwrap();
        assert_eq!(written, 11);
    }
}
