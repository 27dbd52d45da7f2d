//! Wire Protocol Value Type
//!
//! This module defines [`Value`], the closed set of types that travel over
//! the wire, together with their encoding.
//!
//! ## Protocol Format
//!
//! Each frame starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String (text or binary)
//! - `*` Array
//! - `%` Map
//!
//! All header lines are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Error: `-Missing command\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Map: `%1\r\n$3\r\nkey\r\n$5\r\nvalue\r\n`
//! Null: `$-1\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used by the protocol
pub const CRLF: &[u8] = b"\r\n";

/// Protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
    pub const MAP: u8 = b'%';
}

/// A value that can be sent over the wire or kept in the store.
///
/// Text and binary payloads are both carried as bulk strings; the decoder
/// produces `Text` whenever the payload is valid UTF-8. Floats have no wire
/// type of their own and are sent as the bulk string of their decimal form.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 text.
    Text(String),

    /// A byte sequence that is not valid UTF-8.
    Binary(Bytes),

    /// 64-bit signed integer.
    Integer(i64),

    /// Floating point number, encoded as its decimal text form.
    Float(f64),

    /// Null bulk string, null array or null map.
    Null,

    /// Ordered sequence of values, any nesting depth.
    Array(Vec<Value>),

    /// Text keys to values, in insertion order.
    Map(Vec<(String, Value)>),

    /// Error reply carrying a single message.
    /// The message must not contain CRLF; it is written verbatim.
    Error(String),
}

impl Value {
    /// Creates a text value.
    ///
    /// # Example
    /// ```
    /// use emberkv::protocol::Value;
    /// let v = Value::text("hello");
    /// assert_eq!(v.encode(), b"$5\r\nhello\r\n");
    /// ```
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Creates a binary value.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Value::Binary(data.into())
    }

    pub fn integer(n: i64) -> Self {
        Value::Integer(n)
    }

    pub fn float(f: f64) -> Self {
        Value::Float(f)
    }

    pub fn null() -> Self {
        Value::Null
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(values)
    }

    /// Creates a map from `(key, value)` pairs, keeping their order.
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Creates an error value.
    ///
    /// # Example
    /// ```
    /// use emberkv::protocol::Value;
    /// let err = Value::error("Missing command");
    /// assert_eq!(err.encode(), b"-Missing command\r\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Value::Error(s.into())
    }

    /// Encodes the value into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the value into an existing buffer.
    ///
    /// A whole reply is built this way before it touches the socket, so a
    /// reply is always written in one piece.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Text(s) => encode_bulk(buf, s.as_bytes()),
            Value::Binary(data) => encode_bulk(buf, data),
            Value::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Value::Float(f) => encode_bulk(buf, format_float(*f).as_bytes()),
            Value::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            Value::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.encode_into(buf);
                }
            }
            Value::Map(pairs) => {
                buf.push(prefix::MAP);
                buf.extend_from_slice(pairs.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for (key, value) in pairs {
                    encode_bulk(buf, key.as_bytes());
                    value.encode_into(buf);
                }
            }
            Value::Error(message) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(message.as_bytes());
                buf.extend_from_slice(CRLF);
            }
        }
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Returns the inner text of a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Consumes self and returns the inner array if this is an Array variant.
    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Turns `Binary` into `Text` when the bytes are valid UTF-8.
    /// Every other value is returned unchanged.
    pub fn into_text_if_utf8(self) -> Self {
        match self {
            Value::Binary(data) => match std::str::from_utf8(&data) {
                Ok(s) => Value::Text(s.to_owned()),
                Err(_) => Value::Binary(data),
            },
            other => other,
        }
    }

    /// Number of characters in the textual rendering of this value.
    ///
    /// This is the unit of the store's memory accounting.
    pub fn rendered_len(&self) -> usize {
        match self {
            Value::Text(s) | Value::Error(s) => s.chars().count(),
            other => other.to_string().chars().count(),
        }
    }
}

fn encode_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(prefix::BULK_STRING);
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

/// Shortest text form of a float.
///
/// Magnitudes in `1e-4..1e16` are written in plain decimal, and integral
/// values keep a trailing `.0`. Anything outside that range uses exponent
/// form with a signed, two-digit exponent (`1e+16`, `2.5e-05`).
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sci = format!("{:e}", f);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if f == 0.0 || (-4..16).contains(&exponent) {
        if f.fract() == 0.0 {
            format!("{:.1}", f)
        } else {
            f.to_string()
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

/// Writes a value as it appears inside a rendered array or map.
fn fmt_nested(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Text(s) => write!(f, "'{}'", s),
        other => write!(f, "{}", other),
    }
}

/// The textual rendering of a value.
///
/// Used for memory accounting and wherever a value has to be shown as text,
/// for example when a number is used as a key.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Binary(data) => write!(f, "b'{}'", data.escape_ascii()),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Null => f.write_str("null"),
            Value::Array(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_nested(v, f)?;
                }
                f.write_str("]")
            }
            Value::Map(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{}': ", k)?;
                    fmt_nested(v, f)?;
                }
                f.write_str("}")
            }
            Value::Error(message) => f.write_str(message),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value::Binary(data)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(values)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
