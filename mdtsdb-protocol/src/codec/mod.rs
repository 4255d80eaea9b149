//! Payload codecs.
//!
//! Ingestion bodies are serialized from a JSON value tree into one of:
//! - JSON text (default)
//! - BSON document
//! - JSON text or BSON passed through zlib
//!
//! The external term format encoder lives in [`term`] and is used for binary
//! WebSocket frames.
//!
//! The payload digest is always taken over the canonical bytes before
//! compression, so toggling compression never changes the signature.

pub mod bson;
pub mod term;

use self::bson::to_bson;
use crate::error::ProtocolError;
use crate::signature::payload_digest;
use crate::DEFAULT_COMPRESSION_LEVEL;
use bytes::Bytes;
use flate2::write::ZlibEncoder;
use serde_json::{Number, Value};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Wire encoding selected by the `compression` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Bson,
    GzipBson,
}

impl Compression {
    /// Value of the `Content-Encoding` header, if any.
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gzip"),
            Compression::Bson => Some("bson"),
            Compression::GzipBson => Some("gzip-bson"),
        }
    }

    /// Content type of an ingestion body in this encoding.
    pub fn content_type(&self) -> &'static str {
        match self {
            Compression::None | Compression::Gzip => CONTENT_TYPE_JSON,
            Compression::Bson | Compression::GzipBson => CONTENT_TYPE_OCTET_STREAM,
        }
    }

    fn is_bson(&self) -> bool {
        matches!(self, Compression::Bson | Compression::GzipBson)
    }

    fn is_deflated(&self) -> bool {
        matches!(self, Compression::Gzip | Compression::GzipBson)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.content_encoding().unwrap_or("none"))
    }
}

impl FromStr for Compression {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            "bson" => Ok(Compression::Bson),
            "gzip-bson" => Ok(Compression::GzipBson),
            other => Err(ProtocolError::Encoding(format!(
                "unknown compression: {}",
                other
            ))),
        }
    }
}

/// Clamps a configured DEFLATE level to 0..=9, falling back to the default.
pub fn normalize_level(level: i64) -> u32 {
    if (0..=9).contains(&level) {
        level as u32
    } else {
        DEFAULT_COMPRESSION_LEVEL
    }
}

/// Compresses bytes as a zlib stream.
pub fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        flate2::Compression::new(level),
    );
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// An encoded request body with everything needed to sign and send it.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    /// Bytes placed on the wire.
    pub body: Bytes,
    /// Hex SHA256 of the canonical (pre-compression) bytes.
    pub digest: String,
    pub content_type: &'static str,
    pub content_encoding: Option<&'static str>,
}

impl EncodedPayload {
    /// Wraps text that is sent as-is (JSON or form bodies).
    pub fn text(text: String, content_type: &'static str) -> Self {
        let digest = payload_digest(text.as_bytes());
        Self {
            body: Bytes::from(text),
            digest,
            content_type,
            content_encoding: None,
        }
    }
}

/// Encodes ingestion bodies according to the configured compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadCodec {
    compression: Compression,
    level: u32,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(Compression::None, DEFAULT_COMPRESSION_LEVEL as i64)
    }
}

impl PayloadCodec {
    pub fn new(compression: Compression, level: i64) -> Self {
        Self {
            compression,
            level: normalize_level(level),
        }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Serializes a value tree. Nothing is returned on failure.
    pub fn encode(&self, value: &Value) -> Result<EncodedPayload, ProtocolError> {
        let canonical = if self.compression.is_bson() {
            to_bson(value)?
        } else {
            serde_json::to_vec(value)?
        };
        let digest = payload_digest(&canonical);

        let body = if self.compression.is_deflated() {
            deflate(&canonical, self.level)?
        } else {
            canonical
        };

        tracing::debug!(
            "encoded payload: compression={} canonical_digest={} wire_len={}",
            self.compression,
            digest,
            body.len()
        );

        Ok(EncodedPayload {
            body: Bytes::from(body),
            digest,
            content_type: self.compression.content_type(),
            content_encoding: self.compression.content_encoding(),
        })
    }
}

/// Numeric classification shared by the binary encoders.
///
/// A number whose value is integral is written as an integer even when it
/// was parsed as a double.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Numeric {
    Integer(i128),
    Float(f64),
}

pub(crate) fn classify_number(n: &Number) -> Numeric {
    if let Some(i) = n.as_i64() {
        return Numeric::Integer(i as i128);
    }
    if let Some(u) = n.as_u64() {
        return Numeric::Integer(u as i128);
    }
    let f = n.as_f64().unwrap_or(f64::NAN);
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Numeric::Integer(f as i64 as i128)
    } else {
        Numeric::Float(f)
    }
}
