//! # mdtsdb-protocol
//!
//! Wire protocol implementation for the mdtsdb time-series service.
//!
//! This crate provides:
//! - HMAC-SHA256 request signing and Authorization header values
//! - Payload codecs (JSON, BSON, zlib, external term format)
//! - Request envelopes, method routing and form bodies
//! - Response classification (ok, server error, postponed job)
//! - Multi-frame stream parsing and value merging
//! - Error codes and protocol constants

pub mod codec;
pub mod envelope;
pub mod error;
pub mod response;
pub mod signature;
pub mod stream;

pub use codec::{Compression, EncodedPayload, PayloadCodec};
pub use envelope::{Context, Envelope, FormBody, Route, SigningKey};
pub use error::{ErrorCode, ProtocolError};
pub use response::{EventsData, Outcome, Response, POSTPONED_MESSAGE};
pub use signature::{AuthScheme, Authorization, Role, AUTH_SCHEME, STREAMING_AUTH_SCHEME};
pub use stream::{StreamOutcome, StreamResponse};

/// Marker byte that may prefix a response body.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Delimiter between the frames of a streamed body: NUL followed by "11110".
pub const FRAME_DELIMITER: &str = "\u{0}11110";

/// Default DEFLATE level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Default service port.
pub const DEFAULT_PORT: u16 = 8080;

/// Maximum number of HTTP attempts per call, redirects included.
pub const MAX_ATTEMPTS: usize = 4;
