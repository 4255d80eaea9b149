//! Request signing.
//!
//! Every signed request carries an HMAC-SHA256 chain keyed by the secret key
//! and scoped to a one-minute window:
//!
//! ```text
//! ts        = floor(unix_seconds / 60)
//! k1        = HMAC(secret, ts)
//! k2        = HMAC(k1, api_method)
//! canonical = SHA256("/" + path + "\n" + content_type + "\n" + payload_digest)
//! signature = HMAC(k2, ts + "\n" + signing_key + "\n" + canonical)
//! ```

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Authorization scheme prefix for ordinary signed requests.
pub const AUTH_SCHEME: &str = "MDTSDB-HMAC-SHA256 ";

/// Authorization scheme prefix for streaming requests.
pub const STREAMING_AUTH_SCHEME: &str = "MDTSDB-STREAMING-HMAC-SHA256 ";

/// Token type used when a bearer token is set without one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Which Authorization scheme prefix to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    #[default]
    Standard,
    Streaming,
}

impl AuthScheme {
    /// Header prefix, including the trailing space.
    pub fn prefix(&self) -> &'static str {
        match self {
            AuthScheme::Standard => AUTH_SCHEME,
            AuthScheme::Streaming => STREAMING_AUTH_SCHEME,
        }
    }
}

/// Role flag appended to the Authorization header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Signed with the admin key.
    Admin,
    /// Signed with an application (swimlane) key.
    Service,
}

impl Role {
    pub fn flag(&self) -> &'static str {
        match self {
            Role::Admin => "a",
            Role::Service => "s",
        }
    }
}

/// Minute-granularity timestamp used as the first link of the HMAC chain.
pub fn coarse_timestamp(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(60)
}

/// Hex-encoded SHA256 of a request body. Empty bodies are digested too.
pub fn payload_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

/// Computes the request signature for the current minute.
pub fn sign(
    api_method: &str,
    signing_key: &str,
    secret_key: &str,
    path: &str,
    payload_digest_hex: &str,
    content_type: &str,
) -> String {
    sign_at(
        coarse_timestamp(Utc::now()),
        api_method,
        signing_key,
        secret_key,
        path,
        payload_digest_hex,
        content_type,
    )
}

/// Computes the request signature for an explicit coarse timestamp.
pub fn sign_at(
    ts: i64,
    api_method: &str,
    signing_key: &str,
    secret_key: &str,
    path: &str,
    payload_digest_hex: &str,
    content_type: &str,
) -> String {
    let ts = ts.to_string();
    let k1 = hmac_sha256(secret_key.as_bytes(), ts.as_bytes());
    let k2 = hmac_sha256(&k1, api_method.as_bytes());

    let canonical = format!("/{}\n{}\n{}", path, content_type, payload_digest_hex);
    let canonical_hash = hex::encode(Sha256::digest(canonical.as_bytes()));

    let msg = format!("{}\n{}\n{}", ts, signing_key, canonical_hash);
    hex::encode(hmac_sha256(&k2, msg.as_bytes()))
}

/// Value of the Authorization header.
///
/// A request carries either an HMAC signature or a bearer token, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Signed {
        scheme: AuthScheme,
        signing_key: String,
        signature: String,
        role: Role,
        api_method: String,
    },
    Bearer {
        token_type: String,
        token: String,
    },
}

impl Authorization {
    /// Builds a bearer authorization, defaulting an empty token type to `Bearer`.
    pub fn bearer(token_type: Option<&str>, token: impl Into<String>) -> Self {
        let token_type = match token_type {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => DEFAULT_TOKEN_TYPE.to_string(),
        };
        Authorization::Bearer {
            token_type,
            token: token.into(),
        }
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::Signed {
                scheme,
                signing_key,
                signature,
                role,
                api_method,
            } => write!(
                f,
                "{}{} {} {},{}",
                scheme.prefix(),
                signing_key,
                signature,
                role.flag(),
                api_method
            ),
            Authorization::Bearer { token_type, token } => write!(f, "{} {}", token_type, token),
        }
    }
}
