//! Client error types.

use crate::config::ConfigError;
use mdtsdb_protocol::ErrorCode;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unexpected HTTP status: {0}")]
    HttpStatus(u16),

    #[error("too many redirects ({0} attempts)")]
    TooManyRedirects(usize),

    #[error("redirect without a usable Location header")]
    InvalidRedirect,

    #[error("protocol error: {0}")]
    Protocol(#[from] mdtsdb_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server error: {code} - {message}")]
    ServerError {
        code: i64,
        message: String,
        retryable: bool,
    },

    #[error("access token error: {0}")]
    Token(String),
}

impl ClientError {
    /// Server-reported error; retryability follows the error code table.
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        ClientError::ServerError {
            code,
            message: message.into(),
            retryable: ErrorCode::from_code(code)
                .map(|c| c.is_retryable())
                .unwrap_or(false),
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::HttpStatus(status) => *status >= 500,
            ClientError::ServerError { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
