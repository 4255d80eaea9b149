//! Protocol error types and server error codes.

use std::fmt;
use thiserror::Error;

/// Errors raised while encoding requests or decoding responses.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("response carries no result")]
    MissingResult,

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("field '{field}' is not {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },

    #[error("empty stream body")]
    EmptyStream,
}

impl ProtocolError {
    pub(crate) fn field_type(field: impl Into<String>, expected: &'static str) -> Self {
        ProtocolError::FieldType {
            field: field.into(),
            expected,
        }
    }
}

/// Error codes reported by the service in `error.code`.
///
/// The numeric values are part of the service contract. Codes the client
/// does not know are kept as raw integers by [`crate::Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Authorization
    AuthNoKey,
    AuthPerm,
    AuthOverload,

    // Service
    ServiceDeny,
    ServiceTimeout,
    ServiceBadTimeout,

    // API
    ApiExpect,
    ApiUnknownMethod,

    // Query language
    QlSyntax,
    QlFormat,
    QlNifMath,
    QlUnknownMethod,
    QlGeneral,
    QlFileNotFound,
    QlUnknownSubject,
    QlLogics,
    QlExpr,
    QlTimeless,
    QlSize,
    QlMathFail,

    // Request
    ReqSize,
    ReqLoadId,
    ReqTimeout,
    ReqInternal,
    ReqS3Id,
    ReqNoData,

    // Storage
    DbInsufficient,
    DbDisconnected,
    DbTimeout,

    // Messaging
    AmqpGeneral,
    AmqpSend,

    IncomeFormat,

    // System
    General,
    Internal,
    Offline,
}

impl ErrorCode {
    /// Code used when the server reports an error without a code.
    pub const DEFAULT: i64 = 9000;

    /// Returns the numeric code.
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::AuthNoKey => 1000,
            ErrorCode::AuthPerm => 1001,
            ErrorCode::AuthOverload => 1002,
            ErrorCode::ServiceDeny => 2000,
            ErrorCode::ServiceTimeout => 2001,
            ErrorCode::ServiceBadTimeout => 2002,
            ErrorCode::ApiExpect => 3000,
            ErrorCode::ApiUnknownMethod => 3001,
            ErrorCode::QlSyntax => 4000,
            ErrorCode::QlFormat => 4001,
            ErrorCode::QlNifMath => 4002,
            ErrorCode::QlUnknownMethod => 4003,
            ErrorCode::QlGeneral => 4004,
            ErrorCode::QlFileNotFound => 4005,
            ErrorCode::QlUnknownSubject => 4006,
            ErrorCode::QlLogics => 4007,
            ErrorCode::QlExpr => 4008,
            ErrorCode::QlTimeless => 4009,
            ErrorCode::QlSize => 4010,
            ErrorCode::QlMathFail => 4011,
            ErrorCode::ReqSize => 5000,
            ErrorCode::ReqLoadId => 5001,
            ErrorCode::ReqTimeout => 5002,
            ErrorCode::ReqInternal => 5003,
            ErrorCode::ReqS3Id => 5004,
            ErrorCode::ReqNoData => 5900,
            ErrorCode::DbInsufficient => 6000,
            ErrorCode::DbDisconnected => 6001,
            ErrorCode::DbTimeout => 6002,
            ErrorCode::AmqpGeneral => 7000,
            ErrorCode::AmqpSend => 7001,
            ErrorCode::IncomeFormat => 8000,
            ErrorCode::General => 9000,
            ErrorCode::Internal => 9001,
            ErrorCode::Offline => 9002,
        }
    }

    /// Maps a numeric code back to a known error code.
    pub fn from_code(code: i64) -> Option<Self> {
        let code = match code {
            1000 => ErrorCode::AuthNoKey,
            1001 => ErrorCode::AuthPerm,
            1002 => ErrorCode::AuthOverload,
            2000 => ErrorCode::ServiceDeny,
            2001 => ErrorCode::ServiceTimeout,
            2002 => ErrorCode::ServiceBadTimeout,
            3000 => ErrorCode::ApiExpect,
            3001 => ErrorCode::ApiUnknownMethod,
            4000 => ErrorCode::QlSyntax,
            4001 => ErrorCode::QlFormat,
            4002 => ErrorCode::QlNifMath,
            4003 => ErrorCode::QlUnknownMethod,
            4004 => ErrorCode::QlGeneral,
            4005 => ErrorCode::QlFileNotFound,
            4006 => ErrorCode::QlUnknownSubject,
            4007 => ErrorCode::QlLogics,
            4008 => ErrorCode::QlExpr,
            4009 => ErrorCode::QlTimeless,
            4010 => ErrorCode::QlSize,
            4011 => ErrorCode::QlMathFail,
            5000 => ErrorCode::ReqSize,
            5001 => ErrorCode::ReqLoadId,
            5002 => ErrorCode::ReqTimeout,
            5003 => ErrorCode::ReqInternal,
            5004 => ErrorCode::ReqS3Id,
            5900 => ErrorCode::ReqNoData,
            6000 => ErrorCode::DbInsufficient,
            6001 => ErrorCode::DbDisconnected,
            6002 => ErrorCode::DbTimeout,
            7000 => ErrorCode::AmqpGeneral,
            7001 => ErrorCode::AmqpSend,
            8000 => ErrorCode::IncomeFormat,
            9000 => ErrorCode::General,
            9001 => ErrorCode::Internal,
            9002 => ErrorCode::Offline,
            _ => return None,
        };
        Some(code)
    }

    /// Returns whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::AuthOverload
                | ErrorCode::ServiceTimeout
                | ErrorCode::ReqTimeout
                | ErrorCode::DbDisconnected
                | ErrorCode::DbTimeout
                | ErrorCode::Offline
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::AuthNoKey => "AUTH_NOKEY",
            ErrorCode::AuthPerm => "AUTH_PERM",
            ErrorCode::AuthOverload => "AUTH_OVERLOAD",
            ErrorCode::ServiceDeny => "SERVICE_DENY",
            ErrorCode::ServiceTimeout => "SERVICE_TIMEOUT",
            ErrorCode::ServiceBadTimeout => "SERVICE_BADTIMEOUT",
            ErrorCode::ApiExpect => "API_EXPECT",
            ErrorCode::ApiUnknownMethod => "API_UNKNOWNMETH",
            ErrorCode::QlSyntax => "QL_SYNTAX",
            ErrorCode::QlFormat => "QL_FORMAT",
            ErrorCode::QlNifMath => "QL_NIFMATH",
            ErrorCode::QlUnknownMethod => "QL_UNKNOWN_METH",
            ErrorCode::QlGeneral => "QL_GENERAL",
            ErrorCode::QlFileNotFound => "QL_FILE_NOTFOUND",
            ErrorCode::QlUnknownSubject => "QL_UNKNOWN_SUBJ",
            ErrorCode::QlLogics => "QL_LOGICS",
            ErrorCode::QlExpr => "QL_EXPR",
            ErrorCode::QlTimeless => "QL_TIMELESS",
            ErrorCode::QlSize => "QL_SIZE",
            ErrorCode::QlMathFail => "QL_MATHFAIL",
            ErrorCode::ReqSize => "REQ_SIZE",
            ErrorCode::ReqLoadId => "REQ_LOADID",
            ErrorCode::ReqTimeout => "REQ_TIMEOUT",
            ErrorCode::ReqInternal => "REQ_INTERNAL",
            ErrorCode::ReqS3Id => "REQ_S3ID",
            ErrorCode::ReqNoData => "REQ_NODATA",
            ErrorCode::DbInsufficient => "DB_INSUFF",
            ErrorCode::DbDisconnected => "DB_DISCON",
            ErrorCode::DbTimeout => "DB_TIMEOUT",
            ErrorCode::AmqpGeneral => "AMQP_GENERAL",
            ErrorCode::AmqpSend => "AMQP_SEND",
            ErrorCode::IncomeFormat => "INCOME_FORMAT",
            ErrorCode::General => "GENERAL",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Offline => "OFFLINE",
        };
        write!(f, "{}", name)
    }
}
