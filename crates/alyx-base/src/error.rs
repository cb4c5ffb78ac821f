use std::borrow::Cow;

use serde::Serialize;

/// Tags an error with the taxonomy from the server's error handling design
/// (see `SPEC_FULL.md` §7). Attach to an `anyhow` chain with `.context(e)`,
/// or construct directly and convert with `From`/`Into` at a boundary.
///
/// `short_msg` is the taxonomy code itself (`"NOT_FOUND"`, `"TIMEOUT"`, ...):
/// stable, matchable in tests, and what the function stdio protocol and HTTP
/// JSON error bodies both send as `code`. `msg` is the longer developer
/// facing detail.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{code:?}: {msg}")]
pub struct AlyxError {
    pub code: ErrorCode,
    pub msg: Cow<'static, str>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    InvalidTransaction,
    ConstraintViolation,
    Timeout,
    RuntimeMissing,
    SpawnError,
    InvalidJson,
    FunctionError,
    Backpressure,
    SlowConsumer,
    Unauthorized,
    Internal,
}

impl ErrorCode {
    /// The HTTP status this code maps to at the `alyx-server` boundary.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::ValidationError => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::InvalidTransaction => 400,
            ErrorCode::ConstraintViolation => 409,
            ErrorCode::Timeout => 504,
            ErrorCode::RuntimeMissing => 500,
            ErrorCode::SpawnError => 500,
            ErrorCode::InvalidJson => 502,
            ErrorCode::FunctionError => 500,
            ErrorCode::Backpressure => 429,
            ErrorCode::SlowConsumer => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Internal => 500,
        }
    }

    /// Whether retry policies (hook backoff, webhook retry) should treat this
    /// as retryable. Non-retryable errors are terminal.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout | ErrorCode::SlowConsumer | ErrorCode::Backpressure
        )
    }
}

impl AlyxError {
    fn new(code: ErrorCode, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            msg: msg.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, msg)
    }

    pub fn not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::NotFound, msg)
    }

    pub fn invalid_transaction(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidTransaction, msg)
    }

    pub fn constraint_violation(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ConstraintViolation, msg)
    }

    pub fn timeout(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Timeout, msg)
    }

    pub fn runtime_missing(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::RuntimeMissing, msg)
    }

    pub fn spawn_error(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::SpawnError, msg)
    }

    pub fn invalid_json(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidJson, msg)
    }

    pub fn function_error(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::FunctionError, msg)
    }

    pub fn backpressure(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Backpressure, msg)
    }

    pub fn slow_consumer(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::SlowConsumer, msg)
    }

    pub fn unauthorized(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, msg)
    }

    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    /// Renders the wire shape used by both the HTTP JSON error body and the
    /// function stdio protocol's `error` field: `{code, message, details?}`.
    pub fn to_wire(&self) -> ErrorWire {
        ErrorWire {
            code: format!("{:?}", self.code).to_uppercase(),
            message: self.msg.to_string(),
            details: self.details.clone(),
        }
    }

    /// Find an `AlyxError` anywhere in an anyhow error's context chain.
    pub fn downcast_chain(err: &anyhow::Error) -> Option<&AlyxError> {
        err.chain().find_map(|cause| cause.downcast_ref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorWire {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
