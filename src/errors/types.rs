//! Error type definitions for the stream aggregation pipeline
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward.

use thiserror::Error;

use crate::models::StreamResource;

/// Top-level application error type
///
/// This enum represents all possible errors that can occur in the application.
/// It uses `thiserror` to provide automatic error trait implementations and
/// proper error chaining.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors (SeaORM)
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Stream expression errors
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Outbound fetch errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Distributed lock errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Debrid playback errors
    #[error("Debrid error: {0}")]
    Debrid(#[from] DebridError),

    /// User configuration errors, composed from the offending path
    #[error("Invalid configuration at {path}: {message}")]
    InvalidConfig { path: String, message: String },

    /// Regex rules that fail to compile or are not permitted
    #[error("Invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// JSON serialization failures
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Stream expression (DSL) errors
///
/// Parse failures always carry the byte position that broke the parse;
/// evaluation failures carry the offending sub-expression and the observed
/// value kind so validation surfaces can point at the exact problem.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// The expression is not syntactically valid
    #[error("Invalid expression at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// The expression parsed but could not be evaluated
    #[error("Invalid expression: {detail} (in `{fragment}`)")]
    Eval { fragment: String, detail: String },

    /// The expression evaluated to a value of the wrong kind
    #[error("Expression returned {found}, expected {expected}")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },

    /// A field reference that no stream attribute answers to
    #[error("Unknown field '{field}'{}", suggestion.as_ref().map(|s| format!(". Did you mean '{s}'?")).unwrap_or_default())]
    UnknownField {
        field: String,
        suggestion: Option<String>,
    },

    /// The expression budget for this user was exceeded
    #[error("Too many {kind} expressions: {count} exceeds the limit of {limit}")]
    TooMany {
        kind: &'static str,
        count: usize,
        limit: usize,
    },
}

/// Outbound fetch errors
#[derive(Error, Debug)]
pub enum FetchError {
    /// The provider did not answer within its configured budget
    #[error("Provider timed out after {timeout_ms}ms: {url}")]
    ProviderTimeout { url: String, timeout_ms: u64 },

    /// Non-success HTTP status from the provider
    #[error("Provider returned HTTP {status}: {url}")]
    ProviderHttp { url: String, status: u16 },

    /// The provider answered with a shape the resource schema rejects
    #[error("Provider response did not match the {resource} schema: {message}")]
    ProviderBadResponse {
        resource: StreamResource,
        message: String,
    },

    /// The recursion guard tripped for this (url, forwarded-ip) pair
    #[error("Possible recursive request rejected: {url}")]
    RecursiveRequest { url: String },

    /// Transport-level failure after retries were exhausted
    #[error("Request failed: {url} - {message}")]
    Transport { url: String, message: String },

    /// A URL that could not be parsed or rewritten
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

/// Distributed lock / memoizer errors
#[derive(Error, Debug)]
pub enum LockError {
    /// The caller gave up waiting for the winning producer
    #[error("Timed out waiting for lock '{key}' after {waited_ms}ms")]
    Timeout { key: String, waited_ms: u64 },

    /// The winning producer failed; the same error is replayed to all waiters
    #[error("Producer for '{key}' failed: {message}")]
    Producer { key: String, message: String },

    /// Backend connectivity problems (redis / database)
    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Stable debrid error codes (wire-facing); each maps to a placeholder video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DebridErrorCode {
    Unauthorized,
    Forbidden,
    PaymentRequired,
    StoreLimitExceeded,
    UnprocessableEntity,
    StoreMagnetInvalid,
    UnavailableForLegalReasons,
    NoMatchingFile,
}

impl DebridErrorCode {
    /// Path of the pre-rendered placeholder video the client is redirected to
    pub fn placeholder_path(&self) -> String {
        format!("/static/errors/{}.mp4", self.to_string().to_lowercase())
    }
}

/// Debrid playback resolution errors
#[derive(Error, Debug)]
pub enum DebridError {
    /// A failure with a stable short code the client can key placeholders on
    #[error("Debrid failure [{code}]: {message}")]
    Service {
        code: DebridErrorCode,
        message: String,
    },

    /// Success-with-wait: the job is downloading and the client should retry
    #[error("Content is still downloading on the service")]
    Downloading,

    /// The opaque playback URL did not validate (unknown metadata, bad auth)
    #[error("Playback URL rejected: {message}")]
    PlaybackRejected { message: String },
}

impl DebridError {
    pub fn service(code: DebridErrorCode, message: impl Into<String>) -> Self {
        Self::Service {
            code,
            message: message.into(),
        }
    }

    /// The stable code, when one exists
    pub fn code(&self) -> Option<DebridErrorCode> {
        match self {
            Self::Service { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a configuration error from a schema path and message
    pub fn invalid_config<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::InvalidConfig {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-regex error
    pub fn invalid_regex<P: Into<String>, M: Into<String>>(pattern: P, message: M) -> Self {
        Self::InvalidRegex {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debrid_codes_render_screaming_snake() {
        assert_eq!(
            DebridErrorCode::NoMatchingFile.to_string(),
            "NO_MATCHING_FILE"
        );
        assert_eq!(
            DebridErrorCode::UnavailableForLegalReasons.to_string(),
            "UNAVAILABLE_FOR_LEGAL_REASONS"
        );
    }

    #[test]
    fn placeholder_paths_are_stable() {
        assert_eq!(
            DebridErrorCode::StoreLimitExceeded.placeholder_path(),
            "/static/errors/store_limit_exceeded.mp4"
        );
    }
}
