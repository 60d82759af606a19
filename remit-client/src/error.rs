//! Error taxonomy for API calls.
//!
//! Two layers: [`ApiError`] carries a classification [`ErrorCode`], a
//! message and an optional cause. [`RequestFailure`] wraps an `ApiError`
//! and adds the HTTP status code and request id of the failed exchange.
//! Every error returned by [`Request::send`](crate::Request::send) is a
//! `RequestFailure`.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error used as the cause of an [`ApiError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for API calls.
pub type Result<T, E = RequestFailure> = std::result::Result<T, E>;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The transport gave up waiting for the server.
    Timeout,
    /// The server answered 404.
    NotFound,
    /// A successful response body could not be decoded.
    UnmarshalFailed,
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// Short phrase used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::UnmarshalFailed => "unmarshal_failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base error: a code, a message and an optional cause.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ApiError {
    /// Create an error without a cause.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping the error that caused it.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Classification of this error.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Details message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wrapped cause, if one was set.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

/// A failed API call.
///
/// The request id is empty when none is available, for instance when the
/// transport never got a response.
#[derive(Debug)]
pub struct RequestFailure {
    error: ApiError,
    status_code: u16,
    request_id: String,
    retries: u32,
}

impl RequestFailure {
    /// Wrap a base error with the HTTP details of the failed exchange.
    pub fn new(error: ApiError, status_code: u16, request_id: impl Into<String>) -> Self {
        Self {
            error,
            status_code,
            request_id: request_id.into(),
            retries: 0,
        }
    }

    pub(crate) fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Classification of this failure.
    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }

    /// Details message.
    pub fn message(&self) -> &str {
        self.error.message()
    }

    /// The wrapped cause, if one was set.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.error.cause()
    }

    /// HTTP status code of the last response, or 0 when there was none.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Request id reported by the service.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Number of retries executed before giving up.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The base error.
    pub fn api_error(&self) -> &ApiError {
        &self.error
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        self.code() == ErrorCode::Timeout
    }

    /// Check if the resource was not found.
    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (status code: {}, request id: {})",
            self.error, self.status_code, self.request_id
        )
    }
}

impl StdError for RequestFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

impl From<ApiError> for RequestFailure {
    fn from(error: ApiError) -> Self {
        Self::new(error, 0, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_code_strings() {
        assert_eq!(ErrorCode::Timeout.as_str(), "timeout");
        assert_eq!(ErrorCode::NotFound.as_str(), "not_found");
        assert_eq!(ErrorCode::UnmarshalFailed.as_str(), "unmarshal_failed");
        assert_eq!(ErrorCode::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_api_error_display_omits_cause() {
        let err = ApiError::with_source(
            ErrorCode::Unknown,
            "something broke",
            io::Error::other("disk on fire"),
        );
        assert_eq!(err.to_string(), "unknown: something broke");
        assert_eq!(err.cause().map(|e| e.to_string()).as_deref(), Some("disk on fire"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_request_failure_accessors() {
        let err = RequestFailure::new(
            ApiError::new(ErrorCode::NotFound, "http request failed after 0 attempts"),
            404,
            "req-42",
        );
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.request_id(), "req-42");
        assert_eq!(err.retries(), 0);
        assert!(err.is_not_found());
        assert!(!err.is_timeout());
        assert!(err.cause().is_none());
        assert_eq!(
            err.to_string(),
            "not_found: http request failed after 0 attempts (status code: 404, request id: req-42)"
        );
    }

    #[test]
    fn test_request_failure_source_is_cause() {
        let err = RequestFailure::new(
            ApiError::with_source(ErrorCode::Timeout, "slow", io::Error::other("deadline")),
            0,
            "",
        );
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("deadline"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_from_api_error() {
        let err: RequestFailure = ApiError::new(ErrorCode::Unknown, "bad").into();
        assert_eq!(err.status_code(), 0);
        assert_eq!(err.request_id(), "");
    }
}
