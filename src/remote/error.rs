//! HTTP-shaped remote errors and their classification into retry classes.
//!
//! The classifier is consumed only by the call envelope; everything above it
//! sees either a successful result or a terminal error. The split that
//! matters: a rate-limit response means *this identity* is exhausted and must
//! be rotated out, while a backend error means the *request* was unlucky and
//! the same identity can retry.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error produced by a [`super::RemoteStore`] call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The remote answered with a non-success HTTP status.
    #[error("remote returned HTTP {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Server-provided message, possibly empty.
        message: String,
    },

    /// The call exceeded its deadline before a response arrived.
    #[error("remote call timed out: {0}")]
    Timeout(String),

    /// Transport-level failure (DNS, connection reset, TLS, malformed body).
    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Shorthand for a status error without a message.
    #[must_use]
    pub fn status(code: u16) -> Self {
        Self::Status {
            code,
            message: String::new(),
        }
    }
}

/// Retry class of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient server-side failure; retry with the same credential.
    Backend,
    /// The current identity is throttled; discard it and rotate.
    RateLimit,
    /// The object does not exist. Terminal.
    NotFound,
    /// The request was malformed. Terminal.
    BadRequest,
    /// Deadline exceeded; retry with the same credential.
    Timeout,
    /// The governing context was cancelled. Returned unchanged.
    Cancelled,
    /// Anything else. Terminal.
    Unknown,
}

/// Sorts a remote error into its retry class.
///
/// Cancellation wins over everything: once the token fires, whatever error
/// the in-flight call surfaced is reported as [`ErrorClass::Cancelled`].
#[must_use]
pub fn classify(error: &ApiError, cancel: &CancellationToken) -> ErrorClass {
    if cancel.is_cancelled() {
        return ErrorClass::Cancelled;
    }

    match error {
        ApiError::Status { code, .. } => match code {
            500..=599 => ErrorClass::Backend,
            403 => ErrorClass::RateLimit,
            404 => ErrorClass::NotFound,
            400 => ErrorClass::BadRequest,
            _ => ErrorClass::Unknown,
        },
        ApiError::Timeout(_) => ErrorClass::Timeout,
        ApiError::Transport(_) => ErrorClass::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_token() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn test_classify_all_5xx_as_backend() {
        let cancel = live_token();
        for code in 500..=599 {
            assert_eq!(
                classify(&ApiError::status(code), &cancel),
                ErrorClass::Backend,
                "code {code}"
            );
        }
    }

    #[test]
    fn test_classify_403_as_rate_limit() {
        assert_eq!(
            classify(&ApiError::status(403), &live_token()),
            ErrorClass::RateLimit
        );
    }

    #[test]
    fn test_classify_404_as_not_found() {
        assert_eq!(
            classify(&ApiError::status(404), &live_token()),
            ErrorClass::NotFound
        );
    }

    #[test]
    fn test_classify_400_as_bad_request() {
        assert_eq!(
            classify(&ApiError::status(400), &live_token()),
            ErrorClass::BadRequest
        );
    }

    #[test]
    fn test_classify_other_status_as_unknown() {
        assert_eq!(
            classify(&ApiError::status(418), &live_token()),
            ErrorClass::Unknown
        );
        assert_eq!(
            classify(&ApiError::status(401), &live_token()),
            ErrorClass::Unknown
        );
    }

    #[test]
    fn test_classify_timeout() {
        assert_eq!(
            classify(&ApiError::Timeout("deadline".into()), &live_token()),
            ErrorClass::Timeout
        );
    }

    #[test]
    fn test_classify_transport_as_unknown() {
        assert_eq!(
            classify(&ApiError::Transport("reset".into()), &live_token()),
            ErrorClass::Unknown
        );
    }

    #[test]
    fn test_cancellation_wins_over_status() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            classify(&ApiError::status(503), &cancel),
            ErrorClass::Cancelled
        );
    }
}
