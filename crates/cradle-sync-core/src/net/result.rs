//! Outcome of a remote call.

use tracing::debug;

use crate::error::SyncError;

const UNAUTHORIZED: u16 = 401;
const BAD_REQUEST: u16 = 400;
const NOT_FOUND: u16 = 404;
const CONFLICT: u16 = 409;

/// Result of a network request.
///
/// * `Success`: the server answered 2xx and the body was fully processed.
/// * `Failure`: the server answered with a non-2xx status; the raw body is kept.
/// * `NetworkException`: no usable answer (transport error, or the body could
///   not be processed).
#[derive(Debug)]
pub enum NetworkResult<T> {
    Success { value: T, status_code: u16 },
    Failure { body: Vec<u8>, status_code: u16 },
    NetworkException(SyncError),
}

impl<T> NetworkResult<T> {
    /// Transform the success value, passing failures through unchanged.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> NetworkResult<U> {
        match self {
            NetworkResult::Success { value, status_code } => NetworkResult::Success {
                value: f(value),
                status_code,
            },
            NetworkResult::Failure { body, status_code } => NetworkResult::Failure { body, status_code },
            NetworkResult::NetworkException(e) => NetworkResult::NetworkException(e),
        }
    }

    /// Re-type a non-success result.
    ///
    /// # Panics
    ///
    /// Panics if called on `Success`; there is no value of the target type.
    pub fn cast<U>(self) -> NetworkResult<U> {
        match self {
            NetworkResult::Success { status_code, .. } => {
                panic!("cannot cast a Success result (status {})", status_code)
            }
            NetworkResult::Failure { body, status_code } => NetworkResult::Failure { body, status_code },
            NetworkResult::NetworkException(e) => NetworkResult::NetworkException(e),
        }
    }

    /// `other` if this result is a success, otherwise this failure re-typed.
    pub fn sequence<U>(self, other: NetworkResult<U>) -> NetworkResult<U> {
        if self.is_success() {
            other
        } else {
            self.cast()
        }
    }

    /// Lazy form of [`sequence`](Self::sequence): `next` only runs on success.
    pub fn and_then<U, F: FnOnce(T) -> NetworkResult<U>>(self, next: F) -> NetworkResult<U> {
        match self {
            NetworkResult::Success { value, .. } => next(value),
            other => other.cast(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, NetworkResult::Success { .. })
    }

    pub fn failed(&self) -> bool {
        !self.is_success()
    }

    /// The success value, if any.
    pub fn unwrapped(self) -> Option<T> {
        match self {
            NetworkResult::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            NetworkResult::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    /// HTTP status, absent when no response arrived.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            NetworkResult::Success { status_code, .. } | NetworkResult::Failure { status_code, .. } => {
                Some(*status_code)
            }
            NetworkResult::NetworkException(_) => None,
        }
    }

    /// Human-readable explanation of a failure; `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            NetworkResult::Success { .. } => None,
            NetworkResult::Failure { status_code, .. } => Some(status_message(*status_code)),
            NetworkResult::NetworkException(e) => Some(e.to_string()),
        }
    }

    /// One-line description used in sync summaries.
    pub fn failure_summary(&self) -> Option<String> {
        match self {
            NetworkResult::Success { .. } => None,
            NetworkResult::Failure { body, status_code } => {
                debug!(status = *status_code, body = %String::from_utf8_lossy(body), "server rejected request");
                Some(format!(
                    "server sent error code {}: {}",
                    status_code,
                    status_message(*status_code)
                ))
            }
            NetworkResult::NetworkException(e) => Some(format!("{}: {}", e.kind(), e)),
        }
    }
}

/// Message for a non-2xx status code.
pub fn status_message(status_code: u16) -> String {
    match status_code {
        UNAUTHORIZED => "The server rejected your credentials. Check your email and password.".to_string(),
        BAD_REQUEST => "The server rejected the upload request as malformed.".to_string(),
        NOT_FOUND => "The server does not know this resource or URL. Check the server address.".to_string(),
        CONFLICT => "The resource already exists on the server.".to_string(),
        code => format!("The server returned an error (status code {}).", code),
    }
}
