//! Retry classifier for store primitives.
//!
//! Maps the result of one primitive to the small set of outcomes the
//! protocol loops dispatch on. Transient outcomes are never surfaced to
//! callers; every loop retries them under backoff until the cancellation
//! token fires.

use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::store::StoreResponse;

/// Classification of one primitive's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// 200 or 204.
    Success,
    /// 412: the object exists at a different generation.
    PreconditionMismatch,
    /// 404: the object (or bucket) does not exist, or the adapter
    /// reported a synthetic absence for an expired lock.
    Absent,
    /// Retry with backoff: 408, 429, 500, 502, 503, 504, or a transport
    /// error the client flags as a timeout or connect failure.
    Transient,
    /// Everything else; surfaced to the caller.
    Fatal,
}

pub(crate) fn classify(result: &Result<StoreResponse>) -> Outcome {
    match result {
        Ok(response) => classify_status(response.status),
        Err(Error::Transport(err)) if err.is_timeout() || err.is_connect() => Outcome::Transient,
        Err(_) => Outcome::Fatal,
    }
}

fn classify_status(status: StatusCode) -> Outcome {
    match status {
        StatusCode::OK | StatusCode::NO_CONTENT => Outcome::Success,
        StatusCode::PRECONDITION_FAILED => Outcome::PreconditionMismatch,
        StatusCode::NOT_FOUND => Outcome::Absent,
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Outcome::Transient,
        _ => Outcome::Fatal,
    }
}

/// Converts a non-retryable result into the error surfaced to callers.
///
/// Callers only reach this after `classify` returned `Fatal` (or an
/// outcome the protocol treats as terminal at that point).
pub(crate) fn fatal_error(result: Result<StoreResponse>) -> Error {
    match result {
        Ok(response) => Error::Remote {
            status: response.status.as_u16(),
            message: response
                .status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string(),
        },
        Err(err) => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> Result<StoreResponse> {
        Ok(StoreResponse {
            status: StatusCode::from_u16(status).expect("valid status"),
            generation: String::new(),
        })
    }

    #[test]
    fn success_statuses() {
        assert_eq!(classify(&response(200)), Outcome::Success);
        assert_eq!(classify(&response(204)), Outcome::Success);
    }

    #[test]
    fn protocol_statuses() {
        assert_eq!(classify(&response(412)), Outcome::PreconditionMismatch);
        assert_eq!(classify(&response(404)), Outcome::Absent);
    }

    #[test]
    fn transient_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert_eq!(classify(&response(status)), Outcome::Transient, "{status}");
        }
    }

    #[test]
    fn everything_else_is_fatal() {
        for status in [301, 400, 401, 403, 409, 501] {
            assert_eq!(classify(&response(status)), Outcome::Fatal, "{status}");
        }
    }

    #[test]
    fn non_transport_errors_are_fatal() {
        let result: Result<StoreResponse> = Err(Error::StaleLock);
        assert_eq!(classify(&result), Outcome::Fatal);
    }

    #[test]
    fn fatal_error_carries_status_and_text() {
        let err = fatal_error(response(403));
        match err {
            Error::Remote { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
