//! Error types and result alias for pawl.
//!
//! Everything the lock protocol can surface to a caller is one of the
//! variants below. Transient remote failures never appear here; they are
//! retried with backoff until the caller's cancellation token fires, at
//! which point the operation reports [`Error::Cancelled`]. Misuse of a
//! handle (locking a held handle, unlocking an idle one, adopting an
//! invalid id) is a panic, not an error.

/// The result type used throughout pawl.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by lock operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller's cancellation token fired while the operation was
    /// waiting on a backoff timer or an in-flight request.
    #[error("operation cancelled")]
    Cancelled,

    /// Acquisition failed because the bucket does not exist.
    #[error("bucket {bucket:?} does not exist")]
    BucketAbsent {
        /// The bucket that was addressed.
        bucket: String,
    },

    /// A held handle lost its remote object: the lock expired and was
    /// taken over, or was deleted out from under us. Mutual exclusion is
    /// no longer ensured and the caller must reconcile.
    #[error("stale lock: mutual exclusion no longer ensured")]
    StaleLock,

    /// A non-retryable HTTP status from the object store.
    #[error("remote error: http status {status}: {message}")]
    Remote {
        /// The HTTP status code.
        status: u16,
        /// The status text, for diagnostics.
        message: String,
    },

    /// A non-retryable transport failure from the HTTP client.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Default-credential acquisition failed.
    ///
    /// Surfaced on first handle creation, or when a token refresh fails
    /// mid-operation.
    #[error("credential acquisition failed: {message}")]
    Credentials {
        /// Description of the failure.
        message: String,
    },

    /// A typed payload could not be encoded or decoded.
    #[error("payload codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },
}

impl Error {
    /// Creates a credentials error with the given message.
    #[must_use]
    pub fn credentials(message: impl Into<String>) -> Self {
        Self::Credentials {
            message: message.into(),
        }
    }

    pub(crate) fn codec(err: &serde_json::Error) -> Self {
        Self::Codec {
            message: err.to_string(),
        }
    }

    /// Returns true if this error indicates mutual exclusion was lost.
    #[must_use]
    pub fn is_stale_lock(&self) -> bool {
        matches!(self, Self::StaleLock)
    }
}
