//! Rewindable payload sources.
//!
//! The lock protocol retries HTTP requests, so any payload attached to a
//! lock must be re-readable on every attempt. [`Payload`] admits only
//! sources that can be replayed for free: an explicit empty marker, or an
//! in-memory buffer. Non-rewindable streams are unrepresentable by
//! construction.
//!
//! The lock core never inspects payload bytes.

use bytes::Bytes;

/// A rewindable byte source attached to a lock.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    /// No payload; the lock object is written with an empty body.
    #[default]
    Empty,
    /// An in-memory buffer, re-read on each retry.
    Bytes(Bytes),
}

impl Payload {
    /// Returns true if this payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(b) => b.is_empty(),
        }
    }

    /// Length of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Bytes(b) => b.len(),
        }
    }

    /// Produces a request body for one attempt. Cheap: the underlying
    /// buffer is reference-counted.
    pub(crate) fn to_body(&self) -> reqwest::Body {
        match self {
            Self::Empty => reqwest::Body::from(Bytes::new()),
            Self::Bytes(b) => reqwest::Body::from(b.clone()),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Bytes(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_has_no_bytes() {
        let p = Payload::Empty;
        assert!(p.is_empty());
        assert_eq!(p.len(), 0);
    }

    #[test]
    fn conversions_preserve_bytes() {
        let from_str = Payload::from("hello");
        let from_vec = Payload::from(b"hello".to_vec());
        let from_bytes = Payload::from(Bytes::from_static(b"hello"));
        for p in [from_str, from_vec, from_bytes] {
            assert_eq!(p.len(), 5);
            assert!(!p.is_empty());
        }
    }

    #[test]
    fn default_is_empty() {
        assert!(Payload::default().is_empty());
    }
}
