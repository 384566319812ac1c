//! The mutex state machine.
//!
//! A [`Mutex`] is a global, mutual-exclusion lock that uses an object in
//! Google Cloud Storage to serialize computations across the internet.
//! The object's presence means the lock is held by someone; its
//! server-assigned generation is the token that makes every write a
//! compare-and-swap.
//!
//! A lock can optionally carry a small opaque payload while it is held.
//! Given the latency of object storage, the lock is best used to
//! serialize long-running, high-latency work: critical sections should
//! span seconds. Expect an uncontended acquisition to take tens to
//! hundreds of milliseconds, and a contended one multiple seconds after
//! release.
//!
//! A handle is not safe for concurrent use; operations take `&mut self`,
//! so the borrow checker enforces serialisation. It is fine to move a
//! handle between tasks, and to acquire on one task and release on
//! another.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backoff::{Exponential, Linear};
use crate::client::{self, StorageClient};
use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::retry::{classify, fatal_error, Outcome};
use crate::store::{LockStore, StoreResponse};

/// Default object-store endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Construction parameters for a [`Mutex`].
#[derive(Debug, Clone)]
pub struct Config {
    bucket: String,
    object: String,
    ttl: Duration,
    endpoint: String,
    client: Option<std::sync::Arc<StorageClient>>,
}

impl Config {
    /// Creates a config for the lock object at `bucket`/`object` with no
    /// expiry (TTL 0).
    #[must_use]
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            ttl: Duration::ZERO,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client: None,
        }
    }

    /// Sets the time-to-live written with the lock object.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Overrides the object-store endpoint (emulators, private hosts).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Uses `client` for this handle instead of the process-wide one.
    #[must_use]
    pub fn with_client(mut self, client: std::sync::Arc<StorageClient>) -> Self {
        self.client = Some(client);
        self
    }
}

/// A global mutual-exclusion lock backed by one object in Google Cloud
/// Storage.
#[derive(Debug)]
pub struct Mutex {
    store: LockStore,
    bucket: String,
    ttl_seconds: u64,
    generation: String,
}

impl Mutex {
    /// Creates a handle for the lock object at `bucket`/`object` with
    /// the given time-to-live, using the process-wide HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if the process-wide client has to
    /// be initialised and default-credential discovery fails.
    pub async fn new(
        bucket: impl Into<String>,
        object: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self> {
        Self::with_config(Config::new(bucket, object).with_ttl(ttl)).await
    }

    /// Creates a handle from an explicit [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if no client was injected and the
    /// process-wide one cannot be initialised.
    pub async fn with_config(config: Config) -> Result<Self> {
        let client = match config.client {
            Some(client) => client,
            None => client::shared().await?,
        };
        let store = LockStore::new(client, &config.endpoint, &config.bucket, &config.object);
        let mut mutex = Self {
            store,
            bucket: config.bucket,
            ttl_seconds: 0,
            generation: String::new(),
        };
        mutex.set_ttl(config.ttl);
        Ok(mutex)
    }

    /// The time-to-live written when the lock is acquired, extended, or
    /// updated. Zero means the lock never expires.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Sets the time-to-live, rounding up to the next whole second.
    /// Zero means the lock never expires.
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl_seconds = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    }

    /// Returns true if this handle currently holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        !self.generation.is_empty()
    }

    /// Acquires the lock, blocking until it is available or `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`], [`Error::BucketAbsent`], or a fatal remote
    /// error.
    ///
    /// # Panics
    ///
    /// Panics if the handle already holds the lock.
    pub async fn lock(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.lock_with(cancel, Payload::Empty).await
    }

    /// Acquires the lock with an attached payload, blocking until it is
    /// available or `cancel` fires.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`], [`Error::BucketAbsent`], or a fatal remote
    /// error. Cancellation leaves the handle unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the handle already holds the lock.
    pub async fn lock_with(&mut self, cancel: &CancellationToken, payload: Payload) -> Result<()> {
        assert!(!self.is_held(), "pawl: lock of locked mutex");

        // Initially expect the lock object not to exist.
        let mut expected = String::from("0");
        // Exponential backoff because we do not hold the lock.
        let mut backoff = Exponential::new();

        loop {
            // Create or replace the lock object at the expected generation.
            let put = self
                .store
                .put_if_generation(cancel, &expected, &payload, self.ttl_seconds)
                .await;
            let mut probe = match classify(&put) {
                Outcome::Success => {
                    self.generation = generation_of(&put);
                    tracing::debug!(generation = %self.generation, "lock acquired");
                    return Ok(());
                }
                Outcome::Absent => {
                    return Err(Error::BucketAbsent {
                        bucket: self.bucket.clone(),
                    })
                }
                Outcome::PreconditionMismatch => {
                    // The object exists at another generation; inspect it.
                    self.store.inspect(cancel, None).await
                }
                Outcome::Transient => put,
                Outcome::Fatal => return Err(fatal_error(put)),
            };

            // While the lock object exists, and for transient failures,
            // back off and inspect again.
            while matches!(classify(&probe), Outcome::Success | Outcome::Transient) {
                backoff.wait(cancel).await?;
                probe = self.store.inspect(cancel, None).await;
            }

            match classify(&probe) {
                Outcome::Absent => {
                    // Gone or expired. The generation the server just
                    // reported becomes the precondition for the next
                    // attempt, so we cannot race a concurrent acquirer
                    // that expects the object to be absent.
                    expected = generation_of(&probe);
                    if expected.is_empty() {
                        expected.push('0');
                    }
                }
                _ => return Err(fatal_error(probe)),
            }
        }
    }

    /// Attempts to acquire the lock without waiting for a live holder.
    /// Returns false if the lock is already in use.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`], [`Error::BucketAbsent`], or a fatal remote
    /// error.
    ///
    /// # Panics
    ///
    /// Panics if the handle already holds the lock.
    pub async fn try_lock(&mut self, cancel: &CancellationToken) -> Result<bool> {
        self.try_lock_with(cancel, Payload::Empty, None).await
    }

    /// Attempts to acquire the lock with an attached payload. Returns
    /// false if the lock is already in use; in that case, when `sink` is
    /// supplied, it is filled (best-effort) with the current holder's
    /// payload.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`], [`Error::BucketAbsent`], or a fatal remote
    /// error.
    ///
    /// # Panics
    ///
    /// Panics if the handle already holds the lock.
    pub async fn try_lock_with(
        &mut self,
        cancel: &CancellationToken,
        payload: Payload,
        mut sink: Option<&mut Vec<u8>>,
    ) -> Result<bool> {
        assert!(!self.is_held(), "pawl: lock of locked mutex");

        // Exponential backoff because we do not hold the lock.
        let mut backoff = Exponential::new();

        loop {
            // Inspect first: a held, unexpired lock is an immediate "no".
            let mut result = self.store.inspect(cancel, sink.as_deref_mut()).await;
            match classify(&result) {
                Outcome::Success => return Ok(false),
                Outcome::Absent => {
                    // Gone or expired; acquire at the generation we just
                    // observed.
                    let expected = generation_of(&result);
                    result = self
                        .store
                        .put_if_generation(cancel, &expected, &payload, self.ttl_seconds)
                        .await;
                    match classify(&result) {
                        Outcome::Success => {
                            self.generation = generation_of(&result);
                            tracing::debug!(generation = %self.generation, "lock acquired");
                            return Ok(true);
                        }
                        Outcome::Absent => {
                            return Err(Error::BucketAbsent {
                                bucket: self.bucket.clone(),
                            })
                        }
                        Outcome::PreconditionMismatch => {
                            // Recreated under us; look again.
                            continue;
                        }
                        Outcome::Transient | Outcome::Fatal => {}
                    }
                }
                Outcome::PreconditionMismatch | Outcome::Transient | Outcome::Fatal => {}
            }

            if classify(&result) == Outcome::Transient {
                backoff.wait(cancel).await?;
                continue;
            }
            return Err(fatal_error(result));
        }
    }

    /// Releases the lock, deleting any attached payload.
    ///
    /// # Errors
    ///
    /// [`Error::StaleLock`] if the lock had already expired and been
    /// taken over (or deleted); mutual exclusion was not ensured. The
    /// handle keeps its generation so the caller can [`abandon`] after
    /// reconciling. Also [`Error::Cancelled`] or a fatal remote error.
    ///
    /// [`abandon`]: Self::abandon
    ///
    /// # Panics
    ///
    /// Panics if the handle does not hold the lock.
    pub async fn unlock(&mut self, cancel: &CancellationToken) -> Result<()> {
        assert!(self.is_held(), "pawl: unlock of unlocked mutex");

        // Linear backoff because we hold the lock.
        let mut backoff = Linear::new();

        loop {
            let result = self
                .store
                .delete_if_generation(cancel, &self.generation)
                .await;
            match classify(&result) {
                Outcome::Success => {
                    self.generation.clear();
                    tracing::debug!("lock released");
                    return Ok(());
                }
                Outcome::PreconditionMismatch | Outcome::Absent => {
                    // Another generation, or already gone: we had lost it.
                    tracing::warn!("stale lock detected on unlock");
                    return Err(Error::StaleLock);
                }
                Outcome::Transient => backoff.wait(cancel).await?,
                Outcome::Fatal => return Err(fatal_error(result)),
            }
        }
    }

    /// Extends the expiration time of the lock, keeping any attached
    /// payload. The object is composed from itself server-side, which
    /// refreshes `Last-Modified` without rewriting the body.
    ///
    /// # Errors
    ///
    /// [`Error::StaleLock`] if the lock has already expired and mutual
    /// exclusion can not be ensured. Also [`Error::Cancelled`] or a
    /// fatal remote error.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not hold the lock.
    pub async fn extend(&mut self, cancel: &CancellationToken) -> Result<()> {
        assert!(self.is_held(), "pawl: extend of unlocked mutex");

        // Linear backoff because we hold the lock.
        let mut backoff = Linear::new();

        loop {
            let result = self
                .store
                .compose_self(cancel, &self.generation, self.ttl_seconds)
                .await;
            match classify(&result) {
                Outcome::Success => {
                    self.generation = generation_of(&result);
                    return Ok(());
                }
                Outcome::PreconditionMismatch | Outcome::Absent => {
                    tracing::warn!("stale lock detected on extend");
                    return Err(Error::StaleLock);
                }
                Outcome::Transient => backoff.wait(cancel).await?,
                Outcome::Fatal => return Err(fatal_error(result)),
            }
        }
    }

    /// Replaces the attached payload, extending the expiration time of
    /// the lock.
    ///
    /// # Errors
    ///
    /// [`Error::StaleLock`] if the lock has already expired and mutual
    /// exclusion can not be ensured. Also [`Error::Cancelled`] or a
    /// fatal remote error.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not hold the lock.
    pub async fn update(&mut self, cancel: &CancellationToken, payload: Payload) -> Result<()> {
        assert!(self.is_held(), "pawl: update of unlocked mutex");

        // Linear backoff because we hold the lock.
        let mut backoff = Linear::new();

        loop {
            let result = self
                .store
                .put_if_generation(cancel, &self.generation, &payload, self.ttl_seconds)
                .await;
            match classify(&result) {
                Outcome::Success => {
                    self.generation = generation_of(&result);
                    return Ok(());
                }
                Outcome::PreconditionMismatch | Outcome::Absent => {
                    tracing::warn!("stale lock detected on update");
                    return Err(Error::StaleLock);
                }
                Outcome::Transient => backoff.wait(cancel).await?,
                Outcome::Fatal => return Err(fatal_error(result)),
            }
        }
    }

    /// Reports whether the lock is currently held by anyone, filling
    /// `sink` with the holder's payload when one is supplied. An expired
    /// lock reads as not held. Never mutates the handle.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] or a fatal remote error.
    pub async fn inspect(
        &self,
        cancel: &CancellationToken,
        mut sink: Option<&mut Vec<u8>>,
    ) -> Result<bool> {
        // Exponential backoff because we do not (necessarily) hold the lock.
        let mut backoff = Exponential::new();

        loop {
            let result = self.store.inspect(cancel, sink.as_deref_mut()).await;
            match classify(&result) {
                Outcome::Success => return Ok(true),
                Outcome::Absent => return Ok(false),
                Outcome::Transient => backoff.wait(cancel).await?,
                Outcome::PreconditionMismatch | Outcome::Fatal => {
                    return Err(fatal_error(result))
                }
            }
        }
    }

    /// Abandons the lock, returning an id that can later be handed to
    /// [`adopt`]. The remote object persists; it is released only by an
    /// adopter's unlock or by eventual expiration.
    ///
    /// [`adopt`]: Self::adopt
    ///
    /// # Panics
    ///
    /// Panics if the handle does not hold the lock.
    pub fn abandon(&mut self) -> String {
        assert!(self.is_held(), "pawl: abandon of unlocked mutex");
        std::mem::take(&mut self.generation)
    }

    /// Adopts an abandoned lock, then extends it to prove mutual
    /// exclusion still holds.
    ///
    /// # Errors
    ///
    /// [`Error::StaleLock`] if the proof fails: the abandoned lock had
    /// expired and been taken over. Also [`Error::Cancelled`] or a fatal
    /// remote error.
    ///
    /// # Panics
    ///
    /// Panics if the handle already holds the lock, or if `id` is empty
    /// or `"0"`.
    pub async fn adopt(&mut self, cancel: &CancellationToken, id: &str) -> Result<()> {
        assert!(!self.is_held(), "pawl: adopt on locked mutex");
        assert!(!id.is_empty() && id != "0", "pawl: adopt of invalid lock");

        self.generation = id.to_string();
        self.extend(cancel).await
    }

    /// Adopts an abandoned lock, then replaces its payload to prove
    /// mutual exclusion still holds.
    ///
    /// # Errors
    ///
    /// [`Error::StaleLock`] if the proof fails. Also
    /// [`Error::Cancelled`] or a fatal remote error.
    ///
    /// # Panics
    ///
    /// Panics if the handle already holds the lock, or if `id` is empty
    /// or `"0"`.
    pub async fn adopt_with(
        &mut self,
        cancel: &CancellationToken,
        id: &str,
        payload: Payload,
    ) -> Result<()> {
        assert!(!self.is_held(), "pawl: adopt on locked mutex");
        assert!(!id.is_empty() && id != "0", "pawl: adopt of invalid lock");

        self.generation = id.to_string();
        self.update(cancel, payload).await
    }
}

fn generation_of(result: &Result<StoreResponse>) -> String {
    match result {
        Ok(response) => response.generation.clone(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn handle() -> Mutex {
        let client = Arc::new(StorageClient::unauthenticated().expect("client"));
        let store = LockStore::new(client, DEFAULT_ENDPOINT, "bucket", "object.lock");
        Mutex {
            store,
            bucket: "bucket".to_string(),
            ttl_seconds: 0,
            generation: String::new(),
        }
    }

    fn held_handle() -> Mutex {
        let mut m = handle();
        m.generation = "1234".to_string();
        m
    }

    #[test]
    fn ttl_normalisation_rounds_up_to_whole_seconds() {
        let cases = [
            (Duration::ZERO, 0),
            (Duration::from_nanos(1), 1),
            (Duration::from_micros(1), 1),
            (Duration::from_millis(1), 1),
            (Duration::from_secs(1), 1),
            (Duration::from_secs(1) - Duration::from_nanos(1), 1),
            (Duration::from_secs(1) + Duration::from_nanos(1), 2),
        ];
        let mut m = handle();
        for (input, expected) in cases {
            m.set_ttl(input);
            assert_eq!(m.ttl(), Duration::from_secs(expected), "{input:?}");
        }
    }

    #[test]
    fn held_iff_generation_nonempty() {
        let mut m = handle();
        assert!(!m.is_held());
        m.generation = "77".to_string();
        assert!(m.is_held());
    }

    #[test]
    fn abandon_returns_generation_and_clears_handle() {
        let mut m = held_handle();
        assert_eq!(m.abandon(), "1234");
        assert!(!m.is_held());
    }

    #[test]
    #[should_panic(expected = "abandon of unlocked mutex")]
    fn abandon_of_unlocked_mutex_panics() {
        let mut m = handle();
        let _ = m.abandon();
    }

    #[tokio::test]
    #[should_panic(expected = "lock of locked mutex")]
    async fn lock_of_locked_mutex_panics() {
        let mut m = held_handle();
        let _ = m.lock(&CancellationToken::new()).await;
    }

    #[tokio::test]
    #[should_panic(expected = "lock of locked mutex")]
    async fn try_lock_of_locked_mutex_panics() {
        let mut m = held_handle();
        let _ = m.try_lock(&CancellationToken::new()).await;
    }

    #[tokio::test]
    #[should_panic(expected = "unlock of unlocked mutex")]
    async fn unlock_of_unlocked_mutex_panics() {
        let mut m = handle();
        let _ = m.unlock(&CancellationToken::new()).await;
    }

    #[tokio::test]
    #[should_panic(expected = "extend of unlocked mutex")]
    async fn extend_of_unlocked_mutex_panics() {
        let mut m = handle();
        let _ = m.extend(&CancellationToken::new()).await;
    }

    #[tokio::test]
    #[should_panic(expected = "update of unlocked mutex")]
    async fn update_of_unlocked_mutex_panics() {
        let mut m = handle();
        let _ = m.update(&CancellationToken::new(), Payload::Empty).await;
    }

    #[tokio::test]
    #[should_panic(expected = "adopt on locked mutex")]
    async fn adopt_on_locked_mutex_panics() {
        let mut m = held_handle();
        let _ = m.adopt(&CancellationToken::new(), "99").await;
    }

    #[tokio::test]
    #[should_panic(expected = "adopt of invalid lock")]
    async fn adopt_of_zero_generation_panics() {
        let mut m = handle();
        let _ = m.adopt(&CancellationToken::new(), "0").await;
    }

    #[tokio::test]
    #[should_panic(expected = "adopt of invalid lock")]
    async fn adopt_of_empty_generation_panics() {
        let mut m = handle();
        let _ = m.adopt(&CancellationToken::new(), "").await;
    }
}
