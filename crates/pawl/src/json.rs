//! Typed payload wrappers.
//!
//! Thin serde adapters over the byte payload API. The lock core never
//! interprets payload bytes; these helpers only encode at the boundary.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::mutex::Mutex;
use crate::payload::Payload;

impl Mutex {
    /// Acquires the lock with the JSON encoding of `value` attached.
    ///
    /// # Errors
    ///
    /// [`Error::Codec`] if encoding fails; otherwise as
    /// [`lock_with`](Self::lock_with).
    ///
    /// # Panics
    ///
    /// Panics if the handle already holds the lock.
    pub async fn lock_json<T: Serialize>(
        &mut self,
        cancel: &CancellationToken,
        value: &T,
    ) -> Result<()> {
        self.lock_with(cancel, encode(value)?).await
    }

    /// Attempts to acquire the lock with the JSON encoding of `value`
    /// attached. If the lock is already in use, `value` is replaced with
    /// the current holder's payload (when it decodes).
    ///
    /// # Errors
    ///
    /// [`Error::Codec`] if encoding or decoding fails; otherwise as
    /// [`try_lock_with`](Self::try_lock_with).
    ///
    /// # Panics
    ///
    /// Panics if the handle already holds the lock.
    pub async fn try_lock_json<T: Serialize + DeserializeOwned>(
        &mut self,
        cancel: &CancellationToken,
        value: &mut T,
    ) -> Result<bool> {
        let payload = encode(value)?;
        let mut sink = Vec::new();
        let locked = self.try_lock_with(cancel, payload, Some(&mut sink)).await?;
        if !locked && !sink.is_empty() {
            *value = serde_json::from_slice(&sink).map_err(|e| Error::codec(&e))?;
        }
        Ok(locked)
    }

    /// Replaces the attached payload with the JSON encoding of `value`.
    ///
    /// # Errors
    ///
    /// [`Error::Codec`] if encoding fails; otherwise as
    /// [`update`](Self::update).
    ///
    /// # Panics
    ///
    /// Panics if the handle does not hold the lock.
    pub async fn update_json<T: Serialize>(
        &mut self,
        cancel: &CancellationToken,
        value: &T,
    ) -> Result<()> {
        let payload = encode(value)?;
        self.update(cancel, payload).await
    }

    /// Adopts an abandoned lock, proving mutual exclusion by writing the
    /// JSON encoding of `value` as the new payload.
    ///
    /// # Errors
    ///
    /// [`Error::Codec`] if encoding fails; otherwise as
    /// [`adopt_with`](Self::adopt_with).
    ///
    /// # Panics
    ///
    /// Panics if the handle already holds the lock, or if `id` is
    /// invalid.
    pub async fn adopt_json<T: Serialize>(
        &mut self,
        cancel: &CancellationToken,
        id: &str,
        value: &T,
    ) -> Result<()> {
        let payload = encode(value)?;
        self.adopt_with(cancel, id, payload).await
    }

    /// Reports whether the lock is held, decoding the holder's payload
    /// when it is.
    ///
    /// # Errors
    ///
    /// [`Error::Codec`] if the payload does not decode as `T`; otherwise
    /// as [`inspect`](Self::inspect).
    pub async fn inspect_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(bool, Option<T>)> {
        let mut sink = Vec::new();
        let locked = self.inspect(cancel, Some(&mut sink)).await?;
        if locked && !sink.is_empty() {
            let value = serde_json::from_slice(&sink).map_err(|e| Error::codec(&e))?;
            return Ok((true, Some(value)));
        }
        Ok((locked, None))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Payload> {
    let bytes = serde_json::to_vec(value).map_err(|e| Error::codec(&e))?;
    Ok(Payload::from(bytes))
}
