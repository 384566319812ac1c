//! # pawl
//!
//! A global, mutual-exclusion lock that uses an object in Google Cloud
//! Storage to serialize computations across the internet.
//!
//! The lock object's server-assigned generation turns every write into a
//! compare-and-swap: creation requires the object to be absent, release
//! and extension require the generation the handle acquired. A TTL
//! stored with the object lets contenders take over a lock whose holder
//! died, judged purely by the server's own clock.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> pawl::Result<()> {
//! let cancel = CancellationToken::new();
//! let mut mutex = pawl::Mutex::new("my-bucket", "jobs/nightly.lock", Duration::from_secs(60)).await?;
//!
//! mutex.lock(&cancel).await?;
//! // ... critical section, extending as needed ...
//! mutex.extend(&cancel).await?;
//! mutex.unlock(&cancel).await?;
//! # Ok(())
//! # }
//! ```
//!
//! A handle is not safe for concurrent use by multiple tasks; operations
//! take `&mut self`. Run independent handles on independent tasks.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

mod backoff;
pub mod client;
pub mod error;
mod expire;
mod json;
pub mod locker;
mod mutex;
pub mod observability;
pub mod payload;
mod retry;
mod store;

pub use client::{install_shared_client, StorageClient};
pub use error::{Error, Result};
pub use locker::Locker;
pub use mutex::{Config, Mutex, DEFAULT_ENDPOINT};
pub use observability::{init_logging, LogFormat};
pub use payload::Payload;
