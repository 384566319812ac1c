//! Shared test utilities for pawl's integration tests.
//!
//! Provides [`FakeGcs`], an in-process HTTP emulator of the object-store
//! subset the lock protocol uses, with an adjustable server clock, fault
//! injection, and request counters.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code.
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod server;

pub use server::FakeGcs;

use std::sync::Arc;
use std::time::Duration;

/// Builds an unauthenticated lock handle pointed at the emulator.
pub async fn lock_handle(gcs: &FakeGcs, bucket: &str, object: &str, ttl: Duration) -> pawl::Mutex {
    let client = Arc::new(pawl::StorageClient::unauthenticated().expect("client"));
    pawl::Mutex::with_config(
        pawl::Config::new(bucket, object)
            .with_ttl(ttl)
            .with_endpoint(gcs.endpoint())
            .with_client(client),
    )
    .await
    .expect("mutex")
}

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pawl=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
