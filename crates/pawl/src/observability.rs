//! Logging initialisation.
//!
//! The lock core emits `tracing` events on protocol transitions;
//! applications that do not already install a subscriber can call
//! [`init_logging`] once at startup.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initialises the logging subsystem. Safe to call multiple times;
/// subsequent calls are no-ops. Levels come from `RUST_LOG`, defaulting
/// to `info`.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let output: Box<dyn Layer<Registry> + Send + Sync> = match format {
            LogFormat::Json => fmt::layer().json().boxed(),
            LogFormat::Pretty => fmt::layer().pretty().boxed(),
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        Registry::default().with(output).with(filter).init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }
}
