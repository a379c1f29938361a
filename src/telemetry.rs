//! Tracing setup for binaries and examples.
//!
//! Library code only emits through `tracing`; installing a subscriber is
//! the embedding application's call. [`init`] is a convenience for binaries
//! and tests that want sensible console output with `RUST_LOG` filtering.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a console `tracing` subscriber honoring `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Idempotent: later calls
/// (and an already-installed global subscriber) are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
