//! Diagnostic tracing for the watchdog and the in-host runner.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: operator diagnostics via `RUST_LOG`, output to
//!   stderr. Not persisted.
//!
//! - **Batch artifacts**: the ledger, QC notes (`qc_errors/`) and per-item
//!   command logs (`logs/`). Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset, since relaunch and crash
/// attribution events are what an operator watches for.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=batchkeeper=debug batchkeeper start
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
