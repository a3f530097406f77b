//! Structured logging.
//!
//! Enable with `--features tracing`. Without the feature every macro expands to nothing, so the
//! queue's hot paths carry no logging cost.

/// Installs a `tracing-subscriber` formatter that writes to stderr.
///
/// The filter is read from `RUST_LOG` and defaults to `crossbeam_msqueue=trace`. Does nothing if
/// the `tracing` feature is not enabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crossbeam_msqueue=trace"));

    // A subscriber may already be installed, e.g. by a test harness; keep it.
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .with(filter)
        .try_init();
}

/// Installs a `tracing-subscriber` formatter. No-op without the `tracing` feature.
#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::trace;

#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use trace_noop as trace;
