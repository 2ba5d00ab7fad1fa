//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,lumen_rhi=debug,lumen_renderer=debug";

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (`RUST_LOG`)
/// - Target and thread id annotations, useful when several threads record
///   command lists at once
///
/// # Example
/// ```
/// lumen_core::init_logging();
/// tracing::info!("RHI initialized");
/// ```
pub fn init_logging() {
    init_logging_with(DEFAULT_FILTER);
}

/// Initialize logging with an explicit fallback filter.
///
/// `RUST_LOG` still takes precedence when present. Calling this more than once
/// is harmless; later calls are ignored.
pub fn init_logging_with(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
