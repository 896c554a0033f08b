//! Tracing setup for hosts that embed the engine.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,tally=debug,sqlx=warn";

/// Installs a global fmt subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=tally_sync=trace` - Show trace for the engine only
/// - Default: [`DEFAULT_FILTER`]
///
/// Returns `false` if a global subscriber was already installed, which is
/// the normal case when the host application sets up its own.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
