//! Subscriber setup for binaries.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to whoever embeds it. `RUST_LOG`, when set, takes precedence over the
//! configured level.

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered at `level`.
///
/// Fails if `level` is not a valid filter directive or a global subscriber
/// is already installed.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}
