//! Tracing subscriber setup (§10.1).
//!
//! The protocol core itself only ever calls into `tracing`'s macros; this
//! module is the one place a global subscriber gets installed, kept
//! separate so tests (which install their own, or none) never pull it in.

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`
/// when the variable is unset or unparsable.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
        .context("failed to install tracing subscriber")
}
