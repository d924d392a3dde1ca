//! Fjord Logging - subscriber setup
//!
//! Libraries in this workspace only emit `tracing` events. Applications pick
//! how they are rendered by calling one of the functions here once at start-up.
//! `RUST_LOG` takes precedence over the built-in default filter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "fjord=info";

/// Install the fmt subscriber with [`DEFAULT_FILTER`].
///
/// # Panics
///
/// Panics if a global subscriber is already installed; use [`try_init`] in
/// code that may run more than once, such as tests.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Install the fmt subscriber, falling back to `default_filter`.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_with_filter(default_filter: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Like [`init`], but reports an existing subscriber instead of panicking.
pub fn try_init() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(DEFAULT_FILTER))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init()
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_init_is_repeatable() {
        let _ = try_init();
        assert!(try_init().is_err());
        tracing::info!("logging initialized");
    }
}
