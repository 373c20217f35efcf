//! Logging setup
//!
//! The engine only emits `tracing` events; embedders that have their own
//! subscriber never need to call [`init`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `EMBER_LOG` nor `RUST_LOG` is set
pub const DEFAULT_FILTER: &str = "ember_core=info";

/// Install a fmt subscriber filtered by `EMBER_LOG`, then `RUST_LOG`
///
/// Returns `false` when a global subscriber was already installed.
pub fn init() -> bool {
    tracing_subscriber::registry()
        .with(filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env("EMBER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
