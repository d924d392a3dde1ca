//! Process-wide library lifecycle.
//!
//! The UDP engine needs no global setup, but the calls are kept so that
//! applications have a single place to bracket network use. Both are
//! idempotent.

use std::sync::atomic::{AtomicBool, Ordering};

/// Version string of the linked library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static INITIALIZED: AtomicBool = AtomicBool::new(false);

pub fn initialize() {
    if !INITIALIZED.swap(true, Ordering::AcqRel) {
        tracing::info!("fjord {} initialized", VERSION);
    }
}

pub fn deinitialize() {
    if INITIALIZED.swap(false, Ordering::AcqRel) {
        tracing::info!("fjord deinitialized");
    }
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Linked library version packed as `major << 16 | minor << 8 | patch`
pub fn version() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    (part(env!("CARGO_PKG_VERSION_MAJOR")) << 16)
        | (part(env!("CARGO_PKG_VERSION_MINOR")) << 8)
        | part(env!("CARGO_PKG_VERSION_PATCH"))
}
