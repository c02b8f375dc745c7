//! Log output for the bridges.
//!
//! Everything in the crate logs through `tracing`. On Android the events are
//! forwarded through the `log` facade to logcat; elsewhere a `fmt`
//! subscriber filtered by `RUST_LOG` is installed.

use std::sync::Once;

/// Logcat tag.
pub const LOG_TAG: &str = "OlmPk";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

/// Installs the platform logger. Safe to call any number of times; a
/// subscriber installed by the host application is left in place.
pub fn init() {
    INIT.call_once(install);
}

#[cfg(target_os = "android")]
fn install() {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag(LOG_TAG),
    );
}

#[cfg(not(target_os = "android"))]
fn install() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
