//! Immutable configuration, built once from the environment.
//!
//! ## Loading
//!
//! `Config::from_env()` reads every recognized environment variable,
//! applying validated defaults for anything unset. Invalid values are a
//! configuration error (exit code 2), not a recoverable condition.
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(Config::from_env()?);
//! let threshold = config::get().radar.noise_threshold_mph;
//! ```

mod defaults;
mod env;

pub use defaults::*;
pub use env::{Config, ConfigError};

use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Initialize the global configuration. Must be called exactly once before
/// any call to `get()`.
pub fn init(config: Config) {
    if CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global configuration.
///
/// Panics if `init()` has not been called — a missing config is a startup
/// bug, not a recoverable condition.
pub fn get() -> &'static Config {
    CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}
