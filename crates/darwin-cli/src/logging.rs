//! Logger setup.

use env_logger::{Builder, Env};

/// Installs the `env_logger` backend with `level` as the default filter.
///
/// `RUST_LOG` overrides `level` when set. Installing twice is harmless: the first logger
/// stays in place.
pub fn init(level: &str) {
    if let Err(err) = Builder::from_env(Env::default().default_filter_or(level)).try_init() {
        log::debug!("logger already installed: {err}");
    }
}
