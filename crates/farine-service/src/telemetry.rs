//! Tracing setup for binaries embedding the service.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,farine=debug,sqlx=warn";

/// Installs the global fmt subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
