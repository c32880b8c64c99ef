//! Tracing bootstrap.

/// Initialize tracing with an env-filter and a console formatter.
///
/// Intended for binaries and tests embedding the engine; libraries
/// only emit through the `tracing` macros. Safe to call more than
/// once: later calls leave the first subscriber in place.
pub fn init_logging() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
