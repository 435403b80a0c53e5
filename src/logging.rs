use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs the global subscriber. `RUST_LOG` wins over the `debug` switch.
pub(crate) fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    // A subscriber may already be installed when running under a test harness.
    tracing::subscriber::set_global_default(subscriber).ok();
}
