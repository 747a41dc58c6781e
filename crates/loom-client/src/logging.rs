//! Tracing setup

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Filter resolution order: the `LOOM_LOG` env var, then the config's
/// `log_filter`, then a quiet default. Safe to call once per process;
/// a second call is a no-op.
pub fn init(config_filter: Option<&str>) {
    let filter = match EnvFilter::try_from_env("LOOM_LOG") {
        Ok(filter) => filter,
        Err(_) => config_filter
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new("loom=info")),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
