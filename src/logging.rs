use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber based on logging config.
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.trim().to_lowercase()))
        .map_err(|e| anyhow::anyhow!("invalid log level {level:?}: {e}"))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format.trim().to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
