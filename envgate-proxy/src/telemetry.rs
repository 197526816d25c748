use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter directive for a `LOG_LEVEL` value
///
/// Accepts the usual level names in any case, plus `warning` and `critical`.
pub fn level_directive(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

/// Install the global subscriber, bridging `log` records into it
///
/// `RUST_LOG` wins over `LOG_LEVEL` when set.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level_directive(level))?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()?;
    Ok(())
}
