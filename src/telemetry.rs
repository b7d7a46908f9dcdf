use crate::error::{EngineError, Result};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `default_level` when set. Calling this twice is a no-op.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|e| EngineError::ConfigError(format!("log level {default_level}: {e}")))?,
    };

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        debug!(error = %e, "Tracing subscriber already installed; keeping it");
    }
    Ok(())
}
