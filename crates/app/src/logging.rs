use tracing_subscriber::EnvFilter;

use crate::error::{AppError, Result};

/// Installs the global subscriber, writing to stderr so stdout stays free
/// for command output. `RUST_LOG` wins over `default_filter`.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|err| AppError::InvalidInput(format!("log filter {default_filter:?}: {err}")))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| AppError::Message(format!("init logging: {err}")))
}
