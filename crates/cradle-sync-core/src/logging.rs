//! Log output setup for hosts embedding the engine.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Default directives when neither `RUST_LOG` nor an explicit filter is given.
pub const DEFAULT_FILTER: &str = "info,rusqlite=warn";

/// Install a stderr subscriber.
///
/// `RUST_LOG` wins over `filter` when set. Calling this a second time is an
/// error, since the global subscriber can only be installed once.
pub fn init_logging(filter: Option<&str>) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::try_new(filter.unwrap_or(DEFAULT_FILTER))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("logging already initialised: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_filter_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(init_logging(Some("cradle_sync_core=loudest")).is_err());
    }
}
