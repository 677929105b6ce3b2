//! Sync engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Server location, timeouts and pipeline tuning.
///
/// Every field has a default so a partial JSON document is accepted:
///
/// ```
/// use cradle_sync_core::SyncConfig;
///
/// let config = SyncConfig::from_json(r#"{"hostname": "cradle.example.org"}"#).unwrap();
/// assert_eq!(config.base_url(), "https://cradle.example.org/api");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server host name, without scheme.
    pub hostname: String,
    /// Explicit port; omitted from URLs when `None`.
    pub port: Option<u16>,
    pub use_https: bool,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Minimum interval between two non-final progress reports.
    pub progress_interval_ms: u64,
    /// Bound of each download channel and of the response chunk bridge.
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: None,
            use_https: true,
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
            progress_interval_ms: 75,
            channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Create a config pointing at `hostname` with default tuning.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout_secs = connect.as_secs();
        self.read_timeout_secs = read.as_secs();
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Parse from JSON, applying defaults for missing fields.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file on disk.
    pub fn load<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.hostname.trim().is_empty() {
            return Err(SyncError::Config("hostname must not be empty".into()));
        }
        if self.channel_capacity == 0 {
            return Err(SyncError::Config("channel_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Root of every REST endpoint, e.g. `https://host:5000/api`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{}://{}:{}/api", scheme, self.hostname, port),
            None => format!("{}://{}/api", scheme, self.hostname),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.read_timeout(), Duration::from_secs(30));
        assert_eq!(config.progress_interval(), Duration::from_millis(75));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_with_port() {
        let config = SyncConfig::new("10.0.2.2").with_port(5000).with_https(false);
        assert_eq!(config.base_url(), "http://10.0.2.2:5000/api");
    }

    #[test]
    fn test_from_json_partial() {
        let config = SyncConfig::from_json(r#"{"hostname": "srv", "port": 8443}"#).unwrap();
        assert_eq!(config.hostname, "srv");
        assert_eq!(config.port, Some(8443));
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        assert!(SyncConfig::from_json(r#"{"hostname": " "}"#).is_err());
        assert!(SyncConfig::new("h").with_channel_capacity(0).validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"hostname": "cradle.local", "use_https": false}}"#).unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.base_url(), "http://cradle.local/api");
    }
}
