//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - IngestConfig: Where sensor nodes connect and how much they may send.
//!     - StoreConfig: Location of the csv record store.
//!     - AggregatorConfig: Poll period and history retention.
//!     - HttpConfig: Where the dashboard fetches /data.
//!     - LoggingConfig: Default log level and per-tick reading dumps.
//!
//! every section and every field is optional in the file.
//!
//! ==============================================================================

use anyhow::{bail, Context};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HubConfig {
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub aggregator: AggregatorConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
    /// file this config came from, None for built-in defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
    /// files found but rejected by `load_or_default`, with the reason
    #[serde(skip)]
    pub rejected: Vec<(PathBuf, String)>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub listen: SocketAddr,
    /// one read of at most this many bytes makes up the whole frame
    pub max_payload_bytes: usize,
    /// close a connection that sends nothing for this long
    pub idle_timeout_ms: u64,
    /// channel tags stripped from the front of a frame
    pub channel_prefixes: Vec<String>,
}

impl IngestConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8081)),
            max_payload_bytes: 1024,
            idle_timeout_ms: 5000,
            channel_prefixes: vec!["UART:".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sensor_data.csv"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AggregatorConfig {
    pub interval_seconds: u64,
    /// points kept per history series; unset keeps everything
    pub history_limit: Option<usize>,
}

impl AggregatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 2,
            history_limit: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: HubConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before logging is set up, so rejected files are kept on the
    /// result and reported by `print_summary`
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("hub.toml"),
            PathBuf::from("..").join("config").join("hub.toml"),
        ];

        let mut rejected = Vec::new();
        for path in paths {
            if path.exists() {
                match Self::load(&path) {
                    Ok(mut config) => {
                        config.rejected = rejected;
                        return config;
                    }
                    Err(e) => rejected.push((path, format!("{e:#}"))),
                }
            }
        }

        Self {
            rejected,
            ..Self::default()
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.ingest.max_payload_bytes == 0 {
            bail!("ingest.max_payload_bytes must be greater than zero");
        }
        if self.aggregator.interval_seconds == 0 {
            bail!("aggregator.interval_seconds must be greater than zero");
        }
        if self.aggregator.history_limit == Some(0) {
            bail!("aggregator.history_limit must be greater than zero when set");
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        for (path, error) in &self.rejected {
            tracing::warn!(path = %path.display(), %error, "ignored config file");
        }
        match &self.source {
            Some(path) => tracing::info!(path = %path.display(), "loaded config"),
            None => tracing::warn!("no config file found, using defaults"),
        }
        tracing::info!(
            ingest = %self.ingest.listen,
            http = %self.http.listen,
            store = %self.store.path.display(),
            poll_interval_s = self.aggregator.interval_seconds,
            history_limit = ?self.aggregator.history_limit,
            max_payload_bytes = self.ingest.max_payload_bytes,
            "hub configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = HubConfig::from_toml("").unwrap();
        assert_eq!(config.ingest.listen.port(), 8081);
        assert_eq!(config.ingest.max_payload_bytes, 1024);
        assert_eq!(config.ingest.channel_prefixes, ["UART:"]);
        assert_eq!(config.aggregator.interval(), Duration::from_secs(2));
        assert_eq!(config.aggregator.history_limit, None);
        assert_eq!(config.http.listen.port(), 8000);
        assert_eq!(config.source, None);
    }

    #[test]
    fn test_load_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = HubConfig::load(&path).unwrap();
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        assert_eq!(config.logging.level, "debug");
        assert!(HubConfig::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_partial_sections_override() {
        let config = HubConfig::from_toml(
            r#"
            [store]
            path = "/var/lib/hub/data.csv"

            [aggregator]
            history_limit = 500

            [ingest]
            idle_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.store.path, PathBuf::from("/var/lib/hub/data.csv"));
        assert_eq!(config.aggregator.history_limit, Some(500));
        assert_eq!(config.aggregator.interval_seconds, 2);
        assert_eq!(config.ingest.idle_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(HubConfig::from_toml("[aggregator]\ninterval_seconds = 0").is_err());
        assert!(HubConfig::from_toml("[aggregator]\nhistory_limit = 0").is_err());
        assert!(HubConfig::from_toml("[ingest]\nmax_payload_bytes = 0").is_err());
        assert!(HubConfig::from_toml("[ingest]\nlisten = \"not an address\"").is_err());
    }
}
