//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use refdex_core::BackoffPolicy;
use refdex_crossref::sink::DEFAULT_RETRY_ON_STATUS;
use refdex_crossref::{ElasticConfig, PipelineConfig, SinkConfig};
use serde::Deserialize;

/// Global configuration for refdex
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub elastic: ElasticSection,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElasticSection {
    pub hosts: Vec<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub username: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub password: Option<String>,
    pub ca_cert: Option<PathBuf>,
    pub compress: bool,
    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for ElasticSection {
    fn default() -> Self {
        let defaults = ElasticConfig::default();
        Self {
            hosts: defaults.hosts,
            username: None,
            password: std::env::var("REFDEX_ES_PASSWORD").ok(),
            ca_cert: None,
            compress: defaults.compress,
            timeout: defaults.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub index: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub flush_bytes: usize,
    /// Linger before a small batch is flushed, in milliseconds
    pub flush_interval_ms: u64,
    pub flush_workers: usize,
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    pub retry_base_ms: u64,
    pub retry_multiplier: f64,
    /// Longest delay between retries, in milliseconds
    pub retry_cap_ms: u64,
    pub retry_on_status: Vec<u16>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            index: pipeline.index,
            workers: cpus.min(8),
            queue_capacity: pipeline.queue_capacity,
            flush_bytes: pipeline.sink.flush_bytes,
            flush_interval_ms: pipeline.sink.flush_interval.as_millis() as u64,
            flush_workers: pipeline.sink.flush_workers,
            max_retries: pipeline.sink.retry.max_retries,
            retry_base_ms: pipeline.sink.retry.base.as_millis() as u64,
            retry_multiplier: pipeline.sink.retry.multiplier,
            retry_cap_ms: pipeline.sink.retry.cap.as_millis() as u64,
            retry_on_status: DEFAULT_RETRY_ON_STATUS.to_vec(),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./refdex.toml (current directory)
    /// 2. ~/.config/refdex/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("refdex.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "refdex") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn elastic_config(&self) -> ElasticConfig {
        let es = &self.elastic;
        ElasticConfig {
            hosts: es.hosts.clone(),
            username: es.username.clone(),
            password: es.password.clone(),
            ca_cert: es.ca_cert.clone(),
            compress: es.compress,
            timeout: Duration::from_secs(es.timeout),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let p = &self.pipeline;
        PipelineConfig {
            workers: p.workers.max(1),
            queue_capacity: p.queue_capacity.max(1),
            index: p.index.clone(),
            sink: SinkConfig {
                flush_bytes: p.flush_bytes,
                flush_interval: Duration::from_millis(p.flush_interval_ms),
                flush_workers: p.flush_workers.max(1),
                retry: BackoffPolicy {
                    max_retries: p.max_retries,
                    base: Duration::from_millis(p.retry_base_ms),
                    multiplier: p.retry_multiplier.max(1.0),
                    cap: Duration::from_millis(p.retry_cap_ms),
                },
                retry_on_status: p.retry_on_status.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.elastic.hosts, ["http://127.0.0.1:9200"]);
        assert_eq!(config.pipeline.index, "crossref");
        assert!(config.pipeline.workers >= 1);
        assert_eq!(config.pipeline.flush_bytes, 5_000_000);
        assert_eq!(config.pipeline.retry_on_status, [429, 502, 503, 504]);
        assert_eq!(config.pipeline_config().sink.retry, BackoffPolicy::default());
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("REFDEX_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${REFDEX_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("REFDEX_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[elastic]
hosts = ["https://es1:9200", "https://es2:9200"]
username = "elastic"
password = "${REFDEX_UNSET_PASSWORD_VAR}"
compress = true
timeout = 30

[pipeline]
index = "works"
workers = 8
flush_bytes = 1000000
flush_interval_ms = 2500
max_retries = 2
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.elastic.hosts.len(), 2);
        assert_eq!(config.elastic.username.as_deref(), Some("elastic"));
        assert_eq!(config.elastic.password, None);
        assert_eq!(config.pipeline.index, "works");

        let es = config.elastic_config();
        assert!(es.compress);
        assert_eq!(es.timeout, Duration::from_secs(30));

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.workers, 8);
        assert_eq!(pipeline.sink.flush_bytes, 1_000_000);
        assert_eq!(pipeline.sink.flush_interval, Duration::from_millis(2500));
        assert_eq!(pipeline.sink.retry.max_retries, 2);
        // unset keys keep their defaults
        assert_eq!(pipeline.queue_capacity, 1024);
        assert_eq!(pipeline.sink.flush_workers, 2);
        assert_eq!(pipeline.sink.retry.base, Duration::from_millis(100));
    }

    #[test]
    fn parse_backoff_settings() {
        let toml = r#"
[pipeline]
retry_base_ms = 250
retry_multiplier = 3.0
retry_cap_ms = 4000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let retry = config.pipeline_config().sink.retry;
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.base, Duration::from_millis(250));
        assert_eq!(retry.multiplier, 3.0);
        assert_eq!(retry.cap, Duration::from_secs(4));
        assert_eq!(retry.delay(2), Duration::from_millis(750));
        assert_eq!(retry.delay(5), Duration::from_secs(4));
    }

    #[test]
    fn shrinking_multiplier_is_clamped() {
        let config: Config = toml::from_str("[pipeline]\nretry_multiplier = 0.5\n").unwrap();
        assert_eq!(config.pipeline_config().sink.retry.multiplier, 1.0);
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refdex.toml");
        std::fs::write(&path, "[pipeline]\nworkers = \"many\"\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("refdex.toml"), "{err:#}");
    }
}
