//! Subcommands and the connection flags they share

pub mod admin;
pub mod index;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use refdex_crossref::{ElasticConfig, ElasticEngine, IndexEngine, IndexSettings};

use crate::config::Config;

/// Engine connection flags; unset flags fall back to the config file
#[derive(Args, Debug, Default)]
pub struct EsArgs {
    /// Engine base URL (repeat for round-robin over several hosts)
    #[arg(long = "host", value_name = "URL")]
    pub hosts: Vec<String>,

    /// Basic auth user
    #[arg(long)]
    pub user: Option<String>,

    /// Basic auth password (default: $REFDEX_ES_PASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// Additional trusted CA certificate (PEM)
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Gzip request bodies
    #[arg(long)]
    pub compress: bool,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl EsArgs {
    pub fn resolve(&self, config: &Config) -> ElasticConfig {
        let mut es = config.elastic_config();
        if !self.hosts.is_empty() {
            es.hosts = self.hosts.clone();
        }
        if let Some(user) = &self.user {
            es.username = Some(user.clone());
        }
        if let Some(password) = &self.password {
            es.password = Some(password.clone());
        }
        if let Some(ca) = &self.ca_cert {
            es.ca_cert = Some(ca.clone());
        }
        es.compress |= self.compress;
        if let Some(secs) = self.timeout {
            es.timeout = Duration::from_secs(secs);
        }
        es
    }

    pub fn connect(&self, config: &Config) -> Result<Arc<dyn IndexEngine>> {
        let es = self.resolve(config);
        let engine = ElasticEngine::new(&es).context("Failed to set up engine client")?;
        Ok(Arc::new(engine))
    }
}

/// Index settings from a JSON file, or the built-in defaults
pub fn load_settings(path: Option<&PathBuf>) -> Result<IndexSettings> {
    let Some(path) = path else {
        return Ok(IndexSettings::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    IndexSettings::from_json(&json)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))
}
