//! Configuration loading and data-service factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use aptitude_core::batch::BatchOptions;
use aptitude_core::traits::DataService;

use crate::memory::MemoryDataService;
use crate::repository::CachingRepository;
use crate::rest::RestDataService;

/// Which data service to talk to.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DataConfig {
    Rest {
        base_url: String,
        #[serde(default)]
        api_key: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Memory {
        /// JSON fixture to load at startup; empty store when absent.
        #[serde(default)]
        fixture: Option<PathBuf>,
    },
}

impl std::fmt::Debug for DataConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataConfig::Rest {
                base_url,
                api_key: _,
                timeout_secs,
            } => f
                .debug_struct("Rest")
                .field("base_url", base_url)
                .field("api_key", &"***")
                .field("timeout_secs", timeout_secs)
                .finish(),
            DataConfig::Memory { fixture } => {
                f.debug_struct("Memory").field("fixture", fixture).finish()
            }
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig::Memory { fixture: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Pause between subjects in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_true")]
    pub include_interpretations: bool,
    #[serde(default = "default_report_title")]
    pub report_title: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            include_interpretations: true,
            report_title: default_report_title(),
        }
    }
}

impl BatchConfig {
    pub fn to_options(&self) -> BatchOptions {
        BatchOptions {
            delay: Duration::from_millis(self.delay_ms),
            include_interpretations: self.include_interpretations,
            title: self.report_title.clone(),
            cancel: None,
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_delay_ms() -> u64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_report_title() -> String {
    "Aptitude report".to_string()
}

/// Top-level aptitude configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AptitudeConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl AptitudeConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_data_config(config: &DataConfig) -> DataConfig {
    match config {
        DataConfig::Rest {
            base_url,
            api_key,
            timeout_secs,
        } => DataConfig::Rest {
            base_url: resolve_env_vars(base_url),
            api_key: resolve_env_vars(api_key),
            timeout_secs: *timeout_secs,
        },
        DataConfig::Memory { fixture } => DataConfig::Memory {
            fixture: fixture
                .as_ref()
                .map(|p| PathBuf::from(resolve_env_vars(&p.to_string_lossy()))),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `aptitude.toml` in the current directory
/// 2. `~/.config/aptitude/config.toml`
///
/// Environment variable overrides: `APTITUDE_DATA_URL`, `APTITUDE_API_KEY`.
pub fn load_config() -> Result<AptitudeConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<AptitudeConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("aptitude.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match &config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<AptitudeConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => AptitudeConfig::default(),
    };

    apply_env_overrides(
        &mut config,
        std::env::var("APTITUDE_DATA_URL").ok(),
        std::env::var("APTITUDE_API_KEY").ok(),
    );
    config.data = resolve_data_config(&config.data);

    // Relative fixture paths are resolved against the config file's directory.
    if let (Some(path), DataConfig::Memory { fixture: Some(fixture) }) =
        (&config_path, &mut config.data)
    {
        if fixture.is_relative() {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                *fixture = dir.join(&*fixture);
            }
        }
    }

    tracing::debug!(path = ?config_path, data = ?config.data, "configuration loaded");
    Ok(config)
}

fn apply_env_overrides(config: &mut AptitudeConfig, url: Option<String>, key: Option<String>) {
    if let Some(url) = url {
        match &mut config.data {
            DataConfig::Rest { base_url, .. } => *base_url = url,
            DataConfig::Memory { .. } => {
                config.data = DataConfig::Rest {
                    base_url: url,
                    api_key: String::new(),
                    timeout_secs: None,
                }
            }
        }
    }
    if let (Some(key), DataConfig::Rest { api_key, .. }) = (key, &mut config.data) {
        *api_key = key;
    }
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("aptitude"))
}

/// Create the uncached data service described by `config`.
pub fn create_data_service(config: &DataConfig) -> Result<Arc<dyn DataService>> {
    match config {
        DataConfig::Rest {
            base_url,
            api_key,
            timeout_secs,
        } => {
            if base_url.trim().is_empty() {
                anyhow::bail!("data service base_url is empty");
            }
            Ok(Arc::new(RestDataService::new(base_url, api_key, *timeout_secs)?))
        }
        DataConfig::Memory { fixture: Some(path) } => {
            Ok(Arc::new(MemoryDataService::from_fixture(path)?))
        }
        DataConfig::Memory { fixture: None } => Ok(Arc::new(MemoryDataService::new())),
    }
}

/// Create the cached repository every consumer shares.
pub fn create_repository(config: &AptitudeConfig) -> Result<Arc<CachingRepository>> {
    let inner = create_data_service(&config.data)?;
    Ok(Arc::new(CachingRepository::new(inner, config.cache_ttl())))
}
