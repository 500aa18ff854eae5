//! `ember.toml` configuration.
//!
//! Priority: CLI flags > `./ember.toml` > `<config_dir>/ember/config.toml` > defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::convert::CommandConverter;
use crate::family::ModelFamily;
use crate::fetch::HubFetcher;
use crate::precision::Precision;
use crate::resolver::ModelResolverBuilder;
use crate::runtime::DEFAULT_CONTEXT_SIZE;

pub const DEFAULT_MODEL: &str = "togethercomputer/RedPajama-INCITE-7B-Chat";
pub const LOCAL_CONFIG_FILE: &str = "ember.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmberConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub convert: ConvertConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Repository id or local path.
    pub source: String,
    pub precision: Precision,
    pub family: ModelFamily,
    pub threads: usize,
    pub context_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_MODEL.to_string(),
            precision: Precision::default(),
            family: ModelFamily::default(),
            threads: 2,
            context_size: DEFAULT_CONTEXT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root. Defaults to the working directory.
    pub dir: Option<PathBuf>,
    /// Seconds to wait for another process converting the same model.
    pub lock_timeout_secs: Option<u64>,
    /// Lock files older than this many seconds are considered abandoned.
    pub stale_lock_secs: Option<u64>,
}

/// External conversion program. Unset means the built-in converter, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub program: Option<PathBuf>,
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub endpoint: Option<String>,
    pub revision: Option<String>,
}

impl EmberConfig {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache.dir.clone().unwrap_or_else(|| PathBuf::from("./"))
    }

    /// The converter configured under `[convert]`, if a program is set.
    pub fn command_converter(&self) -> Option<CommandConverter> {
        let program = self.convert.program.as_ref()?;
        let converter = CommandConverter::new(program);
        Some(match &self.convert.args {
            Some(args) => converter.with_args(args.iter().cloned()),
            None => converter,
        })
    }

    pub fn hub_fetcher(&self) -> HubFetcher {
        let mut fetcher = HubFetcher::from_env();
        if let Some(endpoint) = &self.hub.endpoint {
            fetcher = HubFetcher::new(endpoint.clone())
                .with_token(std::env::var("HF_TOKEN").ok());
        }
        if let Some(revision) = &self.hub.revision {
            fetcher = fetcher.with_revision(revision.clone());
        }
        fetcher
    }

    /// A resolver builder carrying everything this file configures.
    pub fn resolver_builder(&self) -> ModelResolverBuilder {
        let mut builder = ModelResolverBuilder::new()
            .family(self.model.family)
            .context_size(self.model.context_size)
            .fetcher(Arc::new(self.hub_fetcher()));
        if let Some(converter) = self.command_converter() {
            builder = builder.converter(Arc::new(converter));
        }
        if let Some(secs) = self.cache.lock_timeout_secs {
            builder = builder.lock_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.cache.stale_lock_secs {
            builder = builder.stale_lock_after(Duration::from_secs(secs));
        }
        builder
    }
}

/// Loads configuration from `./ember.toml`, then the user config directory,
/// falling back to defaults.
pub fn load_config() -> Result<EmberConfig> {
    if let Some(config) = try_load_from_path(LOCAL_CONFIG_FILE)? {
        return Ok(config);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("ember").join("config.toml");
        if let Some(config) = try_load_from_path(&user_config)? {
            return Ok(config);
        }
    }

    Ok(EmberConfig::default())
}

/// Load from a specific path.
pub fn load_config_from_path(path: &Path) -> Result<EmberConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: EmberConfig =
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))?;
    log::debug!("loaded config from {}", path.display());
    Ok(config)
}

fn try_load_from_path(path: impl AsRef<Path>) -> Result<Option<EmberConfig>> {
    let path = path.as_ref();
    if path.exists() {
        Ok(Some(load_config_from_path(path)?))
    } else {
        Ok(None)
    }
}
