//! Builder pattern for ModelResolver configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::convert::Converter;
use crate::family::ModelFamily;
use crate::fetch::{Fetcher, HubFetcher};
use crate::runtime::{default_converter, default_loader, ModelLoader, DEFAULT_CONTEXT_SIZE};

use super::model::ModelResolver;
use super::types::{ResolveError, ResolveResult};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Builder for configuring a [`ModelResolver`].
///
/// # Example
///
/// ```ignore
/// let resolver = ModelResolver::builder()
///     .family(ModelFamily::GptNeox)
///     .converter(Arc::new(CommandConverter::new("convert-hf")))
///     .build()?;
/// ```
pub struct ModelResolverBuilder {
    pub(crate) fetcher: Option<Arc<dyn Fetcher>>,
    pub(crate) converter: Option<Arc<dyn Converter>>,
    pub(crate) loader: Option<Arc<dyn ModelLoader>>,
    pub(crate) family: ModelFamily,
    pub(crate) context_size: usize,
    pub(crate) lock_timeout: Duration,
    pub(crate) stale_lock_after: Duration,
}

impl Default for ModelResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelResolverBuilder {
    pub fn new() -> Self {
        Self {
            fetcher: None,
            converter: None,
            loader: None,
            family: ModelFamily::default(),
            context_size: DEFAULT_CONTEXT_SIZE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_lock_after: DEFAULT_STALE_LOCK_AFTER,
        }
    }

    /// Where checkpoints are downloaded from. Defaults to [`HubFetcher::from_env`].
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Conversion collaborator used on cache misses.
    pub fn converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Runtime that opens converted artifacts.
    pub fn loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Architecture family of the models this resolver converts.
    pub fn family(mut self, family: ModelFamily) -> Self {
        self.family = family;
        self
    }

    /// Context window requested from the runtime.
    pub fn context_size(mut self, tokens: usize) -> Self {
        self.context_size = tokens;
        self
    }

    /// How long to wait for another process converting the same entry.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Age after which a lock file is considered abandoned.
    pub fn stale_lock_after(mut self, age: Duration) -> Self {
        self.stale_lock_after = age;
        self
    }

    pub fn build(self) -> ResolveResult<ModelResolver> {
        if self.context_size == 0 {
            return Err(ResolveError::InvalidConfig(
                "context size must be at least 1".to_string(),
            ));
        }

        let loader = self.loader.or_else(default_loader);
        let converter = self.converter.or_else(default_converter).ok_or_else(|| {
            ResolveError::InvalidConfig(
                "no converter available; configure a conversion command or build with the `llama` feature"
                    .to_string(),
            )
        })?;
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HubFetcher::from_env()));

        Ok(ModelResolver::from_parts(
            fetcher,
            converter,
            loader,
            self.family,
            self.context_size,
            self.lock_timeout,
            self.stale_lock_after,
        ))
    }
}
