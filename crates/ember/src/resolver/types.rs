//! Resolver error taxonomy.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::precision::Precision;

/// Errors raised while resolving a model. None are retried.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Neither a hub repository nor a local path could be found.
    #[error("model '{model}' not found: {reason}")]
    SourceNotFound { model: String, reason: String },

    /// The checkpoint could not be converted to the requested precision.
    #[error("failed to convert '{model}' to {precision}: {source}")]
    Conversion {
        model: String,
        precision: Precision,
        #[source]
        source: anyhow::Error,
    },

    /// The converted artifact could not be persisted.
    #[error("failed to write cache at {}: {source}", .path.display())]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The runtime rejected the artifact.
    #[error("failed to load {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Another resolver held the cache entry for too long.
    #[error("timed out after {waited:?} waiting for cache lock {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type ResolveResult<T> = Result<T, ResolveError>;

impl ResolveError {
    pub(crate) fn cache_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::CacheWrite {
            path: path.into(),
            source,
        }
    }
}
