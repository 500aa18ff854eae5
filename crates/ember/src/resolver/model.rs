use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheEntry, CacheKey, CacheStore, FileLock, KeyedMutex};
use crate::convert::{check_family, ConversionJob, Converter};
use crate::family::ModelFamily;
use crate::fetch::{FetchError, Fetcher};
use crate::handle::{ArtifactOrigin, HandleInfo, ModelHandle};
use crate::precision::Precision;
use crate::runtime::{LoadOptions, ModelLoader};
use crate::source::ModelSource;

use super::builder::ModelResolverBuilder;
use super::types::{ResolveError, ResolveResult};

/// Turns a model source and precision into a loaded [`ModelHandle`].
///
/// Converted artifacts are cached under the directory passed to
/// [`resolve`](Self::resolve). A resolver is cheap to share: wrap it in an
/// `Arc` and call `resolve` from as many tasks as needed. Resolves for the
/// same cache entry convert at most once; other keys proceed independently.
pub struct ModelResolver {
    fetcher: Arc<dyn Fetcher>,
    converter: Arc<dyn Converter>,
    loader: Option<Arc<dyn ModelLoader>>,
    family: ModelFamily,
    context_size: usize,
    lock_timeout: Duration,
    stale_lock_after: Duration,
    inflight: KeyedMutex<PathBuf>,
}

impl ModelResolver {
    pub fn builder() -> ModelResolverBuilder {
        ModelResolverBuilder::new()
    }

    pub(crate) fn from_parts(
        fetcher: Arc<dyn Fetcher>,
        converter: Arc<dyn Converter>,
        loader: Option<Arc<dyn ModelLoader>>,
        family: ModelFamily,
        context_size: usize,
        lock_timeout: Duration,
        stale_lock_after: Duration,
    ) -> Self {
        Self {
            fetcher,
            converter,
            loader,
            family,
            context_size,
            lock_timeout,
            stale_lock_after,
            inflight: KeyedMutex::default(),
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    fn loader(&self) -> ResolveResult<&Arc<dyn ModelLoader>> {
        self.loader.as_ref().ok_or_else(|| {
            ResolveError::InvalidConfig(
                "no model runtime available; build with the `llama` feature or supply a loader"
                    .to_string(),
            )
        })
    }

    /// Resolves `source` at `precision` to a loaded model.
    ///
    /// A local path that already is a converted artifact is loaded as is.
    /// Everything else goes through the cache under `cache_dir`: a valid entry
    /// is loaded without touching the network, a miss fetches the checkpoint
    /// (remote sources only), converts it and commits the result.
    pub async fn resolve(
        &self,
        source: &ModelSource,
        precision: Precision,
        cache_dir: &Path,
        thread_count: usize,
    ) -> ResolveResult<ModelHandle> {
        if thread_count == 0 {
            return Err(ResolveError::InvalidConfig(
                "thread count must be at least 1".to_string(),
            ));
        }
        let loader = self.loader()?;

        if let ModelSource::Local(path) = source {
            let (probe, runtime) = (path.clone(), Arc::clone(loader));
            let (exists, is_artifact) = unblock(move || {
                let exists = probe.exists();
                Ok((exists, exists && runtime.is_artifact(&probe)))
            })
            .await
            .map_err(|e| ResolveError::SourceNotFound {
                model: source.to_string(),
                reason: e.to_string(),
            })?;
            if !exists {
                return Err(ResolveError::SourceNotFound {
                    model: source.to_string(),
                    reason: missing_path_reason(path),
                });
            }
            if is_artifact {
                log::info!("{} is already converted, loading directly", path.display());
                return self
                    .load(source, precision, path.clone(), thread_count, ArtifactOrigin::Prebuilt)
                    .await;
            }
        }

        let owned = source.clone();
        let key = unblock(move || CacheKey::new(&owned, precision))
            .await
            .map_err(|e| ResolveError::SourceNotFound {
                model: source.to_string(),
                reason: e.to_string(),
            })?;
        let store = CacheStore::new(cache_dir);

        let (artifact, origin) = match self.lookup(&store, &key).await {
            Some(entry) => {
                log::info!("cache hit for {}", key);
                (entry.artifact_path(), ArtifactOrigin::CacheHit)
            }
            None => self.convert_into_cache(&store, &key).await?,
        };

        self.load(source, precision, artifact, thread_count, origin)
            .await
    }

    /// Returns the valid cache entry for `source` at `precision`, if any.
    pub fn cached(
        &self,
        source: &ModelSource,
        precision: Precision,
        cache_dir: &Path,
    ) -> Option<CacheEntry> {
        let key = CacheKey::new(source, precision).ok()?;
        CacheStore::new(cache_dir).lookup(&key, self.family)
    }

    /// Converts a local checkpoint into `output_dir` without using the cache.
    ///
    /// The artifact is staged in a temporary directory inside `output_dir`
    /// and renamed into place, replacing any previous file of the same name.
    pub async fn convert(
        &self,
        checkpoint: &Path,
        output_dir: &Path,
        precision: Precision,
    ) -> ResolveResult<PathBuf> {
        if !tokio::fs::try_exists(checkpoint).await.unwrap_or(false) {
            return Err(ResolveError::SourceNotFound {
                model: checkpoint.display().to_string(),
                reason: "no such file or directory".to_string(),
            });
        }

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| ResolveError::cache_write(output_dir, e))?;
        let staging = output_dir.join(format!(".tmp-{}", crate::cache::unique_suffix()));
        tokio::fs::create_dir(&staging)
            .await
            .map_err(|e| ResolveError::cache_write(&staging, e))?;

        let model = checkpoint.display().to_string();
        let result = self
            .run_converter(model, checkpoint.to_path_buf(), staging.clone(), precision)
            .await;

        let outcome = match result {
            Ok(produced) => {
                let target = output_dir.join(
                    produced
                        .file_name()
                        .unwrap_or_else(|| std::ffi::OsStr::new("artifact.gguf")),
                );
                tokio::fs::rename(&produced, &target)
                    .await
                    .map(|_| target)
                    .map_err(|e| ResolveError::cache_write(output_dir, e))
            }
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            log::warn!("failed to remove {}: {}", staging.display(), e);
        }
        if let Ok(path) = &outcome {
            log::info!("converted {} -> {}", checkpoint.display(), path.display());
        }
        outcome
    }

    async fn convert_into_cache(
        &self,
        store: &CacheStore,
        key: &CacheKey,
    ) -> ResolveResult<(PathBuf, ArtifactOrigin)> {
        let entry_dir = store.entry_dir(key);
        let _inflight = self.inflight.lock(&entry_dir).await;

        tokio::fs::create_dir_all(&entry_dir)
            .await
            .map_err(|e| ResolveError::cache_write(&entry_dir, e))?;

        let lock_path = store.lock_path(key);
        let _lock = FileLock::acquire(&lock_path, self.lock_timeout, self.stale_lock_after)
            .await
            .map_err(|e| ResolveError::cache_write(&lock_path, e))?
            .ok_or_else(|| ResolveError::LockTimeout {
                path: lock_path.clone(),
                waited: self.lock_timeout,
            })?;

        // Someone else may have finished the conversion while we waited.
        if let Some(entry) = self.lookup(store, key).await {
            log::info!("cache hit for {} after waiting for lock", key);
            return Ok((entry.artifact_path(), ArtifactOrigin::CacheHit));
        }

        let (s, k) = (store.clone(), key.clone());
        match unblock(move || s.clear_staging(&k)).await {
            Ok(0) => {}
            Ok(n) => log::debug!("removed {} leftover staging directories for {}", n, key),
            Err(e) => log::warn!("could not clear staging for {}: {}", key, e),
        }

        let checkpoint = self.checkpoint(store, key).await?;
        let (s, k) = (store.clone(), key.clone());
        let staging = unblock(move || s.create_staging_dir(&k))
            .await
            .map_err(|e| ResolveError::cache_write(&entry_dir, e))?;

        log::info!("converting {} to {}", key.source(), key.precision());
        let converted = self
            .run_converter(
                key.source().to_string(),
                checkpoint,
                staging.clone(),
                key.precision(),
            )
            .await;

        let promoted = match converted {
            Ok(produced) => {
                let (s, k, family) = (store.clone(), key.clone(), self.family);
                unblock(move || s.promote(&k, family, &produced))
                    .await
                    .map_err(|e| ResolveError::cache_write(&entry_dir, e))
            }
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            log::warn!("failed to remove {}: {}", staging.display(), e);
        }

        let entry = promoted?;
        Ok((entry.artifact_path(), ArtifactOrigin::Converted))
    }

    async fn lookup(&self, store: &CacheStore, key: &CacheKey) -> Option<CacheEntry> {
        let (s, k, family) = (store.clone(), key.clone(), self.family);
        unblock(move || Ok(s.lookup(&k, family)))
            .await
            .ok()
            .flatten()
    }

    /// Fetches a remote checkpoint into the cache. `config.json` comes first
    /// so a checkpoint of the wrong family is rejected before the weights are
    /// downloaded.
    async fn checkpoint(&self, store: &CacheStore, key: &CacheKey) -> ResolveResult<PathBuf> {
        let repo = match key.source() {
            ModelSource::Local(path) => return Ok(path.clone()),
            ModelSource::Remote(repo) => repo,
        };
        let dest = store.checkpoint_dir(key);
        let precision = key.precision();

        match self.fetcher.fetch_file(repo, CONFIG_FILE_NAME, &dest).await {
            Ok(_) => self.verify_family(repo.to_string(), precision, dest.clone()).await?,
            Err(FetchError::NotFound(_)) => {
                log::debug!("{} has no {}, skipping the family check", repo, CONFIG_FILE_NAME)
            }
            Err(e) => return Err(fetch_error(repo.to_string(), precision, &dest, e)),
        }

        let formats = self.converter.input_formats();
        log::info!("fetching {} into {}", repo, dest.display());
        self.fetcher
            .fetch(repo, formats, &dest)
            .await
            .map_err(|e| fetch_error(repo.to_string(), precision, &dest, e))
    }

    async fn verify_family(
        &self,
        model: String,
        precision: Precision,
        checkpoint: PathBuf,
    ) -> ResolveResult<()> {
        let family = self.family;
        let checked = tokio::task::spawn_blocking(move || check_family(&checkpoint, family))
            .await
            .unwrap_or_else(|join| Err(anyhow::anyhow!("family check failed: {join}")));
        checked.map_err(|source| ResolveError::Conversion {
            model,
            precision,
            source,
        })
    }

    /// Runs the family check and the converter on a blocking thread and
    /// returns the produced file, which must sit directly in `output_dir`.
    async fn run_converter(
        &self,
        model: String,
        input: PathBuf,
        output_dir: PathBuf,
        precision: Precision,
    ) -> ResolveResult<PathBuf> {
        let job = ConversionJob {
            input,
            output_dir,
            family: self.family,
            precision,
        };
        let converter = Arc::clone(&self.converter);

        let result = tokio::task::spawn_blocking(move || {
            check_family(&job.input, job.family)?;
            let produced = converter.convert(&job)?;
            if !produced.is_file() || produced.parent() != Some(job.output_dir.as_path()) {
                anyhow::bail!(
                    "converter reported {} which is not a file in {}",
                    produced.display(),
                    job.output_dir.display()
                );
            }
            Ok(produced)
        })
        .await;

        let conversion = |source: anyhow::Error| ResolveError::Conversion {
            model: model.clone(),
            precision,
            source,
        };
        match result {
            Ok(Ok(produced)) => Ok(produced),
            Ok(Err(e)) => Err(conversion(e)),
            Err(join) => Err(conversion(anyhow::anyhow!("conversion task failed: {join}"))),
        }
    }

    async fn load(
        &self,
        source: &ModelSource,
        precision: Precision,
        artifact: PathBuf,
        thread_count: usize,
        origin: ArtifactOrigin,
    ) -> ResolveResult<ModelHandle> {
        let options = LoadOptions {
            thread_count,
            context_size: self.context_size,
        };
        let loader = Arc::clone(self.loader()?);
        let path = artifact.clone();

        log::debug!("loading {} with {} threads", artifact.display(), thread_count);
        let model = tokio::task::spawn_blocking(move || loader.load(&path, &options))
            .await
            .map_err(|join| ResolveError::Load {
                path: artifact.clone(),
                source: anyhow::anyhow!("load task failed: {join}"),
            })?
            .map_err(|source| ResolveError::Load {
                path: artifact.clone(),
                source,
            })?;

        Ok(ModelHandle::new(
            model,
            HandleInfo {
                source: source.clone(),
                precision,
                family: self.family,
                artifact,
                thread_count,
                origin,
            },
        ))
    }
}

impl std::fmt::Debug for ModelResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResolver")
            .field("family", &self.family)
            .field("context_size", &self.context_size)
            .field("has_runtime", &self.loader.is_some())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

const CONFIG_FILE_NAME: &str = "config.json";

/// Runs blocking filesystem work off the async executor.
async fn unblock<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

fn fetch_error(model: String, precision: Precision, dest: &Path, e: FetchError) -> ResolveError {
    match e {
        FetchError::Io(source) => ResolveError::cache_write(dest, source),
        unsupported @ FetchError::Unsupported { .. } => ResolveError::Conversion {
            model,
            precision,
            source: unsupported.into(),
        },
        other => ResolveError::SourceNotFound {
            model,
            reason: other.to_string(),
        },
    }
}

fn missing_path_reason(path: &Path) -> String {
    let bare_name = !path.is_absolute() && path.components().count() == 1;
    if bare_name {
        "no such file or directory; hub repositories are written as org/name".to_string()
    } else {
        "no such file or directory".to_string()
    }
}
