//! Fetching upstream checkpoints from a Hugging Face compatible hub.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::cache::unique_suffix;
use crate::source::RepoId;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";

/// Metadata and tokenizer files downloaded alongside the weights.
const METADATA_FILES: &[&str] = &[
    "config.json",
    "generation_config.json",
    "tokenizer.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
    "tokenizer.model",
    "vocab.json",
    "merges.txt",
];

#[derive(Debug, Error)]
pub enum FetchError {
    /// The hub answered, but has no such repository or file.
    #[error("'{0}' was not found on the hub")]
    NotFound(String),

    /// The hub could not be reached or returned an unexpected status.
    #[error("hub request failed: {0}")]
    Unreachable(#[source] anyhow::Error),

    /// The repository has weights, but none in a format the converter reads.
    #[error("{repo} has no {wanted} weights (found: {found})")]
    Unsupported {
        repo: String,
        wanted: String,
        found: String,
    },

    /// Writing the download to disk failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Downloads checkpoint files for a repository.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads the checkpoint of `repo` into `dest` and returns the
    /// checkpoint directory. Only weights in one of `formats` are fetched.
    /// Files already present are kept.
    async fn fetch(
        &self,
        repo: &RepoId,
        formats: &[WeightFormat],
        dest: &Path,
    ) -> Result<PathBuf, FetchError>;

    /// Downloads a single file of `repo` into `dest`.
    async fn fetch_file(
        &self,
        repo: &RepoId,
        filename: &str,
        dest: &Path,
    ) -> Result<PathBuf, FetchError>;
}

/// On-disk format of checkpoint weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    Safetensors,
    PyTorch,
    /// Full-precision (f32/f16/bf16) GGUF.
    Gguf,
}

impl WeightFormat {
    /// Every format, in download preference order.
    pub const ALL: &'static [WeightFormat] = &[Self::Safetensors, Self::PyTorch, Self::Gguf];

    /// The weight format of a repository file name, if it holds weights.
    pub fn of(name: &str) -> Option<Self> {
        if name.ends_with(".safetensors") || name.ends_with(".safetensors.index.json") {
            Some(Self::Safetensors)
        } else if name.starts_with("pytorch_model")
            && (name.ends_with(".bin") || name.ends_with(".bin.index.json"))
        {
            Some(Self::PyTorch)
        } else if is_full_precision_gguf(name) {
            Some(Self::Gguf)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safetensors => "safetensors",
            Self::PyTorch => "pytorch",
            Self::Gguf => "gguf",
        }
    }
}

impl fmt::Display for WeightFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn join_formats<'a>(formats: impl IntoIterator<Item = &'a WeightFormat>) -> String {
    formats
        .into_iter()
        .map(WeightFormat::as_str)
        .collect::<Vec<_>>()
        .join(" or ")
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

/// [`Fetcher`] for huggingface.co or a mirror.
#[derive(Debug, Clone)]
pub struct HubFetcher {
    client: reqwest::Client,
    endpoint: String,
    revision: String,
    token: Option<String>,
}

impl HubFetcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            revision: DEFAULT_REVISION.to_string(),
            token: None,
        }
    }

    /// Uses `HF_ENDPOINT` and `HF_TOKEN` when set.
    pub fn from_env() -> Self {
        let endpoint =
            std::env::var("HF_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let mut fetcher = Self::new(endpoint);
        fetcher.token = std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty());
        fetcher
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn info_url(&self, repo: &RepoId) -> String {
        format!("{}/api/models/{}/revision/{}", self.endpoint, repo, self.revision)
    }

    pub fn file_url(&self, repo: &RepoId, filename: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint, repo, self.revision, filename
        )
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn list_files(&self, repo: &RepoId) -> Result<Vec<String>, FetchError> {
        let response = self
            .get(&self.info_url(repo))
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.into()))?;

        check_status(&response, &repo.to_string())?;

        let info: RepoInfo = response
            .json()
            .await
            .map_err(|e| FetchError::Unreachable(e.into()))?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    async fn download(&self, url: &str, label: &str, target: &Path) -> Result<(), FetchError> {
        let response = self
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.into()))?;
        check_status(&response, label)?;

        let part = target.with_file_name(format!(
            "{}.part-{}",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            unique_suffix()
        ));

        let result = async {
            let mut file = tokio::fs::File::create(&part).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| FetchError::Unreachable(e.into()))?;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            tokio::fs::rename(&part, target).await?;
            Ok::<(), FetchError>(())
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        result
    }
}

impl Default for HubFetcher {
    fn default() -> Self {
        Self::from_env()
    }
}

#[async_trait]
impl Fetcher for HubFetcher {
    async fn fetch(
        &self,
        repo: &RepoId,
        formats: &[WeightFormat],
        dest: &Path,
    ) -> Result<PathBuf, FetchError> {
        let listing = self.list_files(repo).await?;
        let files = select_checkpoint_files(&listing, formats);
        if !files.iter().any(|f| WeightFormat::of(f).is_some()) {
            let found: Vec<WeightFormat> = WeightFormat::ALL
                .iter()
                .copied()
                .filter(|&format| {
                    listing
                        .iter()
                        .any(|f| !f.contains('/') && WeightFormat::of(f) == Some(format))
                })
                .collect();
            if found.is_empty() {
                return Err(FetchError::NotFound(format!(
                    "{repo} (no supported weight files)"
                )));
            }
            return Err(FetchError::Unsupported {
                repo: repo.to_string(),
                wanted: join_formats(formats),
                found: join_formats(&found),
            });
        }

        tokio::fs::create_dir_all(dest).await?;
        log::info!("fetching {} files of {} into {}", files.len(), repo, dest.display());

        for (i, name) in files.iter().enumerate() {
            let target = dest.join(name);
            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                log::debug!("  [{}/{}] {} already present", i + 1, files.len(), name);
                continue;
            }
            log::info!("  [{}/{}] {}", i + 1, files.len(), name);
            self.download(&self.file_url(repo, name), &format!("{repo}/{name}"), &target)
                .await?;
        }

        Ok(dest.to_path_buf())
    }

    async fn fetch_file(
        &self,
        repo: &RepoId,
        filename: &str,
        dest: &Path,
    ) -> Result<PathBuf, FetchError> {
        let target = dest.join(filename);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(target);
        }
        tokio::fs::create_dir_all(dest).await?;
        self.download(
            &self.file_url(repo, filename),
            &format!("{repo}/{filename}"),
            &target,
        )
        .await?;
        Ok(target)
    }
}

fn check_status(response: &reqwest::Response, label: &str) -> Result<(), FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    // The hub answers 401 for repositories that do not exist (or are gated).
    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(FetchError::NotFound(label.to_string()));
    }
    Err(FetchError::Unreachable(anyhow::anyhow!(
        "GET {} returned HTTP {}",
        label,
        status
    )))
}

fn is_full_precision_gguf(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".gguf") && (lower.contains("f16") || lower.contains("f32") || lower.contains("bf16"))
}

/// Picks the files of a repository listing that make up one checkpoint.
///
/// Weights are taken from the first format of [`WeightFormat::ALL`] that is
/// both in `formats` and present in the listing. Files in subdirectories are
/// ignored.
pub fn select_checkpoint_files(listing: &[String], formats: &[WeightFormat]) -> Vec<String> {
    let top_level: Vec<&str> = listing
        .iter()
        .map(String::as_str)
        .filter(|f| !f.contains('/'))
        .collect();

    let mut files: Vec<String> = top_level
        .iter()
        .filter(|f| METADATA_FILES.contains(f))
        .map(|f| f.to_string())
        .collect();

    let weights = WeightFormat::ALL
        .iter()
        .filter(|format| formats.contains(format))
        .map(|&format| {
            top_level
                .iter()
                .filter(|f| WeightFormat::of(f) == Some(format))
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
        })
        .find(|weights| !weights.is_empty())
        .unwrap_or_default();

    files.extend(weights);
    files.sort();
    files.dedup();
    files
}
