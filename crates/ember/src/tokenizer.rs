//! Tokenizer seam shared by external tokenizers and model-internal vocabularies.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::fetch::Fetcher;
use crate::source::ModelSource;

pub type TokenId = u32;

pub const TOKENIZER_FILE_NAME: &str = "tokenizer.json";

/// Maps text to token ids and back.
///
/// Ids are only meaningful to the tokenizer that produced them.
pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;
    fn decode(&self, ids: &[TokenId]) -> Result<String>;

    /// Encodes an ordered list of prompt pieces as one sequence.
    fn encode_segments(&self, segments: &[String]) -> Result<Vec<TokenId>> {
        self.encode(&segments.concat())
    }
}

/// Hugging Face `tokenizer.json` tokenizer, bound to a model repository or
/// checkpoint directory.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    path: PathBuf,
}

impl HfTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow!("failed to load tokenizer {}: {}", path.display(), e))?;
        Ok(Self {
            inner,
            path: path.to_path_buf(),
        })
    }

    /// Loads `tokenizer.json` from a checkpoint directory, or from the
    /// directory containing a converted artifact.
    pub fn from_local(path: &Path) -> Result<Self> {
        let dir = if path.is_dir() {
            path
        } else {
            path.parent()
                .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?
        };
        Self::from_file(dir.join(TOKENIZER_FILE_NAME))
    }

    /// Tokenizer for `source`. Remote repositories have their `tokenizer.json`
    /// fetched into `download_dir` unless already present.
    pub async fn from_pretrained(
        source: &ModelSource,
        fetcher: &dyn Fetcher,
        download_dir: &Path,
    ) -> Result<Self> {
        match source {
            ModelSource::Local(path) => Self::from_local(path),
            ModelSource::Remote(repo) => {
                let path = fetcher
                    .fetch_file(repo, TOKENIZER_FILE_NAME, download_dir)
                    .await
                    .with_context(|| format!("fetching tokenizer for {repo}"))?;
                Self::from_file(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow!("tokenizer failed: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[TokenId]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| anyhow!("detokenizer failed: {}", e))
    }
}

impl std::fmt::Debug for HfTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfTokenizer")
            .field("path", &self.path)
            .finish()
    }
}
