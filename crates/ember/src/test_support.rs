//! Test doubles for the collaborator traits.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::convert::{ConversionJob, Converter};
use crate::fetch::{FetchError, Fetcher, WeightFormat};
use crate::resolver::ModelResolver;
use crate::runtime::{CausalLm, LoadOptions, ModelLoader};
use crate::source::RepoId;
use crate::tokenizer::{TextTokenizer, TokenId};

pub const ARTIFACT_MAGIC: &[u8] = b"EMBER-TEST-ARTIFACT\n";
pub const CONTINUATION: &str = " Intel designs and builds processors.";

/// One id per ASCII byte. Anything else is dropped, so non-ASCII input
/// encodes to nothing.
#[derive(Debug, Default)]
pub struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        Ok(text
            .bytes()
            .filter(u8::is_ascii)
            .map(TokenId::from)
            .collect())
    }

    fn decode(&self, ids: &[TokenId]) -> Result<String> {
        let bytes = ids
            .iter()
            .map(|&id| u8::try_from(id).map_err(|_| anyhow::anyhow!("id {id} out of range")))
            .collect::<Result<Vec<u8>>>()?;
        Ok(String::from_utf8(bytes)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBehavior {
    /// Returns the continuation, clipped to the budget.
    Continue,
    /// Returns the continuation without looking at the budget.
    IgnoreBudget,
    /// Stops after this many tokens, as if it hit end-of-sequence.
    StopAfter(usize),
    Fail,
}

/// Deterministic model: always continues with [`CONTINUATION`].
pub struct ScriptedModel {
    tokenizer: ByteTokenizer,
    behavior: ModelBehavior,
}

impl ScriptedModel {
    pub fn new(behavior: ModelBehavior) -> Self {
        Self {
            tokenizer: ByteTokenizer,
            behavior,
        }
    }
}

impl CausalLm for ScriptedModel {
    fn tokenizer(&self) -> &dyn TextTokenizer {
        &self.tokenizer
    }

    fn generate(&mut self, _prompt: &[TokenId], max_new_tokens: usize) -> Result<Vec<TokenId>> {
        let continuation: Vec<TokenId> = CONTINUATION.bytes().map(TokenId::from).collect();
        let take = match self.behavior {
            ModelBehavior::Continue => max_new_tokens,
            ModelBehavior::IgnoreBudget => usize::MAX,
            ModelBehavior::StopAfter(n) => n.min(max_new_tokens),
            ModelBehavior::Fail => bail!("forward pass exploded"),
        };
        Ok(continuation.into_iter().cycle().take(take.min(1024)).collect())
    }
}

/// Opens files starting with [`ARTIFACT_MAGIC`].
#[derive(Default)]
pub struct ScriptedLoader {
    pub loads: AtomicUsize,
    pub last_options: Mutex<Option<LoadOptions>>,
}

impl ModelLoader for ScriptedLoader {
    fn is_artifact(&self, path: &Path) -> bool {
        std::fs::read(path)
            .map(|bytes| bytes.starts_with(ARTIFACT_MAGIC))
            .unwrap_or(false)
    }

    fn load(&self, artifact: &Path, options: &LoadOptions) -> Result<Box<dyn CausalLm>> {
        if !self.is_artifact(artifact) {
            bail!("{} is not a test artifact", artifact.display());
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(*options);
        Ok(Box::new(ScriptedModel::new(ModelBehavior::Continue)))
    }
}

/// Counts conversions and writes a small artifact.
#[derive(Default)]
pub struct CountingConverter {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub delay: Option<Duration>,
    /// Accepted checkpoint formats; every format when unset.
    pub formats: Option<&'static [WeightFormat]>,
}

impl CountingConverter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Reads GGUF checkpoints only, like the llama.cpp requantizer.
    pub fn gguf_only() -> Self {
        Self {
            formats: Some(&[WeightFormat::Gguf]),
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Converter for CountingConverter {
    fn convert(&self, job: &ConversionJob) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            bail!("converter crashed halfway");
        }
        let out = job.artifact_path();
        let mut bytes = ARTIFACT_MAGIC.to_vec();
        bytes.extend_from_slice(job.input.to_string_lossy().as_bytes());
        std::fs::write(&out, bytes)?;
        Ok(out)
    }

    fn input_formats(&self) -> &'static [WeightFormat] {
        self.formats.unwrap_or(WeightFormat::ALL)
    }
}

/// Writes a tiny GPT-NeoX checkpoint with PyTorch weights instead of
/// downloading. `calls` counts checkpoint fetches, `files` single files.
#[derive(Default)]
pub struct CountingFetcher {
    pub calls: AtomicUsize,
    pub files: AtomicUsize,
    pub missing: bool,
    pub last_formats: Mutex<Vec<WeightFormat>>,
}

impl CountingFetcher {
    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(
        &self,
        repo: &RepoId,
        formats: &[WeightFormat],
        dest: &Path,
    ) -> Result<PathBuf, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_formats.lock().unwrap() = formats.to_vec();
        if self.missing {
            return Err(FetchError::NotFound(repo.to_string()));
        }
        if !formats.contains(&WeightFormat::PyTorch) {
            return Err(FetchError::Unsupported {
                repo: repo.to_string(),
                wanted: formats
                    .iter()
                    .map(WeightFormat::as_str)
                    .collect::<Vec<_>>()
                    .join(" or "),
                found: WeightFormat::PyTorch.to_string(),
            });
        }
        write_checkpoint(dest, "gpt_neox")?;
        Ok(dest.to_path_buf())
    }

    async fn fetch_file(
        &self,
        repo: &RepoId,
        filename: &str,
        dest: &Path,
    ) -> Result<PathBuf, FetchError> {
        self.files.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            return Err(FetchError::NotFound(format!("{repo}/{filename}")));
        }
        if filename == "config.json" {
            write_config(dest, "gpt_neox")?;
            return Ok(dest.join(filename));
        }
        std::fs::create_dir_all(dest)?;
        let path = dest.join(filename);
        std::fs::write(&path, b"{}")?;
        Ok(path)
    }
}

pub fn write_config(dir: &Path, model_type: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        dir.join("config.json"),
        format!(r#"{{"model_type": "{model_type}", "architectures": ["Test"]}}"#),
    )
}

/// Writes `config.json` and a fake weights file into `dir`.
pub fn write_checkpoint(dir: &Path, model_type: &str) -> std::io::Result<()> {
    write_config(dir, model_type)?;
    std::fs::write(dir.join("pytorch_model.bin"), b"weights")
}

pub struct Harness {
    pub fetcher: Arc<CountingFetcher>,
    pub converter: Arc<CountingConverter>,
    pub loader: Arc<ScriptedLoader>,
    pub resolver: ModelResolver,
}

impl Harness {
    pub fn new(fetcher: CountingFetcher, converter: CountingConverter) -> Self {
        Self::with_family(fetcher, converter, crate::ModelFamily::GptNeox)
    }

    pub fn with_family(
        fetcher: CountingFetcher,
        converter: CountingConverter,
        family: crate::ModelFamily,
    ) -> Self {
        let fetcher = Arc::new(fetcher);
        let converter = Arc::new(converter);
        let loader = Arc::new(ScriptedLoader::default());
        let resolver = ModelResolver::builder()
            .fetcher(fetcher.clone())
            .converter(converter.clone())
            .loader(loader.clone())
            .family(family)
            .lock_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        Self {
            fetcher,
            converter,
            loader,
            resolver,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(CountingFetcher::default(), CountingConverter::default())
    }
}
