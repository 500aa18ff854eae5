//! llama.cpp runtime: GGUF loading, greedy generation and requantization.

use std::ffi::CString;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, bail, Context, Result};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;

use crate::convert::{ConversionJob, Converter};
use crate::fetch::WeightFormat;
use crate::precision::Precision;
use crate::runtime::{is_gguf, CausalLm, LoadOptions, ModelLoader};
use crate::tokenizer::{TextTokenizer, TokenId};

/// Max tokens per decode call during prefill.
const PREFILL_BATCH_SIZE: usize = 512;

static BACKEND: Mutex<Option<Arc<LlamaBackend>>> = Mutex::new(None);

/// llama.cpp may only be initialised once per process.
fn backend() -> Result<Arc<LlamaBackend>> {
    let mut slot = BACKEND.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(backend) = slot.as_ref() {
        return Ok(Arc::clone(backend));
    }
    let backend = Arc::new(LlamaBackend::init().context("initialising llama.cpp")?);
    *slot = Some(Arc::clone(&backend));
    Ok(backend)
}

/// Opens GGUF files with llama.cpp.
#[derive(Debug, Default)]
pub struct LlamaLoader;

impl LlamaLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModelLoader for LlamaLoader {
    fn is_artifact(&self, path: &Path) -> bool {
        is_gguf(path)
    }

    fn load(&self, artifact: &Path, options: &LoadOptions) -> Result<Box<dyn CausalLm>> {
        let backend = backend()?;
        let model = LlamaModel::load_from_file(&backend, artifact, &LlamaModelParams::default())
            .with_context(|| format!("llama.cpp could not load {}", artifact.display()))?;
        let model = Arc::new(model);
        log::info!("loaded {} (vocab {})", artifact.display(), model.n_vocab());
        Ok(Box::new(LlamaCausalLm {
            backend,
            tokenizer: LlamaTokenizer {
                model: Arc::clone(&model),
            },
            model,
            options: *options,
        }))
    }
}

/// The vocabulary embedded in a GGUF file.
pub struct LlamaTokenizer {
    model: Arc<LlamaModel>,
}

impl TextTokenizer for LlamaTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let tokens = self.model.str_to_token(text, AddBos::Always)?;
        tokens
            .into_iter()
            .map(|t| TokenId::try_from(t.0).map_err(|_| anyhow!("negative token id {}", t.0)))
            .collect()
    }

    fn decode(&self, ids: &[TokenId]) -> Result<String> {
        let mut bytes = Vec::new();
        for &id in ids {
            let token = LlamaToken::new(i32::try_from(id)?);
            bytes.extend(self.model.token_to_bytes(token, Special::Plaintext)?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub struct LlamaCausalLm {
    backend: Arc<LlamaBackend>,
    model: Arc<LlamaModel>,
    tokenizer: LlamaTokenizer,
    options: LoadOptions,
}

impl CausalLm for LlamaCausalLm {
    fn tokenizer(&self) -> &dyn TextTokenizer {
        &self.tokenizer
    }

    fn generate(&mut self, prompt: &[TokenId], max_new_tokens: usize) -> Result<Vec<TokenId>> {
        let context_size = self.options.context_size;
        if prompt.len() >= context_size {
            bail!(
                "prompt has {} tokens, context window is {}",
                prompt.len(),
                context_size
            );
        }
        let budget = max_new_tokens.min(context_size - prompt.len());

        let n_ctx = NonZeroU32::new(u32::try_from(context_size)?)
            .ok_or_else(|| anyhow!("context size must be positive"))?;
        let threads = i32::try_from(self.options.thread_count)?;
        let params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_threads(threads)
            .with_n_threads_batch(threads);
        let mut ctx = self.model.new_context(&self.backend, params)?;

        let tokens = prompt
            .iter()
            .map(|&id| i32::try_from(id).map(LlamaToken::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut batch = LlamaBatch::new(PREFILL_BATCH_SIZE, 1);
        let last = tokens.len() as i32 - 1;
        let mut pos = 0i32;
        for chunk in tokens.chunks(PREFILL_BATCH_SIZE) {
            batch.clear();
            for &token in chunk {
                batch.add(token, pos, &[0], pos == last)?;
                pos += 1;
            }
            ctx.decode(&mut batch)?;
        }

        let mut sampler = LlamaSampler::greedy();
        let mut generated = Vec::with_capacity(budget);
        for _ in 0..budget {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);
            if self.model.is_eog_token(token) {
                break;
            }
            generated.push(TokenId::try_from(token.0)?);

            batch.clear();
            batch.add(token, pos, &[0], true)?;
            pos += 1;
            ctx.decode(&mut batch)?;
        }
        Ok(generated)
    }
}

/// Requantizes an f16/f32 GGUF checkpoint with `llama_model_quantize`.
///
/// Accepts a `.gguf` file, or a directory holding exactly one.
#[derive(Debug, Default, Clone)]
pub struct LlamaQuantizer {
    /// Worker threads for quantization; 0 lets llama.cpp decide.
    pub threads: i32,
}

impl LlamaQuantizer {
    fn input_file(input: &Path) -> Result<PathBuf> {
        if input.is_file() {
            return Ok(input.to_path_buf());
        }
        let candidates: Vec<PathBuf> = std::fs::read_dir(input)
            .with_context(|| format!("reading {}", input.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| is_gguf(p))
            .collect();
        match candidates.as_slice() {
            [single] => Ok(single.clone()),
            [] => bail!(
                "{} has no GGUF checkpoint; convert the weights to GGUF first or configure a conversion command",
                input.display()
            ),
            _ => bail!("{} holds several GGUF files, pass one explicitly", input.display()),
        }
    }

    /// llama.cpp `llama_ftype` values.
    fn ftype(precision: Precision) -> u32 {
        match precision {
            Precision::F16 => 1,
            Precision::Int4 => 2,
            Precision::Int8 => 7,
            Precision::Int5 => 8,
        }
    }
}

impl Converter for LlamaQuantizer {
    fn convert(&self, job: &ConversionJob) -> Result<PathBuf> {
        backend()?;
        let input = Self::input_file(&job.input)?;
        let output = job.artifact_path();

        let c_input = CString::new(input.to_string_lossy().as_bytes())?;
        let c_output = CString::new(output.to_string_lossy().as_bytes())?;

        log::info!(
            "quantizing {} to {} ({})",
            input.display(),
            job.precision,
            job.precision.ggml_type()
        );
        // SAFETY: both paths are valid NUL-terminated strings that outlive the
        // call, and the params struct comes from llama.cpp's own defaults.
        let status = unsafe {
            let mut params = llama_cpp_sys_2::llama_model_quantize_default_params();
            params.ftype = Self::ftype(job.precision) as _;
            params.nthread = self.threads as _;
            llama_cpp_sys_2::llama_model_quantize(c_input.as_ptr(), c_output.as_ptr(), &params)
        };
        if status != 0 {
            bail!("llama_model_quantize failed with status {status}");
        }
        Ok(output)
    }

    fn input_formats(&self) -> &'static [WeightFormat] {
        &[WeightFormat::Gguf]
    }
}
