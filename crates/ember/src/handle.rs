//! Owned handle to a loaded model.

use std::path::{Path, PathBuf};

use crate::family::ModelFamily;
use crate::generation::{GenerateError, GenerateResult};
use crate::precision::Precision;
use crate::runtime::CausalLm;
use crate::source::ModelSource;
use crate::tokenizer::{TextTokenizer, TokenId};

/// How the artifact behind a handle was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// A local path that already was a converted artifact.
    Prebuilt,
    /// A valid cache entry.
    CacheHit,
    /// Converted (and cached) during this resolve.
    Converted,
}

/// Descriptive facts about a resolved model.
#[derive(Debug, Clone)]
pub struct HandleInfo {
    pub source: ModelSource,
    pub precision: Precision,
    pub family: ModelFamily,
    pub artifact: PathBuf,
    pub thread_count: usize,
    pub origin: ArtifactOrigin,
}

/// A ready-to-use model, exclusively owned by the caller.
///
/// Generation takes `&mut self`: calls on one handle are sequential. Drop the
/// handle to release the weights.
pub struct ModelHandle {
    model: Box<dyn CausalLm>,
    info: HandleInfo,
}

impl ModelHandle {
    pub fn new(model: Box<dyn CausalLm>, info: HandleInfo) -> Self {
        Self { model, info }
    }

    pub fn info(&self) -> &HandleInfo {
        &self.info
    }

    pub fn thread_count(&self) -> usize {
        self.info.thread_count
    }

    pub fn artifact_path(&self) -> &Path {
        &self.info.artifact
    }

    /// The tokenizer bundled with the loaded weights.
    pub fn tokenizer(&self) -> &dyn TextTokenizer {
        self.model.tokenizer()
    }

    /// Core primitive: prompt ids in, prompt ids followed by at most
    /// `max_new_tokens` generated ids out.
    pub fn generate_tokens(
        &mut self,
        prompt: &[TokenId],
        max_new_tokens: usize,
    ) -> GenerateResult<Vec<TokenId>> {
        if prompt.is_empty() {
            return Err(GenerateError::Tokenization(
                "prompt encodes to zero tokens".to_string(),
            ));
        }

        let mut sequence = prompt.to_vec();
        if max_new_tokens == 0 {
            return Ok(sequence);
        }

        let mut generated = self
            .model
            .generate(prompt, max_new_tokens)
            .map_err(GenerateError::Generation)?;

        if generated.len() > max_new_tokens {
            log::warn!(
                "model produced {} tokens for a budget of {}, truncating",
                generated.len(),
                max_new_tokens
            );
            generated.truncate(max_new_tokens);
        }

        log::debug!(
            "generated {} tokens after a {} token prompt",
            generated.len(),
            prompt.len()
        );
        sequence.extend(generated);
        Ok(sequence)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").field("info", &self.info).finish()
    }
}
