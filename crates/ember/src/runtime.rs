//! Runtime seam: loading converted artifacts and the token-level generation primitive.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::convert::Converter;
use crate::tokenizer::{TextTokenizer, TokenId};

pub const DEFAULT_CONTEXT_SIZE: usize = 2048;

const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Options applied when loading an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Worker threads for the forward pass. Always at least 1.
    pub thread_count: usize,
    /// Maximum prompt + generated tokens per call.
    pub context_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            thread_count: 2,
            context_size: DEFAULT_CONTEXT_SIZE,
        }
    }
}

/// A loaded causal language model.
///
/// Not required to be `Sync`: one owner issues calls one at a time.
pub trait CausalLm: Send {
    /// Tokenizer bundled with the loaded weights.
    fn tokenizer(&self) -> &dyn TextTokenizer;

    /// Continues `prompt` by at most `max_new_tokens` tokens and returns only
    /// the new ids. May stop early at an end-of-sequence token.
    fn generate(&mut self, prompt: &[TokenId], max_new_tokens: usize) -> Result<Vec<TokenId>>;
}

/// Turns converted artifacts into [`CausalLm`] instances.
pub trait ModelLoader: Send + Sync {
    /// Whether `path` is an artifact this loader can open without conversion.
    fn is_artifact(&self, path: &Path) -> bool;

    fn load(&self, artifact: &Path, options: &LoadOptions) -> Result<Box<dyn CausalLm>>;
}

/// Checks for the GGUF magic bytes.
pub fn is_gguf(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let mut magic = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == GGUF_MAGIC)
        .unwrap_or(false)
}

/// The loader compiled into this build, if any.
pub fn default_loader() -> Option<Arc<dyn ModelLoader>> {
    #[cfg(feature = "llama")]
    {
        Some(Arc::new(crate::llama::LlamaLoader::new()))
    }
    #[cfg(not(feature = "llama"))]
    {
        None
    }
}

/// The in-process converter compiled into this build, if any.
pub fn default_converter() -> Option<Arc<dyn Converter>> {
    #[cfg(feature = "llama")]
    {
        Some(Arc::new(crate::llama::LlamaQuantizer::default()))
    }
    #[cfg(not(feature = "llama"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_gguf() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.gguf");
        let bad = dir.path().join("b.bin");
        let short = dir.path().join("c.gguf");
        std::fs::write(&good, b"GGUF\x03\x00\x00\x00").unwrap();
        std::fs::write(&bad, b"PK\x03\x04").unwrap();
        std::fs::write(&short, b"GG").unwrap();

        assert!(is_gguf(&good));
        assert!(!is_gguf(&bad));
        assert!(!is_gguf(&short));
        assert!(!is_gguf(dir.path()));
    }

    #[test]
    fn test_default_options() {
        let options = LoadOptions::default();
        assert_eq!(options.thread_count, 2);
        assert_eq!(options.context_size, DEFAULT_CONTEXT_SIZE);
    }
}
