//! Ember - load quantized causal language models and generate text
//!
//! Resolves a hub repository id or a local checkpoint to a quantized artifact,
//! converting and caching on first use, and generates text from it through
//! one token-level primitive with text and tokenizer adapters on top.

pub mod cache;
pub mod config;
pub mod convert;
pub mod family;
pub mod fetch;
pub mod generation;
pub mod handle;
pub mod precision;
pub mod resolver;
pub mod runtime;
pub mod source;
pub mod tokenizer;

#[cfg(feature = "llama")]
pub mod llama;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main API
pub use config::{load_config, load_config_from_path, EmberConfig};
pub use convert::{CommandConverter, ConversionJob, Converter};
pub use family::ModelFamily;
pub use fetch::{FetchError, Fetcher, HubFetcher, WeightFormat};
pub use generation::{
    complete, generate, generate_output, generate_with_tokenizer, Convention, GenerateError,
    GenerateResult, GenerationOutput, GenerationRequest, Prompt,
};
pub use handle::{ArtifactOrigin, HandleInfo, ModelHandle};
pub use precision::Precision;
pub use resolver::{ModelResolver, ModelResolverBuilder, ResolveError, ResolveResult};
pub use runtime::{CausalLm, LoadOptions, ModelLoader};
pub use source::{ModelSource, RepoId};
pub use tokenizer::{HfTokenizer, TextTokenizer, TokenId};
