//! Generation requests, outputs and errors.

use std::fmt;

use thiserror::Error;

use crate::tokenizer::TextTokenizer;

pub const DEFAULT_MAX_NEW_TOKENS: usize = 32;

/// Errors raised while generating. Nothing is retried.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The prompt could not be encoded (or decoded) by the tokenizer.
    #[error("tokenization failed: {0}")]
    Tokenization(String),

    /// The model's forward pass failed.
    #[error("generation failed: {0}")]
    Generation(#[source] anyhow::Error),
}

pub type GenerateResult<T> = Result<T, GenerateError>;

/// Prompt text: one string, or an ordered list of pieces forming one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Text(String),
    Segments(Vec<String>),
}

impl From<&str> for Prompt {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Prompt {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for Prompt {
    fn from(segments: Vec<String>) -> Self {
        Self::Segments(segments)
    }
}

impl From<&[&str]> for Prompt {
    fn from(segments: &[&str]) -> Self {
        Self::Segments(segments.iter().map(|s| s.to_string()).collect())
    }
}

/// Which tokenization convention a request uses.
#[derive(Clone, Copy)]
pub enum Convention<'t> {
    /// Ids from a tokenizer the caller owns, bound to the same model.
    External(&'t dyn TextTokenizer),
    /// Ids from the handle's bundled tokenizer.
    Internal,
    /// Plain text in and out in one call. Single prompts only.
    Direct,
}

impl Convention<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::External(_) => "external tokenizer",
            Self::Internal => "internal tokenizer",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Debug for Convention<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'t> {
    pub prompt: Prompt,
    /// Upper bound on generated tokens. Generation may stop earlier.
    pub max_new_tokens: usize,
    pub convention: Convention<'t>,
}

impl<'t> GenerationRequest<'t> {
    pub fn new(prompt: impl Into<Prompt>) -> Self {
        Self {
            prompt: prompt.into(),
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            convention: Convention::Direct,
        }
    }

    pub fn max_new_tokens(mut self, n: usize) -> Self {
        self.max_new_tokens = n;
        self
    }

    pub fn convention(mut self, convention: Convention<'t>) -> Self {
        self.convention = convention;
        self
    }

    pub fn external(self, tokenizer: &'t dyn TextTokenizer) -> Self {
        self.convention(Convention::External(tokenizer))
    }

    pub fn internal(self) -> Self {
        self.convention(Convention::Internal)
    }

    pub fn direct(self) -> Self {
        self.convention(Convention::Direct)
    }
}

/// Generated text plus token accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
}
