//! The generation facade: one primitive, two adapters.

use crate::handle::ModelHandle;
use crate::tokenizer::{TextTokenizer, TokenId};

use super::types::{
    Convention, GenerateError, GenerateResult, GenerationOutput, GenerationRequest, Prompt,
};

/// Generates text for `request` and returns it.
pub fn generate(handle: &mut ModelHandle, request: &GenerationRequest<'_>) -> GenerateResult<String> {
    generate_output(handle, request).map(|out| out.text)
}

/// Like [`generate`], also reporting token counts.
pub fn generate_output(
    handle: &mut ModelHandle,
    request: &GenerationRequest<'_>,
) -> GenerateResult<GenerationOutput> {
    match request.convention {
        Convention::External(tokenizer) => {
            generate_with_tokenizer(handle, tokenizer, &request.prompt, request.max_new_tokens)
        }
        Convention::Internal => {
            let ids = encode(handle.tokenizer(), &request.prompt)?;
            let sequence = handle.generate_tokens(&ids, request.max_new_tokens)?;
            finish(handle.tokenizer(), ids.len(), &sequence)
        }
        Convention::Direct => match &request.prompt {
            Prompt::Text(text) => complete(handle, text, request.max_new_tokens),
            Prompt::Segments(segments) => Err(GenerateError::Tokenization(format!(
                "direct generation takes a single prompt, got a list of {}",
                segments.len()
            ))),
        },
    }
}

/// Tokenizer-in-front adapter: encode with `tokenizer`, generate, decode with
/// the same `tokenizer`.
pub fn generate_with_tokenizer(
    handle: &mut ModelHandle,
    tokenizer: &dyn TextTokenizer,
    prompt: &Prompt,
    max_new_tokens: usize,
) -> GenerateResult<GenerationOutput> {
    let ids = encode(tokenizer, prompt)?;
    let sequence = handle.generate_tokens(&ids, max_new_tokens)?;
    finish(tokenizer, ids.len(), &sequence)
}

/// Fully wrapped adapter: text in, text out, on the handle's own tokenizer.
pub fn complete(
    handle: &mut ModelHandle,
    prompt: &str,
    max_new_tokens: usize,
) -> GenerateResult<GenerationOutput> {
    let ids = encode_text(handle.tokenizer(), prompt)?;
    let sequence = handle.generate_tokens(&ids, max_new_tokens)?;
    finish(handle.tokenizer(), ids.len(), &sequence)
}

fn encode(tokenizer: &dyn TextTokenizer, prompt: &Prompt) -> GenerateResult<Vec<TokenId>> {
    match prompt {
        Prompt::Text(text) => encode_text(tokenizer, text),
        Prompt::Segments(segments) => {
            if segments.is_empty() {
                return Err(GenerateError::Tokenization(
                    "prompt list is empty".to_string(),
                ));
            }
            let ids = tokenizer
                .encode_segments(segments)
                .map_err(|e| GenerateError::Tokenization(e.to_string()))?;
            non_empty(ids)
        }
    }
}

fn encode_text(tokenizer: &dyn TextTokenizer, text: &str) -> GenerateResult<Vec<TokenId>> {
    let ids = tokenizer
        .encode(text)
        .map_err(|e| GenerateError::Tokenization(e.to_string()))?;
    non_empty(ids)
}

fn non_empty(ids: Vec<TokenId>) -> GenerateResult<Vec<TokenId>> {
    if ids.is_empty() {
        Err(GenerateError::Tokenization(
            "prompt contains no tokens known to the model vocabulary".to_string(),
        ))
    } else {
        Ok(ids)
    }
}

fn finish(
    tokenizer: &dyn TextTokenizer,
    prompt_tokens: usize,
    sequence: &[TokenId],
) -> GenerateResult<GenerationOutput> {
    let text = tokenizer
        .decode(sequence)
        .map_err(|e| GenerateError::Tokenization(e.to_string()))?;
    Ok(GenerationOutput {
        text,
        prompt_tokens,
        generated_tokens: sequence.len().saturating_sub(prompt_tokens),
    })
}
