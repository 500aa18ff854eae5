//! Text generation over a resolved [`ModelHandle`](crate::ModelHandle).
//!
//! Everything funnels into one primitive, [`ModelHandle::generate_tokens`]
//! (token ids in, token ids out), with two adapters on top:
//!
//! - tokenizer in front: encode with a chosen tokenizer (an external one, or
//!   the handle's own), generate, decode with the same tokenizer. Accepts a
//!   single prompt or an ordered list of prompt segments.
//! - fully wrapped: plain text in, text out, on the handle's own tokenizer.
//!   Single prompts only; a list is rejected rather than joined.
//!
//! [`ModelHandle::generate_tokens`]: crate::ModelHandle::generate_tokens

mod model;
mod types;

pub use model::{complete, generate, generate_output, generate_with_tokenizer};
pub use types::*;
