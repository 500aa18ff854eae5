//! Model architecture families understood by the conversion collaborator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Architecture family tag passed to the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// LLaMA and derivatives.
    Llama,
    /// GPT-NeoX (Pythia, RedPajama-INCITE, Dolly v2).
    #[default]
    GptNeox,
    /// BLOOM family.
    Bloom,
    /// StarCoder / GPT-BigCode.
    Starcoder,
    /// ChatGLM family.
    Chatglm,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 5] = [
        Self::Llama,
        Self::GptNeox,
        Self::Bloom,
        Self::Starcoder,
        Self::Chatglm,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Llama => "llama",
            Self::GptNeox => "gptneox",
            Self::Bloom => "bloom",
            Self::Starcoder => "starcoder",
            Self::Chatglm => "chatglm",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Llama => "LLaMA",
            Self::GptNeox => "GPT-NeoX",
            Self::Bloom => "BLOOM",
            Self::Starcoder => "StarCoder",
            Self::Chatglm => "ChatGLM",
        }
    }

    /// `model_type` values in a Hugging Face `config.json` that belong to this family.
    pub fn config_model_types(&self) -> &'static [&'static str] {
        match self {
            Self::Llama => &["llama"],
            Self::GptNeox => &["gpt_neox"],
            Self::Bloom => &["bloom"],
            Self::Starcoder => &["gpt_bigcode", "starcoder2"],
            Self::Chatglm => &["chatglm"],
        }
    }

    pub fn accepts_model_type(&self, model_type: &str) -> bool {
        self.config_model_types()
            .iter()
            .any(|t| t.eq_ignore_ascii_case(model_type))
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown model family '{0}' (expected one of: llama, gptneox, bloom, starcoder, chatglm)")]
pub struct UnknownFamily(pub String);

impl FromStr for ModelFamily {
    type Err = UnknownFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|f| f.tag() == normalized)
            .ok_or_else(|| UnknownFamily(s.to_string()))
    }
}
