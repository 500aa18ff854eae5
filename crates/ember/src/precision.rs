//! Target precisions for converted checkpoints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric precision applied to weights during conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 4-bit block quantization.
    #[default]
    Int4,
    /// 5-bit block quantization.
    Int5,
    /// 8-bit block quantization.
    Int8,
    /// Half precision, no quantization.
    F16,
}

impl Precision {
    pub const ALL: [Precision; 4] = [Self::Int4, Self::Int5, Self::Int8, Self::F16];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int4 => "int4",
            Self::Int5 => "int5",
            Self::Int8 => "int8",
            Self::F16 => "f16",
        }
    }

    /// Matching llama.cpp quantization type name.
    pub fn ggml_type(&self) -> &'static str {
        match self {
            Self::Int4 => "q4_0",
            Self::Int5 => "q5_0",
            Self::Int8 => "q8_0",
            Self::F16 => "f16",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported precision '{0}' (expected one of: int4, int5, int8, f16)")]
pub struct UnknownPrecision(pub String);

impl FromStr for Precision {
    type Err = UnknownPrecision;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "int4" | "q4_0" | "q4" => Ok(Self::Int4),
            "int5" | "q5_0" | "q5" => Ok(Self::Int5),
            "int8" | "q8_0" | "q8" => Ok(Self::Int8),
            "f16" | "fp16" | "float16" => Ok(Self::F16),
            _ => Err(UnknownPrecision(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for p in Precision::ALL {
            assert_eq!(p.as_str().parse::<Precision>().unwrap(), p);
            assert_eq!(p.ggml_type().parse::<Precision>().unwrap(), p);
        }
        assert_eq!("INT4".parse::<Precision>().unwrap(), Precision::Int4);
        assert_eq!(Precision::default(), Precision::Int4);
    }

    #[test]
    fn test_unknown_precision() {
        let err = "int3".parse::<Precision>().unwrap_err();
        assert!(err.to_string().contains("int3"));
    }

    #[test]
    fn test_serde_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            precision: Precision,
        }
        let w: Wrapper = toml::from_str("precision = \"int8\"").unwrap();
        assert_eq!(w.precision, Precision::Int8);
    }
}
