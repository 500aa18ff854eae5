use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ember::{ModelFamily, Precision};

#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Run quantized causal language models, converting and caching on first use", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (default: ./ember.toml, then the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Generate text, timing each tokenization path
    Generate {
        /// Hub repository id in org/name form (bare names such as `gpt2` are
        /// read as local paths) or a local checkpoint / artifact path
        #[arg(long)]
        repo_id_or_model_path: Option<String>,

        /// Worker threads for inference
        #[arg(long)]
        thread_num: Option<usize>,

        #[arg(long, default_value = "Q: tell me something about intel. A:")]
        prompt: String,

        /// Maximum tokens to generate
        #[arg(short = 'n', long, default_value_t = ember::generation::DEFAULT_MAX_NEW_TOKENS)]
        max_new_tokens: usize,

        /// int4, int5, int8 or f16
        #[arg(long)]
        precision: Option<Precision>,

        /// llama, gptneox, bloom, starcoder or chatglm
        #[arg(long)]
        family: Option<ModelFamily>,

        /// Where converted models are cached
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Which tokenization path(s) to run
        #[arg(long, value_enum, default_value_t = Mode::All)]
        mode: Mode,
    },

    /// Convert a local checkpoint without touching the cache
    Convert {
        /// Checkpoint directory or file
        #[arg(long)]
        input: PathBuf,

        /// Output directory
        #[arg(long, default_value = "./")]
        output: PathBuf,

        #[arg(long)]
        family: Option<ModelFamily>,

        #[arg(long)]
        precision: Option<Precision>,
    },

    /// Inspect or clean the converted-model cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum CacheCommands {
    /// List valid cache entries
    List {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Remove the cached conversions of one model
    Purge {
        /// Hub repository id or local path the entries were built from
        source: String,

        /// Only this precision (default: all)
        #[arg(long)]
        precision: Option<Precision>,

        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// External, internal and direct, one after another
    All,
    /// Ids from the model's tokenizer.json
    External,
    /// Ids from the tokenizer bundled with the converted model
    Internal,
    /// Text in, text out
    Direct,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_defaults() {
        let cli = Cli::try_parse_from(["ember", "generate"]).unwrap();
        match cli.command {
            Commands::Generate {
                prompt,
                max_new_tokens,
                mode,
                precision,
                ..
            } => {
                assert_eq!(prompt, "Q: tell me something about intel. A:");
                assert_eq!(max_new_tokens, 32);
                assert_eq!(mode, Mode::All);
                assert_eq!(precision, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_generate_flags() {
        let cli = Cli::try_parse_from([
            "ember",
            "-vv",
            "generate",
            "--repo-id-or-model-path",
            "./models/neox",
            "--thread-num",
            "8",
            "--precision",
            "q8_0",
            "--family",
            "gpt-neox",
            "--mode",
            "direct",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.command,
            Commands::Generate {
                repo_id_or_model_path: Some("./models/neox".to_string()),
                thread_num: Some(8),
                prompt: "Q: tell me something about intel. A:".to_string(),
                max_new_tokens: 32,
                precision: Some(Precision::Int8),
                family: Some(ModelFamily::GptNeox),
                cache_dir: None,
                mode: Mode::Direct,
            }
        );
    }

    #[test]
    fn test_bad_precision_is_rejected() {
        assert!(Cli::try_parse_from(["ember", "generate", "--precision", "int3"]).is_err());
    }

    #[test]
    fn test_cache_purge() {
        let cli = Cli::try_parse_from(["ember", "cache", "purge", "org/demo-model"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Cache {
                action: CacheCommands::Purge {
                    source: "org/demo-model".to_string(),
                    precision: None,
                    cache_dir: None,
                }
            }
        );
    }
}
