//! Conversion seam: checkpoint in, quantized artifact out.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::family::ModelFamily;
use crate::fetch::WeightFormat;
use crate::precision::Precision;

/// One conversion request handed to a [`Converter`].
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Checkpoint directory (or single checkpoint file).
    pub input: PathBuf,
    /// Empty directory the artifact must be written into.
    pub output_dir: PathBuf,
    pub family: ModelFamily,
    pub precision: Precision,
}

impl ConversionJob {
    /// Deterministic artifact file name for this family and precision.
    pub fn artifact_name(&self) -> String {
        artifact_file_name(self.family, self.precision)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(self.artifact_name())
    }
}

pub fn artifact_file_name(family: ModelFamily, precision: Precision) -> String {
    format!("ggml-{}-{}.gguf", family.tag(), precision.as_str())
}

/// Converts a checkpoint to the binary layout of the requested precision.
///
/// Called from a blocking thread. Must write only inside `job.output_dir`
/// and return the path of the produced file.
pub trait Converter: Send + Sync {
    fn convert(&self, job: &ConversionJob) -> Result<PathBuf>;

    /// Checkpoint weight formats this converter reads. Remote checkpoints
    /// are only downloaded in one of these.
    fn input_formats(&self) -> &'static [WeightFormat] {
        WeightFormat::ALL
    }
}

#[derive(Debug, Deserialize)]
struct HfConfig {
    model_type: Option<String>,
    #[serde(default)]
    architectures: Vec<String>,
}

/// Checks a checkpoint's `config.json` against the requested family.
///
/// Checkpoints without a `config.json` are left to the converter.
pub fn check_family(checkpoint: &Path, family: ModelFamily) -> Result<()> {
    let config_path = if checkpoint.is_dir() {
        checkpoint.join("config.json")
    } else {
        return Ok(());
    };
    if !config_path.exists() {
        return Ok(());
    }

    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let config: HfConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", config_path.display()))?;

    match config.model_type.as_deref() {
        Some(model_type) if family.accepts_model_type(model_type) => Ok(()),
        Some(model_type) => Err(anyhow!(
            "checkpoint architecture '{}' ({}) is not supported by the {} converter",
            model_type,
            config.architectures.join(", "),
            family.display_name()
        )),
        None => Ok(()),
    }
}

/// Runs an external conversion program.
///
/// Arguments may contain the placeholders `{input}`, `{output_dir}`,
/// `{outfile}`, `{family}`, `{precision}` and `{ggml_type}`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandConverter {
    pub const DEFAULT_ARGS: &'static [&'static str] = &[
        "--input",
        "{input}",
        "--outfile",
        "{outfile}",
        "--family",
        "{family}",
        "--dtype",
        "{precision}",
    ];

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Self::DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn render_args(&self, job: &ConversionJob) -> Vec<String> {
        let outfile = job.artifact_path();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &job.input.to_string_lossy())
                    .replace("{output_dir}", &job.output_dir.to_string_lossy())
                    .replace("{outfile}", &outfile.to_string_lossy())
                    .replace("{family}", job.family.tag())
                    .replace("{precision}", job.precision.as_str())
                    .replace("{ggml_type}", job.precision.ggml_type())
            })
            .collect()
    }
}

impl Converter for CommandConverter {
    fn convert(&self, job: &ConversionJob) -> Result<PathBuf> {
        let args = self.render_args(job);
        log::info!("running {} {}", self.program.display(), args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .with_context(|| format!("failed to start {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
            bail!(
                "{} exited with {}:\n{}",
                self.program.display(),
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join("\n")
            );
        }

        let produced = job.artifact_path();
        if !produced.is_file() {
            bail!(
                "{} succeeded but did not write {}",
                self.program.display(),
                produced.display()
            );
        }
        Ok(produced)
    }
}
