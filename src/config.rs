use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::exponent::DEFAULT_SPREAD_WARNING;
use crate::data::label::{DecodeStrategy, LabelCodec};
use crate::data::loader::DuplicatePolicy;
use crate::data::normalizer::DEFAULT_CLIP_MIN;
use crate::error::{Result, TraceError};

// ---------------------------------------------------------------------------
// PipelineConfig – everything a run needs, loaded from JSON
// ---------------------------------------------------------------------------

/// Run configuration.
///
/// ```json
/// {
///   "trace_root": "trace_files/analog_5px",
///   "train_folders": ["analog_5px_tt_px", "analog_5px_tt_pm"],
///   "test_folders": ["analog_5px_tt_x"],
///   "file_pattern": "lin_s\\d+_([0-9.]+)_([0-9.]+)_([0-9.]+)_([0-9.]+)_([0-9.]+)\\.txt",
///   "normalized_digital": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub trace_root: PathBuf,
    pub train_folders: Vec<String>,
    pub test_folders: Vec<String>,
    /// File-name regex with one capture group per converter, most significant first.
    pub file_pattern: String,

    #[serde(default = "default_converter_count")]
    pub converter_count: usize,
    #[serde(default = "default_bitwidth")]
    pub bitwidth: u32,
    #[serde(default)]
    pub split_digital: bool,
    #[serde(default)]
    pub normalized_digital: bool,
    #[serde(default)]
    pub decode_strategy: DecodeStrategy,
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default = "default_clip_min")]
    pub clip_min: f64,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// `|min + max| / 2 - reference` at which the exponent spread warning fires.
    #[serde(default = "default_spread_warning")]
    pub spread_warning: f64,

    #[serde(default)]
    pub sampling: Option<SamplingConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Arguments forwarded to the sub-sampler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub interval: usize,
    pub max_samples: usize,
    pub mode: String,
}

/// Where the driver writes its artifacts. Unset entries are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dataset_dir: Option<PathBuf>,
    pub normalizer_path: Option<PathBuf>,
    pub exponent_report: Option<PathBuf>,
}

fn default_converter_count() -> usize {
    5
}

fn default_bitwidth() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

fn default_clip_min() -> f64 {
    DEFAULT_CLIP_MIN
}

fn default_spread_warning() -> f64 {
    DEFAULT_SPREAD_WARNING
}

impl PipelineConfig {
    /// Read and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Compiled file-name pattern.
    pub fn pattern(&self) -> Result<Regex> {
        Ok(Regex::new(&self.file_pattern)?)
    }

    pub fn codec(&self) -> LabelCodec {
        LabelCodec::new(self.converter_count, self.bitwidth)
            .with_strategy(self.decode_strategy)
            .split(self.split_digital)
            .normalized(self.normalized_digital)
    }

    /// Train folders followed by test folders.
    pub fn all_folders(&self) -> Vec<String> {
        self.train_folders
            .iter()
            .chain(&self.test_folders)
            .cloned()
            .collect()
    }

    /// Reject settings that would corrupt a run.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TraceError::InvalidConfig(msg));

        if self.converter_count == 0 {
            return invalid("converter_count must be at least 1".to_string());
        }
        if !(1..=32).contains(&self.bitwidth) {
            return invalid(format!("bitwidth {} outside 1..=32", self.bitwidth));
        }
        let total_bits = self.converter_count as u64 * u64::from(self.bitwidth);
        if total_bits > 64 {
            return invalid(format!(
                "{} converters x {} bits do not fit a 64-bit code",
                self.converter_count, self.bitwidth
            ));
        }
        if self.train_folders.is_empty() && self.test_folders.is_empty() {
            return invalid("no train or test folders named".to_string());
        }
        if !(self.clip_min > 0.0 && self.clip_min.is_finite()) {
            return invalid(format!("clip_min {} must be positive", self.clip_min));
        }
        if let Some(sampling) = &self.sampling {
            if sampling.interval == 0 {
                return invalid("sampling interval must be at least 1".to_string());
            }
        }

        let groups = self.pattern()?.captures_len() - 1;
        let needs_all_groups = self.split_digital || self.decode_strategy == DecodeStrategy::MsbConcat;
        if needs_all_groups && groups != self.converter_count {
            return invalid(format!(
                "file_pattern has {groups} capture groups but converter_count is {}",
                self.converter_count
            ));
        }
        if groups == 0 {
            return invalid("file_pattern has no capture groups".to_string());
        }
        Ok(())
    }
}
