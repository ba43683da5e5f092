use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// TraceError – every failure the data layer can report
// ---------------------------------------------------------------------------

/// Errors produced while scanning, parsing, labelling and normalizing traces.
///
/// Structural problems (`MissingCorpus`, `InvalidConfig`, I/O) abort the run.
/// Per-line and per-sample problems (`MalformedLine`, `MalformedLiteral`,
/// `LabelIndex`) are logged by the caller and the offending row or sample is
/// dropped.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace folder does not exist: {}", path.display())]
    MissingCorpus { path: PathBuf },

    #[error("{}:{line}: {reason}", path.display())]
    MalformedLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("malformed literal '{literal}': {reason}")]
    MalformedLiteral { literal: String, reason: String },

    #[error("normalizer has not been fitted")]
    NotFitted,

    #[error("normalizer is already fitted; build a new one to refit")]
    AlreadyFitted,

    #[error("converter index {converter} is absent from a split label of {len} codes")]
    LabelIndex { converter: usize, len: usize },

    #[error("invalid digital code '{group}': {reason}")]
    InvalidCode { group: String, reason: String },

    #[error("no usable values found in {0}")]
    EmptyCorpus(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("index {index} is out of range for a dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("cache_all requires a dataset built with caching enabled")]
    CacheDisabled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;
