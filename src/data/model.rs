use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Sample – one (time, value) row of a trace file
// ---------------------------------------------------------------------------

/// A single measurement row. Immutable once read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

// ---------------------------------------------------------------------------
// ReferenceExponent – the shared decimal scale of a run
// ---------------------------------------------------------------------------

/// The decimal exponent every value of a run is rebased against.
///
/// Produced once by the exponent aggregator and passed by value to every
/// reader afterwards. A rebased number `n` stands for `n * 10^r`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceExponent(i32);

impl ReferenceExponent {
    pub fn new(exponent: i32) -> Self {
        Self(exponent)
    }

    /// The exponent itself, e.g. `-4`.
    pub fn get(self) -> i32 {
        self.0
    }

    /// The offset added to a literal's own exponent while rebasing.
    ///
    /// Carried as the negated reference, so `e_diff = exponent + offset`.
    pub fn offset(self) -> i32 {
        -self.0
    }
}

impl fmt::Display for ReferenceExponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1e{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DigitalCode – ground-truth converter output decoded from a file name
// ---------------------------------------------------------------------------

/// Converter output(s) for one trace.
///
/// `Combined` holds every converter code concatenated big-endian (first
/// capture group most significant). `Split` keeps one code per converter in
/// file-naming order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigitalCode {
    Combined(u64),
    Split(Vec<u64>),
}

impl DigitalCode {
    pub fn is_split(&self) -> bool {
        matches!(self, DigitalCode::Split(_))
    }

    /// Codes as a flat list: one element when combined, one per converter when split.
    pub fn components(&self) -> Vec<u64> {
        match self {
            DigitalCode::Combined(v) => vec![*v],
            DigitalCode::Split(v) => v.clone(),
        }
    }
}

impl fmt::Display for DigitalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigitalCode::Combined(v) => write!(f, "{v}"),
            DigitalCode::Split(parts) => {
                let joined: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FolderCorpus – one physical trace directory
// ---------------------------------------------------------------------------

/// Every trace of one folder, keyed by its digital code.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderCorpus {
    pub folder_name: String,
    pub traces: BTreeMap<DigitalCode, Vec<Sample>>,
}

impl FolderCorpus {
    pub fn new(folder_name: impl Into<String>) -> Self {
        Self {
            folder_name: folder_name.into(),
            traces: BTreeMap::new(),
        }
    }

    /// Number of traces.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether the corpus holds no traces.
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Iterate over the values of every trace, in code order.
    pub fn value_arrays(&self) -> impl Iterator<Item = Vec<f64>> + '_ {
        self.traces
            .values()
            .map(|samples| samples.iter().map(|s| s.value).collect())
    }
}

// ---------------------------------------------------------------------------
// TraceEntry – one row of a dataset's file list
// ---------------------------------------------------------------------------

/// `(file_name, path, label)` as discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub file_name: String,
    pub path: PathBuf,
    pub code: DigitalCode,
}
