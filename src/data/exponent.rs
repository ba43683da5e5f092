use std::io::Write;
use std::path::Path;

use regex::Regex;
use serde::Serialize;

use super::literal::SciLiteral;
use super::loader::{for_each_row, list_files, matching_files};
use super::model::ReferenceExponent;
use crate::error::{Result, TraceError};

/// Default `|min + max| / 2 - reference` at which the asymmetric-spread
/// warning fires.
pub const DEFAULT_SPREAD_WARNING: f64 = 3.0;

// ---------------------------------------------------------------------------
// Per-file extraction
// ---------------------------------------------------------------------------

/// Exponent of every well-formed value in a trace file, in line order.
pub fn file_exponents(path: &Path) -> Result<Vec<i32>> {
    let mut exponents = Vec::new();
    for_each_row(path, |row| match SciLiteral::parse(row.value) {
        Ok(lit) => exponents.push(lit.exponent),
        Err(e) => log::warn!("{}:{}: {e}; skipped", path.display(), row.line),
    })?;
    Ok(exponents)
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Running exponent totals of one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderExponents {
    pub folder: String,
    pub files: usize,
    pub sum: i64,
    pub count: u64,
}

impl FolderExponents {
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

#[derive(Serialize)]
struct ReportRow<'a> {
    folder: &'a str,
    files: usize,
    sum: i64,
    count: u64,
    mean: Option<f64>,
}

/// Result of scanning a whole corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentStats {
    pub folders: Vec<FolderExponents>,
    pub min: i32,
    pub max: i32,
    reference: ReferenceExponent,
}

impl ExponentStats {
    /// Build from per-folder totals; the reference is
    /// `floor(total_sum / total_count)`.
    pub fn from_folders(folders: Vec<FolderExponents>, min: i32, max: i32) -> Result<Self> {
        let sum: i64 = folders.iter().map(|f| f.sum).sum();
        let count: u64 = folders.iter().map(|f| f.count).sum();
        if count == 0 {
            let names: Vec<&str> = folders.iter().map(|f| f.folder.as_str()).collect();
            return Err(TraceError::EmptyCorpus(format!("exponent scan of {names:?}")));
        }

        let count = i64::try_from(count)
            .map_err(|_| TraceError::EmptyCorpus("exponent count overflow".to_string()))?;
        let floor = sum.div_euclid(count);
        let reference = i32::try_from(floor)
            .map_err(|_| TraceError::EmptyCorpus(format!("reference exponent {floor} out of range")))?;

        Ok(Self {
            folders,
            min,
            max,
            reference: ReferenceExponent::new(reference),
        })
    }

    pub fn reference(&self) -> ReferenceExponent {
        self.reference
    }

    /// `|min + max| / 2 - reference`, the asymmetry score checked after a scan.
    pub fn spread(&self) -> f64 {
        (self.min as f64 + self.max as f64).abs() / 2.0 - self.reference.get() as f64
    }

    pub fn is_asymmetric(&self, threshold: f64) -> bool {
        self.spread() >= threshold
    }

    /// Write `folder,files,sum,count,mean` rows as CSV.
    pub fn write_report<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        for f in &self.folders {
            writer.serialize(ReportRow {
                folder: &f.folder,
                files: f.files,
                sum: f.sum,
                count: f.count,
                mean: f.mean(),
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ExponentAggregator
// ---------------------------------------------------------------------------

/// Scans folder corpora for the run's reference exponent.
#[derive(Debug, Clone)]
pub struct ExponentAggregator {
    pattern: Option<Regex>,
    spread_warning: f64,
}

impl Default for ExponentAggregator {
    fn default() -> Self {
        Self {
            pattern: None,
            spread_warning: DEFAULT_SPREAD_WARNING,
        }
    }
}

impl ExponentAggregator {
    /// Only scan files matching `pattern` (default: every `.txt` file).
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_spread_warning(mut self, threshold: f64) -> Self {
        self.spread_warning = threshold;
        self
    }

    /// Scan `root/<folder>` for every named folder.
    ///
    /// A missing folder aborts the scan immediately.
    pub fn scan<S: AsRef<str>>(&self, root: &Path, folders: &[S]) -> Result<ExponentStats> {
        let mut totals = Vec::with_capacity(folders.len());
        let mut min: Option<i32> = None;
        let mut max: Option<i32> = None;

        for folder in folders {
            let folder = folder.as_ref();
            let dir = root.join(folder);
            let files = match &self.pattern {
                Some(pattern) => matching_files(&dir, pattern)?,
                None => list_files(&dir, |name| name.ends_with(".txt"))?,
            };
            log::info!("Scanning exponents of \"{folder}\" ({} files)", files.len());

            let mut acc = FolderExponents {
                folder: folder.to_string(),
                files: files.len(),
                sum: 0,
                count: 0,
            };
            for (_, path) in &files {
                let exponents = file_exponents(path)?;
                if let (Some(lo), Some(hi)) = (exponents.iter().min(), exponents.iter().max()) {
                    min = Some(min.map_or(*lo, |m| m.min(*lo)));
                    max = Some(max.map_or(*hi, |m| m.max(*hi)));
                }
                acc.sum += exponents.iter().map(|&e| i64::from(e)).sum::<i64>();
                acc.count += exponents.len() as u64;
            }
            totals.push(acc);
        }

        let stats = ExponentStats::from_folders(totals, min.unwrap_or(0), max.unwrap_or(0))?;
        log::info!(
            "Reference exponent {} (min {}, max {})",
            stats.reference().get(),
            stats.min,
            stats.max
        );
        if stats.is_asymmetric(self.spread_warning) {
            log::warn!(
                "Asymmetric exponent spread: |min + max| / 2 - reference = {:.1} (reference {}, min {}, max {})",
                stats.spread(),
                stats.reference().get(),
                stats.min,
                stats.max
            );
        }
        Ok(stats)
    }
}
