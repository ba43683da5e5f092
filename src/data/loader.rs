use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::label::LabelCodec;
use super::literal::{self, has_exponent_marker};
use super::model::{FolderCorpus, ReferenceExponent, Sample};
use crate::error::{Result, TraceError};

// ---------------------------------------------------------------------------
// Row scanning shared by the reader and the exponent aggregator
// ---------------------------------------------------------------------------

/// Header written by the simulator on the first line of every trace.
const HEADER: [&str; 2] = ["time", "-i(vdd)"];

/// Whitespace-insensitive match against `time  -i(vdd)`.
pub fn is_header(line: &str) -> bool {
    line.split_whitespace().eq(HEADER)
}

/// A data row that has at least two columns and a scientific value token.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DataRow<'a> {
    /// 1-based line number in the file.
    pub line: usize,
    pub time: &'a str,
    pub value: &'a str,
}

/// Call `f` for every usable row of a trace file, in file order.
///
/// The first line is skipped only when it is the header. Short rows and
/// rows whose value lacks an exponent marker are logged and skipped.
/// Returns the number of rows skipped.
pub(crate) fn for_each_row(path: &Path, mut f: impl FnMut(DataRow<'_>)) -> Result<usize> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let mut skipped = 0;

    for idx in 0.. {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(text) => text.trim_end_matches(['\n', '\r']),
            Err(e) => {
                let err = TraceError::MalformedLine {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    reason: format!("not valid UTF-8 ({e})"),
                };
                log::warn!("{err}; skipped");
                skipped += 1;
                continue;
            }
        };
        if idx == 0 && is_header(line) {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(time), Some(value)) = (parts.next(), parts.next()) else {
            log::debug!("{}:{}: fewer than two columns, skipped", path.display(), idx + 1);
            skipped += 1;
            continue;
        };

        if !has_exponent_marker(value) {
            let err = TraceError::MalformedLine {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: format!("non-scientific value '{value}'"),
            };
            log::warn!("{err}; skipped");
            skipped += 1;
            continue;
        }

        f(DataRow {
            line: idx + 1,
            time,
            value,
        });
    }

    Ok(skipped)
}

// ---------------------------------------------------------------------------
// TraceReader – one file → ordered values
// ---------------------------------------------------------------------------

/// Scale the reader expresses values in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueScale {
    /// Each literal parsed at its own exponent.
    Raw,
    /// Each literal rebased onto the run's reference exponent.
    Rebased(ReferenceExponent),
}

/// Reads `(time, value)` trace files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceReader {
    scale: ValueScale,
}

impl TraceReader {
    pub fn raw() -> Self {
        Self {
            scale: ValueScale::Raw,
        }
    }

    pub fn rebased(reference: ReferenceExponent) -> Self {
        Self {
            scale: ValueScale::Rebased(reference),
        }
    }

    pub fn scale(&self) -> ValueScale {
        self.scale
    }

    /// Read every well-formed row as a [`Sample`], preserving line order.
    pub fn read_samples(&self, path: &Path) -> Result<Vec<Sample>> {
        let mut samples = Vec::new();
        let skipped = for_each_row(path, |row| {
            let time = match row.time.parse::<f64>() {
                Ok(t) => t,
                Err(_) => {
                    let err = TraceError::MalformedLine {
                        path: path.to_path_buf(),
                        line: row.line,
                        reason: format!("time '{}' is not a number", row.time),
                    };
                    log::warn!("{err}; skipped");
                    return;
                }
            };
            if let Some(value) = self.value_or_log(path, row) {
                samples.push(Sample::new(time, value));
            }
        })?;

        self.log_summary(path, samples.len(), skipped);
        Ok(samples)
    }

    /// Read only the value column, preserving line order.
    pub fn read_values(&self, path: &Path) -> Result<Vec<f64>> {
        let mut values = Vec::new();
        let skipped = for_each_row(path, |row| {
            if let Some(value) = self.value_or_log(path, row) {
                values.push(value);
            }
        })?;

        self.log_summary(path, values.len(), skipped);
        Ok(values)
    }

    /// Parse one value token in this reader's scale.
    pub fn parse_value(&self, token: &str) -> Result<f64> {
        match self.scale {
            ValueScale::Raw => literal::parse_plain(token),
            ValueScale::Rebased(reference) => literal::parse_rebased(token, reference),
        }
    }

    fn value_or_log(&self, path: &Path, row: DataRow<'_>) -> Option<f64> {
        match self.parse_value(row.value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("{}:{}: {e}; sample dropped", path.display(), row.line);
                None
            }
        }
    }

    fn log_summary(&self, path: &Path, kept: usize, skipped: usize) {
        if kept == 0 {
            log::warn!("{}: no usable rows", path.display());
        } else {
            log::debug!("{}: {kept} rows read, {skipped} skipped", path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// File discovery
// ---------------------------------------------------------------------------

/// Regular files in `dir` accepted by `accept`, sorted by name.
///
/// A missing directory is fatal: an incomplete corpus must never be
/// processed silently.
pub fn list_files(dir: &Path, accept: impl Fn(&str) -> bool) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Err(TraceError::MissingCorpus {
            path: dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("{}: non UTF-8 file name ignored", entry.path().display());
            continue;
        };
        if accept(&name) {
            files.push((name, entry.path()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Files in `dir` whose names match the label pattern.
pub fn matching_files(dir: &Path, pattern: &Regex) -> Result<Vec<(String, PathBuf)>> {
    list_files(dir, |name| pattern.is_match(name))
}

// ---------------------------------------------------------------------------
// Folder corpora
// ---------------------------------------------------------------------------

/// What to do when two files of one folder decode to the same digital code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// The first file in name order wins; later ones are not read.
    #[default]
    KeepFirst,
    /// The last file in name order replaces earlier ones.
    KeepLast,
}

/// Read every matching file of `root/folder` into a [`FolderCorpus`].
///
/// Files whose names fail label decoding are logged and skipped.
pub fn load_folder(
    root: &Path,
    folder: &str,
    pattern: &Regex,
    codec: &LabelCodec,
    reader: &TraceReader,
    policy: DuplicatePolicy,
) -> Result<FolderCorpus> {
    let dir = root.join(folder);
    let files = matching_files(&dir, pattern)?;
    log::info!("Handling folder \"{folder}\" ({} files)", files.len());

    let mut corpus = FolderCorpus::new(folder);
    for (name, path) in files {
        let Some(caps) = pattern.captures(&name) else {
            continue;
        };
        let code = match codec.decode_captures(&caps) {
            Ok(code) => code,
            Err(e) => {
                log::warn!("{}: {e}; file skipped", path.display());
                continue;
            }
        };

        if corpus.traces.contains_key(&code) {
            log::warn!("{folder}: duplicate digital code {code} in {name} ({policy:?})");
            if policy == DuplicatePolicy::KeepFirst {
                continue;
            }
        }

        let samples = reader.read_samples(&path)?;
        corpus.traces.insert(code, samples);
    }

    Ok(corpus)
}
