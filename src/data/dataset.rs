use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;

use super::label::{bit_selectors, BitSelector, LabelCodec};
use super::loader::{matching_files, TraceReader};
use super::model::{DigitalCode, TraceEntry};
use super::normalizer::LogNormalizer;
use crate::error::{Result, TraceError};

/// A loaded trace. Shared between the cache and every caller.
pub type Trace = Arc<[f64]>;

// ---------------------------------------------------------------------------
// TraceSource – where a dataset gets its arrays from
// ---------------------------------------------------------------------------

pub trait TraceSource {
    fn load(&self, path: &Path) -> Result<Vec<f64>>;
}

impl TraceSource for TraceReader {
    fn load(&self, path: &Path) -> Result<Vec<f64>> {
        self.read_values(path)
    }
}

/// Wraps a source so every loaded array comes out log-range normalized.
#[derive(Debug, Clone)]
pub struct Normalized<S> {
    inner: S,
    normalizer: LogNormalizer,
}

impl<S: TraceSource> Normalized<S> {
    /// Fails with `NotFitted` unless the normalizer has been fitted or loaded.
    pub fn new(inner: S, normalizer: LogNormalizer) -> Result<Self> {
        if !normalizer.is_fitted() {
            return Err(TraceError::NotFitted);
        }
        Ok(Self { inner, normalizer })
    }
}

impl<S: TraceSource> TraceSource for Normalized<S> {
    fn load(&self, path: &Path) -> Result<Vec<f64>> {
        let raw = self.inner.load(path)?;
        self.normalizer.transform(&raw)
    }
}

// ---------------------------------------------------------------------------
// TraceDataset – (trace, digital code) pairs with lazy, memoized loading
// ---------------------------------------------------------------------------

/// Maps file entries to `(trace, code)` pairs.
///
/// Each instance owns its cache; nothing is shared between datasets. The
/// cache sits behind a `RefCell`, so a dataset (and the bit views borrowing
/// it) stays on one thread and every fill happens through a single writer.
/// Entries are never evicted.
pub struct TraceDataset<S = TraceReader> {
    entries: Vec<TraceEntry>,
    source: S,
    cache_enabled: bool,
    cache: RefCell<HashMap<PathBuf, Trace>>,
    /// Cached traces in the order they were first loaded.
    order: RefCell<Vec<Trace>>,
    start: usize,
    end: usize,
}

impl<S: TraceSource> TraceDataset<S> {
    pub fn new(entries: Vec<TraceEntry>, source: S, cache: bool) -> Self {
        let end = entries.len();
        Self {
            entries,
            source,
            cache_enabled: cache,
            cache: RefCell::new(HashMap::new()),
            order: RefCell::new(Vec::new()),
            start: 0,
            end,
        }
    }

    /// Number of entries in the active range.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The raw `(file_name, path, code)` entry behind `index`.
    pub fn get_info(&self, index: usize) -> Option<&TraceEntry> {
        self.entry(index).ok()
    }

    /// The trace and digital code at `index`, loading the file on a cache miss.
    pub fn get(&self, index: usize) -> Result<(Trace, DigitalCode)> {
        let entry = self.entry(index)?;
        let trace = self.trace_for(entry)?;
        Ok((trace, entry.code.clone()))
    }

    /// Iterate over the active range in order.
    pub fn iter(&self) -> impl Iterator<Item = Result<(Trace, DigitalCode)>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Load every entry (the whole file list, not just the active range).
    pub fn cache_all(&self) -> Result<()> {
        if !self.cache_enabled {
            return Err(TraceError::CacheDisabled);
        }
        log::info!("Caching {} traces", self.entries.len());
        for entry in &self.entries {
            self.trace_for(entry)?;
        }
        log::info!("Cached {} traces", self.cached_len());
        Ok(())
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Cached traces in first-load order.
    pub fn cached_traces(&self) -> Vec<Trace> {
        self.order.borrow().clone()
    }

    /// Restrict the visible window to `start..end` of the full entry list.
    pub fn set_range(&mut self, start: usize, end: usize) -> Result<()> {
        if start > end || end > self.entries.len() {
            return Err(TraceError::IndexOutOfRange {
                index: end.max(start),
                len: self.entries.len(),
            });
        }
        self.start = start;
        self.end = end;
        Ok(())
    }

    /// Keep `floor(len * proportion)` entries: the leading ones for training,
    /// the trailing ones when `test` is set.
    pub fn set_prop_range(&mut self, test: bool, proportion: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&proportion) {
            return Err(TraceError::InvalidConfig(format!(
                "range proportion {proportion} outside [0, 1]"
            )));
        }
        let total = self.entries.len();
        let width = (total as f64 * proportion) as usize;
        let start = if test { total - width } else { 0 };
        self.set_range(start, start + width)
    }

    /// A binary-labelled view over this dataset's traces and cache.
    pub fn bit_view(&self, selector: BitSelector) -> BitView<'_, S> {
        BitView {
            dataset: self,
            selector,
        }
    }

    fn entry(&self, index: usize) -> Result<&TraceEntry> {
        if index >= self.len() {
            return Err(TraceError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(&self.entries[self.start + index])
    }

    fn trace_for(&self, entry: &TraceEntry) -> Result<Trace> {
        if self.cache_enabled {
            if let Some(hit) = self.cache.borrow().get(&entry.path) {
                return Ok(Arc::clone(hit));
            }
        }

        let trace: Trace = self.source.load(&entry.path)?.into();
        if self.cache_enabled {
            self.cache
                .borrow_mut()
                .insert(entry.path.clone(), Arc::clone(&trace));
            self.order.borrow_mut().push(Arc::clone(&trace));
        }
        Ok(trace)
    }
}

// ---------------------------------------------------------------------------
// BitView – one (converter, bit) classification target
// ---------------------------------------------------------------------------

/// `(trace, 0|1)` pairs for one bit of one converter.
pub struct BitView<'a, S> {
    dataset: &'a TraceDataset<S>,
    selector: BitSelector,
}

impl<'a, S: TraceSource> BitView<'a, S> {
    pub fn selector(&self) -> BitSelector {
        self.selector
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// The trace and bit label at `index`.
    ///
    /// The label is resolved before the trace is loaded, so a `LabelIndex`
    /// error never touches the file.
    pub fn get(&self, index: usize) -> Result<(Trace, u8)> {
        let entry = self.dataset.entry(index)?;
        let label = self.selector.label(&entry.code)?;
        let trace = self.dataset.trace_for(entry)?;
        Ok((trace, label))
    }

    /// Iterate in order. Samples whose split label lacks the addressed
    /// converter are logged and dropped; other errors are yielded.
    pub fn iter(&self) -> impl Iterator<Item = Result<(Trace, u8)>> + '_ {
        (0..self.len()).filter_map(move |i| match self.get(i) {
            Err(e @ TraceError::LabelIndex { .. }) => {
                let name = self
                    .dataset
                    .get_info(i)
                    .map(|entry| entry.file_name.as_str())
                    .unwrap_or("?");
                log::warn!("{name}: {e}; sample dropped from bit view {}", self.selector.index());
                None
            }
            other => Some(other),
        })
    }
}

// ---------------------------------------------------------------------------
// DatasetBuilder – file discovery → dataset + per-bit views
// ---------------------------------------------------------------------------

pub struct DatasetBuilder {
    entries: Vec<TraceEntry>,
    converter_count: usize,
    bitwidth: u32,
    cache: bool,
}

/// The combined-label dataset plus its `converter_count * bitwidth` selectors.
pub struct DatasetViews<S = TraceReader> {
    pub dataset: TraceDataset<S>,
    pub selectors: Vec<BitSelector>,
}

impl<S: TraceSource> DatasetViews<S> {
    /// Every bit view, LSB-first: view `i` is converter `i / bitwidth`, bit `i % bitwidth`.
    pub fn bit_views(&self) -> Vec<BitView<'_, S>> {
        self.selectors
            .iter()
            .map(|&s| self.dataset.bit_view(s))
            .collect()
    }
}

impl DatasetBuilder {
    pub fn new(converter_count: usize, bitwidth: u32, cache: bool) -> Self {
        Self {
            entries: Vec::new(),
            converter_count,
            bitwidth,
            cache,
        }
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Append every file of `dir` whose name matches `pattern`, decoding its
    /// label once. Undecodable names are logged and skipped. Returns the
    /// number of entries added.
    pub fn add_files(&mut self, dir: &Path, pattern: &Regex, codec: &LabelCodec) -> Result<usize> {
        let before = self.entries.len();
        for (file_name, path) in matching_files(dir, pattern)? {
            let Some(caps) = pattern.captures(&file_name) else {
                continue;
            };
            match codec.decode_captures(&caps) {
                Ok(code) => self.entries.push(TraceEntry {
                    file_name,
                    path,
                    code,
                }),
                Err(e) => log::warn!("{}: {e}; file skipped", path.display()),
            }
        }
        Ok(self.entries.len() - before)
    }

    /// Build the dataset over `source`. With caching on, every trace is
    /// loaded eagerly.
    pub fn build<S: TraceSource>(self, source: S) -> Result<DatasetViews<S>> {
        let dataset = TraceDataset::new(self.entries, source, self.cache);
        let selectors = bit_selectors(self.converter_count, self.bitwidth);
        if self.cache {
            dataset.cache_all()?;
        }
        Ok(DatasetViews { dataset, selectors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;
    use tempfile::TempDir;

    /// Returns a fixed array and counts how often it was asked to.
    struct CountingSource {
        calls: Cell<usize>,
    }

    impl CountingSource {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }
    }

    impl TraceSource for CountingSource {
        fn load(&self, path: &Path) -> Result<Vec<f64>> {
            self.calls.set(self.calls.get() + 1);
            Ok(vec![path.as_os_str().len() as f64])
        }
    }

    fn entry(name: &str, code: DigitalCode) -> TraceEntry {
        TraceEntry {
            file_name: name.to_string(),
            path: PathBuf::from(format!("/corpus/{name}")),
            code,
        }
    }

    fn entries() -> Vec<TraceEntry> {
        vec![
            entry("a.txt", DigitalCode::Combined(1)),
            entry("b.txt", DigitalCode::Combined(2)),
            entry("c.txt", DigitalCode::Combined(3)),
            entry("d.txt", DigitalCode::Combined(4)),
        ]
    }

    #[test]
    fn repeated_get_hits_the_cache() {
        let ds = TraceDataset::new(entries(), CountingSource::new(), true);
        let (first, code) = ds.get(1).unwrap();
        let (second, _) = ds.get(1).unwrap();

        assert_eq!(code, DigitalCode::Combined(2));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ds.source().calls.get(), 1);
        assert_eq!(ds.cached_traces().len(), 1);
    }

    #[test]
    fn disabled_cache_reloads_every_time() {
        let ds = TraceDataset::new(entries(), CountingSource::new(), false);
        ds.get(0).unwrap();
        ds.get(0).unwrap();
        assert_eq!(ds.source().calls.get(), 2);
        assert_eq!(ds.cached_len(), 0);
        assert!(matches!(ds.cache_all(), Err(TraceError::CacheDisabled)));
    }

    #[test]
    fn caches_are_per_instance() {
        let a = TraceDataset::new(entries(), CountingSource::new(), true);
        let b = TraceDataset::new(entries(), CountingSource::new(), true);
        a.cache_all().unwrap();
        b.get(0).unwrap();
        assert_eq!(a.source().calls.get(), 4);
        assert_eq!(b.source().calls.get(), 1);
        assert_eq!(b.cached_len(), 1);
    }

    #[test]
    fn cache_all_keeps_first_load_order() {
        let ds = TraceDataset::new(entries(), CountingSource::new(), true);
        ds.get(2).unwrap();
        ds.cache_all().unwrap();

        let order: Vec<f64> = ds.cached_traces().iter().map(|t| t[0]).collect();
        let c_len = "/corpus/c.txt".len() as f64;
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], c_len);
        assert_eq!(ds.source().calls.get(), 4);
    }

    #[test]
    fn info_and_bounds() {
        let ds = TraceDataset::new(entries(), CountingSource::new(), true);
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.get_info(3).unwrap().file_name, "d.txt");
        assert!(ds.get_info(4).is_none());
        assert!(matches!(ds.get(4), Err(TraceError::IndexOutOfRange { index: 4, len: 4 })));
    }

    #[test]
    fn proportional_ranges_split_head_and_tail() {
        let mut train = TraceDataset::new(entries(), CountingSource::new(), false);
        train.set_prop_range(false, 0.5).unwrap();
        assert_eq!(train.len(), 2);
        assert_eq!(train.get_info(0).unwrap().file_name, "a.txt");

        let mut test = TraceDataset::new(entries(), CountingSource::new(), false);
        test.set_prop_range(true, 0.25).unwrap();
        assert_eq!(test.len(), 1);
        assert_eq!(test.get_info(0).unwrap().file_name, "d.txt");

        assert!(test.set_range(3, 5).is_err());
        assert!(test.set_prop_range(true, 1.5).is_err());
    }

    #[test]
    fn bit_view_labels_share_the_cache() {
        let ds = TraceDataset::new(entries(), CountingSource::new(), true);
        let bit0 = ds.bit_view(BitSelector::new(0, 0, 8));
        let bit1 = ds.bit_view(BitSelector::new(0, 1, 8));

        let labels0: Vec<u8> = bit0.iter().map(|r| r.unwrap().1).collect();
        let labels1: Vec<u8> = bit1.iter().map(|r| r.unwrap().1).collect();
        assert_eq!(labels0, vec![1, 0, 1, 0]);
        assert_eq!(labels1, vec![0, 1, 1, 0]);
        assert_eq!(ds.source().calls.get(), 4);
    }

    #[test]
    fn split_view_drops_samples_missing_the_converter() {
        let entries = vec![
            entry("full.txt", DigitalCode::Split(vec![1, 1])),
            entry("short.txt", DigitalCode::Split(vec![1])),
        ];
        let ds = TraceDataset::new(entries, CountingSource::new(), true);
        let view = ds.bit_view(BitSelector::new(1, 0, 8));

        assert!(matches!(view.get(1), Err(TraceError::LabelIndex { .. })));
        let kept: Vec<u8> = view.iter().map(|r| r.unwrap().1).collect();
        assert_eq!(kept, vec![1]);
        assert_eq!(ds.source().calls.get(), 1);
    }

    #[test]
    fn builder_discovers_files_and_builds_all_views() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("lin_s1_3_0.txt"), "time  -i(vdd)\n0 1.0e-03\n").unwrap();
        fs::write(tmp.path().join("lin_s2_0_1.txt"), "0 2.0e-03\n1 3.0e-03\n").unwrap();
        fs::write(tmp.path().join("other.txt"), "0 9.9e-03\n").unwrap();

        let pattern = Regex::new(r"^lin_s\d+_(\d+)_(\d+)\.txt$").unwrap();
        let codec = LabelCodec::new(2, 8);
        let mut builder = DatasetBuilder::new(2, 8, true);
        assert_eq!(builder.add_files(tmp.path(), &pattern, &codec).unwrap(), 2);

        let views = builder.build(TraceReader::raw()).unwrap();
        assert_eq!(views.dataset.cached_len(), 2);
        assert_eq!(views.selectors.len(), 16);

        let (trace, code) = views.dataset.get(0).unwrap();
        assert_eq!(code, DigitalCode::Combined(3 * 256));
        assert_eq!(&trace[..], &[1.0e-3]);

        let bit_views = views.bit_views();
        // converter 1 (first-named) bit 0 and bit 1 of file one: 3 = 0b11
        assert_eq!(bit_views[8].get(0).unwrap().1, 1);
        assert_eq!(bit_views[9].get(0).unwrap().1, 1);
        assert_eq!(bit_views[0].get(1).unwrap().1, 1);
        assert_eq!(bit_views[8].get(1).unwrap().1, 0);
    }

    #[test]
    fn normalized_source_requires_a_fit() {
        assert!(matches!(
            Normalized::new(TraceReader::raw(), LogNormalizer::default()),
            Err(TraceError::NotFitted)
        ));

        let mut normalizer = LogNormalizer::default();
        normalizer.fit([&[1e-4, 1e-2][..]]).unwrap();
        let source = Normalized::new(CountingSource::new(), normalizer).unwrap();
        let ds = TraceDataset::new(entries(), source, true);
        let (trace, _) = ds.get(0).unwrap();
        assert!(trace[0] > 1.0);
    }
}
