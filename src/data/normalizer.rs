use std::path::Path;

use serde::{Deserialize, Serialize};

use super::model::{FolderCorpus, Sample};
use crate::error::{Result, TraceError};

/// Floor applied before `log10`; also the denominator stabilizer.
pub const DEFAULT_CLIP_MIN: f64 = 1e-15;

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

/// The fitted log10 range, persisted as `{"min": .., "max": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizerState {
    pub min: f64,
    pub max: f64,
}

// ---------------------------------------------------------------------------
// LogNormalizer
// ---------------------------------------------------------------------------

/// Maps values into `[0, 1]` by their position in the corpus-wide log10 range:
///
/// ```text
/// t(v) = (log10(max(v, clip_min)) - min) / (max - min + clip_min)
/// ```
///
/// Fitted once over the whole train+test corpus, then read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct LogNormalizer {
    clip_min: f64,
    state: Option<NormalizerState>,
}

impl Default for LogNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_CLIP_MIN)
    }
}

impl LogNormalizer {
    pub fn new(clip_min: f64) -> Self {
        Self {
            clip_min,
            state: None,
        }
    }

    /// Rebuild a fitted normalizer from persisted state.
    pub fn from_state(clip_min: f64, state: NormalizerState) -> Self {
        Self {
            clip_min,
            state: Some(state),
        }
    }

    pub fn clip_min(&self) -> f64 {
        self.clip_min
    }

    pub fn state(&self) -> Option<NormalizerState> {
        self.state
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn log_clipped(&self, v: f64) -> f64 {
        v.max(self.clip_min).log10()
    }

    /// Fit the global log10 min/max over every value of every array.
    pub fn fit<'a, I>(&mut self, arrays: I) -> Result<NormalizerState>
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        if self.state.is_some() {
            return Err(TraceError::AlreadyFitted);
        }

        let mut range: Option<NormalizerState> = None;
        for &v in arrays.into_iter().flatten() {
            let l = self.log_clipped(v);
            range = Some(match range {
                None => NormalizerState { min: l, max: l },
                Some(r) => NormalizerState {
                    min: r.min.min(l),
                    max: r.max.max(l),
                },
            });
        }

        let state = range.ok_or_else(|| TraceError::EmptyCorpus("normalizer fit input".to_string()))?;
        log::info!("Log-range normalizer fitted: min {:.6}, max {:.6}", state.min, state.max);
        self.state = Some(state);
        Ok(state)
    }

    /// Fit over both splits together. The feature scale carries no label
    /// information, so test values are included on purpose.
    pub fn fit_corpora(&mut self, train: &[FolderCorpus], test: &[FolderCorpus]) -> Result<NormalizerState> {
        let arrays: Vec<Vec<f64>> = train
            .iter()
            .chain(test)
            .flat_map(|corpus| corpus.value_arrays())
            .collect();
        self.fit(arrays.iter().map(Vec::as_slice))
    }

    /// Transform one value.
    pub fn transform_value(&self, v: f64) -> Result<f64> {
        let state = self.state.ok_or(TraceError::NotFitted)?;
        Ok((self.log_clipped(v) - state.min) / (state.max - state.min + self.clip_min))
    }

    /// Transform an array.
    pub fn transform(&self, values: &[f64]) -> Result<Vec<f64>> {
        values.iter().map(|&v| self.transform_value(v)).collect()
    }

    /// A copy of `corpus` with every value transformed and times kept.
    pub fn transform_corpus(&self, corpus: &FolderCorpus) -> Result<FolderCorpus> {
        let mut out = FolderCorpus::new(corpus.folder_name.clone());
        for (code, samples) in &corpus.traces {
            let mapped = samples
                .iter()
                .map(|s| Ok(Sample::new(s.time, self.transform_value(s.value)?)))
                .collect::<Result<Vec<_>>>()?;
            out.traces.insert(code.clone(), mapped);
        }
        Ok(out)
    }

    /// Write the fitted range as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let state = self.state.ok_or(TraceError::NotFitted)?;
        let text = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Restore a normalizer saved by [`LogNormalizer::save`] without rescanning data.
    pub fn load(path: &Path, clip_min: f64) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let state: NormalizerState = serde_json::from_str(&text)?;
        Ok(Self::from_state(clip_min, state))
    }
}
