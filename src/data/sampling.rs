use super::model::FolderCorpus;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Sub-sampling call contract
// ---------------------------------------------------------------------------

/// Reduces the traces of a raw folder corpus before normalization.
///
/// `interval` is the decimation step, `max_samples` caps the samples kept per
/// trace, and `mode` names the sampler-specific reduction. Implementations
/// must keep digital codes and the folder name unchanged.
pub trait Sampler {
    fn sample(
        &self,
        raw: &FolderCorpus,
        interval: usize,
        max_samples: usize,
        mode: &str,
    ) -> Result<FolderCorpus>;
}

/// Hands every corpus through unchanged; used when no sampler is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Sampler for Passthrough {
    fn sample(&self, raw: &FolderCorpus, _interval: usize, _max_samples: usize, _mode: &str) -> Result<FolderCorpus> {
        Ok(raw.clone())
    }
}
