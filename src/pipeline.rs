use crate::config::PipelineConfig;
use crate::data::dataset::{DatasetBuilder, DatasetViews, Normalized};
use crate::data::exponent::{ExponentAggregator, ExponentStats};
use crate::data::loader::{load_folder, TraceReader};
use crate::data::model::{FolderCorpus, ReferenceExponent};
use crate::data::normalizer::LogNormalizer;
use crate::data::sampling::{Passthrough, Sampler};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Pipeline – aggregate → read → sample → normalize
// ---------------------------------------------------------------------------

/// Everything one run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub stats: ExponentStats,
    /// Normalized train corpora, in configured folder order.
    pub train: Vec<FolderCorpus>,
    /// Normalized test corpora, in configured folder order.
    pub test: Vec<FolderCorpus>,
    /// Fitted over the sampled train and test corpora together.
    pub normalizer: LogNormalizer,
}

impl PipelineOutput {
    pub fn reference(&self) -> ReferenceExponent {
        self.stats.reference()
    }

    pub fn trace_count(&self) -> usize {
        self.train.iter().chain(&self.test).map(FolderCorpus::len).sum()
    }
}

/// Run with no sub-sampling.
pub fn run(config: &PipelineConfig) -> Result<PipelineOutput> {
    run_with_sampler(config, &Passthrough)
}

/// Run the whole ingestion. `sampler` is only consulted when the config
/// carries a `sampling` section.
///
/// Any missing folder stops the run before a single trace is read.
pub fn run_with_sampler(config: &PipelineConfig, sampler: &dyn Sampler) -> Result<PipelineOutput> {
    let pattern = config.pattern()?;
    let folders = config.all_folders();

    let stats = ExponentAggregator::default()
        .with_pattern(pattern.clone())
        .with_spread_warning(config.spread_warning)
        .scan(&config.trace_root, &folders)?;

    let reader = TraceReader::rebased(stats.reference());
    let codec = config.codec();

    let load = |folder: &String| -> Result<FolderCorpus> {
        let raw = load_folder(
            &config.trace_root,
            folder,
            &pattern,
            &codec,
            &reader,
            config.duplicate_policy,
        )?;
        match &config.sampling {
            Some(s) => {
                let sampled = sampler.sample(&raw, s.interval, s.max_samples, &s.mode)?;
                log::info!(
                    "Sampled \"{folder}\": {} traces (interval {}, max {}, mode {})",
                    sampled.len(),
                    s.interval,
                    s.max_samples,
                    s.mode
                );
                Ok(sampled)
            }
            None => Ok(raw),
        }
    };

    let train_raw = config.train_folders.iter().map(load).collect::<Result<Vec<_>>>()?;
    let test_raw = config.test_folders.iter().map(load).collect::<Result<Vec<_>>>()?;

    let mut normalizer = LogNormalizer::new(config.clip_min);
    normalizer.fit_corpora(&train_raw, &test_raw)?;

    let train = train_raw
        .iter()
        .map(|c| normalizer.transform_corpus(c))
        .collect::<Result<Vec<_>>>()?;
    let test = test_raw
        .iter()
        .map(|c| normalizer.transform_corpus(c))
        .collect::<Result<Vec<_>>>()?;

    let output = PipelineOutput {
        stats,
        train,
        test,
        normalizer,
    };
    log::info!(
        "Pipeline done: {} traces at reference {}",
        output.trace_count(),
        output.reference()
    );
    Ok(output)
}

// ---------------------------------------------------------------------------
// Per-bit dataset views
// ---------------------------------------------------------------------------

/// Build lazily-loaded training views over `folders`: traces are read at the
/// reference scale and normalized with an already-fitted normalizer.
pub fn build_views(
    config: &PipelineConfig,
    folders: &[String],
    reference: ReferenceExponent,
    normalizer: &LogNormalizer,
) -> Result<DatasetViews<Normalized<TraceReader>>> {
    let pattern = config.pattern()?;
    let codec = config.codec();

    let mut builder = DatasetBuilder::new(config.converter_count, config.bitwidth, config.cache);
    for folder in folders {
        let added = builder.add_files(&config.trace_root.join(folder), &pattern, &codec)?;
        log::debug!("{folder}: {added} entries");
    }

    let source = Normalized::new(TraceReader::rebased(reference), normalizer.clone())?;
    builder.build(source)
}
