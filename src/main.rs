use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};

use trace_rebase::data::store;
use trace_rebase::{pipeline, PipelineConfig};

const DEFAULT_CONFIG: &str = "pipeline.json";

fn main() -> Result<()> {
    env_logger::init();

    let config_path = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| DEFAULT_CONFIG.to_string()),
    );
    let config = PipelineConfig::from_file(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    log::info!("Loaded config from {}", config_path.display());

    let output = pipeline::run(&config).context("running trace pipeline")?;

    if let Some(path) = &config.output.exponent_report {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        output.stats.write_report(file).context("writing exponent report")?;
        log::info!("Wrote exponent report to {}", path.display());
    }

    if let Some(path) = &config.output.normalizer_path {
        output
            .normalizer
            .save(path)
            .with_context(|| format!("saving normalizer to {}", path.display()))?;
        log::info!("Wrote normalizer state to {}", path.display());
    }

    if let Some(dir) = &config.output.dataset_dir {
        for corpus in output.train.iter().chain(&output.test) {
            let path = store::save_corpus(dir, corpus)?;
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("{}:\n{}", path.display(), store::preview(&path, 3)?);
            }
        }
    }

    // The run already read every trace; the views load on demand instead of
    // caching the whole corpus a second time.
    let lazy = PipelineConfig {
        cache: false,
        ..config.clone()
    };
    let views = pipeline::build_views(
        &lazy,
        &config.train_folders,
        output.reference(),
        &output.normalizer,
    )
    .context("building training views")?;
    log::info!(
        "{} training traces exposed through {} bit views (reference {})",
        views.dataset.len(),
        views.selectors.len(),
        output.reference()
    );

    Ok(())
}
