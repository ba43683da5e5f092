use std::fs;
use std::path::Path;

use regex::Regex;
use serde_json::json;
use tempfile::TempDir;

use trace_rebase::data::label::LabelCodec;
use trace_rebase::data::loader::{load_folder, DuplicatePolicy, TraceReader};
use trace_rebase::data::model::{DigitalCode, FolderCorpus, Sample};
use trace_rebase::data::sampling::Sampler;
use trace_rebase::data::store;
use trace_rebase::pipeline::{build_views, run, run_with_sampler};
use trace_rebase::{PipelineConfig, TraceError};

const PATTERN: &str = r"^lin_s\d+_([0-9.]+)_([0-9.]+)_([0-9.]+)_([0-9.]+)_([0-9.]+)\.txt$";

/// Code `128 * 256^4`: the most-significant converter at half scale.
const HALF_MSB: u64 = 128 << 32;

fn write_trace(root: &Path, folder: &str, name: &str, body: &str) {
    let dir = root.join(folder);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), body).unwrap();
}

/// One train trace at 1e-3 and one test trace at 1e-5, so the mean exponent
/// is -4 across both splits.
fn corpus() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_trace(
        tmp.path(),
        "train",
        "lin_s1_0.5_0.0_0.0_0.0_0.0.txt",
        "time  -i(vdd)\n0.0 5.00000000e-03\n1.0 -2.17498915e-03\n",
    );
    write_trace(
        tmp.path(),
        "test",
        "lin_s2_0.0_0.0_0.0_0.0_0.00390625.txt",
        "time  -i(vdd)\n0.0 1.00000000e-05\n1.0 3.00000000e-05\n",
    );
    tmp
}

fn config(root: &Path) -> PipelineConfig {
    let config: PipelineConfig = serde_json::from_value(json!({
        "trace_root": root,
        "train_folders": ["train"],
        "test_folders": ["test"],
        "file_pattern": PATTERN,
        "normalized_digital": true,
    }))
    .unwrap();
    config.validate().unwrap();
    config
}

#[test]
fn end_to_end_rebases_labels_and_normalizes() {
    let tmp = corpus();
    let output = run(&config(tmp.path())).unwrap();

    assert_eq!(output.reference().get(), -4);
    assert_eq!(output.trace_count(), 2);

    // 5.0e-3 rebased to 1e-4 units is 50; the negative value clips to the floor.
    let state = output.normalizer.state().unwrap();
    assert!((state.min + 15.0).abs() < 1e-12);
    assert!((state.max - 50f64.log10()).abs() < 1e-12);

    let train = &output.train[0];
    assert_eq!(train.folder_name, "train");
    let samples = &train.traces[&DigitalCode::Combined(HALF_MSB)];
    assert_eq!(samples.len(), 2);
    assert_eq!((samples[0].time, samples[1].time), (0.0, 1.0));
    assert!((samples[0].value - 1.0).abs() < 1e-12);
    assert_eq!(samples[1].value, 0.0);

    let test = &output.test[0];
    assert!(test.traces.contains_key(&DigitalCode::Combined(1)));
}

#[test]
fn missing_folder_stops_the_run() {
    let tmp = corpus();
    let mut config = config(tmp.path());
    config.test_folders.push("absent".to_string());

    let err = run(&config).unwrap_err();
    assert!(matches!(err, TraceError::MissingCorpus { ref path } if path.ends_with("absent")));
}

#[test]
fn bit_views_expose_every_converter_bit() {
    let tmp = corpus();
    let config = config(tmp.path());
    let output = run(&config).unwrap();

    let views = build_views(&config, &config.train_folders, output.reference(), &output.normalizer).unwrap();
    assert_eq!(views.selectors.len(), 40);
    assert_eq!(views.dataset.cached_len(), 1);

    let bit_views = views.bit_views();
    let (trace, label) = bit_views[39].get(0).unwrap();
    assert_eq!(label, 1);
    assert_eq!(bit_views[38].get(0).unwrap().1, 0);
    assert_eq!(bit_views[0].get(0).unwrap().1, 0);

    let expected = &output.train[0].traces[&DigitalCode::Combined(HALF_MSB)];
    assert_eq!(trace.len(), expected.len());
    for (got, want) in trace.iter().zip(expected) {
        assert!((got - want.value).abs() < 1e-12);
    }
}

#[test]
fn uncached_views_load_on_demand() {
    let tmp = corpus();
    let mut config = config(tmp.path());
    let output = run(&config).unwrap();

    config.cache = false;
    let views = build_views(&config, &config.train_folders, output.reference(), &output.normalizer).unwrap();
    assert_eq!(views.dataset.len(), 1);
    assert_eq!(views.dataset.cached_len(), 0);

    let (trace, label) = views.bit_views()[39].get(0).unwrap();
    assert_eq!((trace.len(), label), (2, 1));
    assert_eq!(views.dataset.cached_len(), 0);
}

#[test]
fn duplicate_codes_follow_the_policy() {
    let tmp = TempDir::new().unwrap();
    write_trace(tmp.path(), "f", "lin_s1_1_2_3_4_5.txt", "0.0 1.00000000e-03\n");
    write_trace(tmp.path(), "f", "lin_s2_1_2_3_4_5.txt", "0.0 2.00000000e-03\n");

    let pattern = Regex::new(PATTERN).unwrap();
    let codec = LabelCodec::new(5, 8);
    let reader = TraceReader::raw();
    let load = |policy| load_folder(tmp.path(), "f", &pattern, &codec, &reader, policy).unwrap();

    let first = load(DuplicatePolicy::KeepFirst);
    assert_eq!(first.len(), 1);
    assert_eq!(first.traces.values().next().unwrap()[0].value, 1.0e-3);

    let last = load(DuplicatePolicy::KeepLast);
    assert_eq!(last.len(), 1);
    assert_eq!(last.traces.values().next().unwrap()[0].value, 2.0e-3);
}

/// Keeps the first `max_samples` samples of every trace.
struct Truncate;

impl Sampler for Truncate {
    fn sample(
        &self,
        raw: &FolderCorpus,
        _interval: usize,
        max_samples: usize,
        _mode: &str,
    ) -> trace_rebase::Result<FolderCorpus> {
        let mut out = FolderCorpus::new(raw.folder_name.clone());
        for (code, samples) in &raw.traces {
            let kept: Vec<Sample> = samples.iter().take(max_samples).copied().collect();
            out.traces.insert(code.clone(), kept);
        }
        Ok(out)
    }
}

#[test]
fn configured_sampler_runs_before_the_fit() {
    let tmp = corpus();
    let mut config = config(tmp.path());
    config.sampling = serde_json::from_value(json!({
        "interval": 1,
        "max_samples": 1,
        "mode": "head",
    }))
    .unwrap();

    let output = run_with_sampler(&config, &Truncate).unwrap();
    for corpus in output.train.iter().chain(&output.test) {
        assert!(corpus.traces.values().all(|s| s.len() == 1));
    }
    // Only 50 and 0.1 reach the fit once the second rows are dropped.
    let state = output.normalizer.state().unwrap();
    assert!((state.min + 1.0).abs() < 1e-12);
}

#[test]
fn stored_output_reloads_unchanged() {
    let tmp = corpus();
    let output = run(&config(tmp.path())).unwrap();

    let out_dir = tmp.path().join("dataset");
    let path = store::save_corpus(&out_dir, &output.train[0]).unwrap();
    assert_eq!(store::load_corpus(&path).unwrap(), output.train[0]);
}
