use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use trace_rebase::PipelineConfig;

const CONVERTERS: usize = 5;
const BITWIDTH: u32 = 8;
const ROWS: usize = 400;
const TIME_STEP: f64 = 2.5e-11;

/// Train folders first, then test.
const FOLDERS: [(&str, usize); 3] = [
    ("analog_5px_tt_px", 24),
    ("analog_5px_tt_pm", 24),
    ("analog_5px_tt_x", 12),
];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// `±D.DDDDDDDDe±DD`, the simulator's fixed-width value format.
fn format_sci(v: f64) -> String {
    let text = format!("{v:.8e}");
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.abs())
}

/// Supply current of one conversion: a switching burst whose size follows
/// the number of set bits, on top of a leakage floor.
fn synth_trace(codes: &[u64], rng: &mut SimpleRng) -> String {
    let ones: u32 = codes.iter().map(|c| c.count_ones()).sum();
    let burst = 1.0e-3 * (1.0 + f64::from(ones) / 8.0);

    let mut out = String::from("time  -i(vdd)\n");
    for i in 0..ROWS {
        let t = i as f64 * TIME_STEP;
        let phase = i as f64 / ROWS as f64;
        let envelope = (-((phase - 0.3) / 0.05).powi(2)).exp();
        let leakage = 5.0e-7 * (1.0 + rng.gauss(0.0, 0.05));
        // Recharge undershoot after the burst goes slightly negative.
        let undershoot = -2.0e-4 * (-((phase - 0.45) / 0.03).powi(2)).exp();
        let value = burst * envelope + leakage + undershoot + rng.gauss(0.0, 2.0e-6);
        let _ = writeln!(out, "{}  {}", format_sci(t), format_sci(value));
    }
    out
}

fn main() -> Result<()> {
    env_logger::init();

    let mut rng = SimpleRng::new(42);
    let root = Path::new("sample_traces");
    let scale = f64::from(1u32 << BITWIDTH);
    let mut total = 0;

    for (folder, count) in FOLDERS {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        for n in 0..count {
            let codes: Vec<u64> = (0..CONVERTERS).map(|_| rng.next_u64() >> (64 - BITWIDTH)).collect();
            // Normalized groups: code / 2^bitwidth is exact in binary, so it decodes back losslessly.
            let groups: Vec<String> = codes.iter().map(|&c| format!("{}", c as f64 / scale)).collect();
            let name = format!("lin_s{n}_{}.txt", groups.join("_"));

            let path = dir.join(&name);
            fs::write(&path, synth_trace(&codes, &mut rng))
                .with_context(|| format!("writing {}", path.display()))?;
            total += 1;
        }
        log::info!("Wrote {count} traces to {}", dir.display());
    }

    let group = r"([0-9]+(?:\.[0-9]+)?)";
    let config: PipelineConfig = serde_json::from_value(json!({
        "trace_root": root,
        "train_folders": [FOLDERS[0].0, FOLDERS[1].0],
        "test_folders": [FOLDERS[2].0],
        "file_pattern": format!(r"^lin_s\d+_{}\.txt$", vec![group; CONVERTERS].join("_")),
        "normalized_digital": true,
        "output": {
            "dataset_dir": root.join("dataset"),
            "normalizer_path": root.join("normalizer.json"),
            "exponent_report": root.join("exponents.csv"),
        },
    }))
    .context("building sample config")?;
    config.validate().context("validating sample config")?;

    let config_path = root.join("pipeline.json");
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("writing {}", config_path.display()))?;

    println!(
        "Wrote {total} traces ({ROWS} rows each) under {}; run with {}",
        root.display(),
        config_path.display()
    );
    Ok(())
}
