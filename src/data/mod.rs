/// Data layer: trace parsing, labels, normalization, and datasets.
///
/// Architecture:
/// ```text
///  <root>/<folder>/lin_s*_<g1>_..._<gN>.txt
///        │
///        ▼
///   ┌──────────┐
///   │ exponent  │  scan every value → reference exponent r
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐   ┌─────────┐
///   │  loader   │──▶│ literal  │  rebase each value onto 10^r
///   └──────────┘   └─────────┘
///        │  FolderCorpus (code → samples)        label: file name → code
///        ▼
///   ┌────────────┐
///   │ normalizer  │  fit log10 range over train+test, map to [0, 1]
///   └────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ dataset   │  cached (trace, code) pairs + one view per (converter, bit)
///   └──────────┘
/// ```

pub mod dataset;
pub mod exponent;
pub mod label;
pub mod literal;
pub mod loader;
pub mod model;
pub mod normalizer;
pub mod sampling;
pub mod store;
