pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{Result, TraceError};
pub use pipeline::{run, run_with_sampler, PipelineOutput};
