pub mod config;
pub mod udp;

pub use config::{IngestConfig, PipelineConfig};
