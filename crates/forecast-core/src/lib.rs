pub mod config;
pub mod forecaster;
pub mod layer_norm;
pub mod safetensors_util;

pub use config::ModelConfig;
pub use forecaster::{builder, SequenceForecaster};
