use std::path::PathBuf;

use telemetry::TelemetryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("invalid trainer configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot restore checkpoint {}: {cause:#}", .path.display())]
    Restore { path: PathBuf, cause: anyhow::Error },

    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TrainError>;
