use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store header {found:?} does not match expected columns {expected:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("corrupt store row at line {line}: {reason}")]
    CorruptRow { line: u64, reason: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("record queue is closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
