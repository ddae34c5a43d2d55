use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const HEADER: [&str; 4] = ["training_loss", "training_rmse", "test_loss", "test_rmse"];

/// Aggregate metrics of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub training_loss: f64,
    pub training_rmse: f64,
    pub test_loss: f64,
    pub test_rmse: f64,
}

impl MetricsRow {
    fn fields(&self) -> [String; 4] {
        [
            self.training_loss,
            self.training_rmse,
            self.test_loss,
            self.test_rmse,
        ]
        .map(|v| format!("{v:.6}"))
    }
}

/// Per-epoch history of this process, mirrored to a CSV file.
///
/// The history starts empty on every start; the file is replaced with the full
/// in-memory history after each epoch rather than appended to.
pub struct MetricsLog {
    path: PathBuf,
    history: Vec<MetricsRow>,
}

impl MetricsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            history: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn history(&self) -> &[MetricsRow] {
        &self.history
    }

    pub fn record(&mut self, row: MetricsRow) -> Result<()> {
        self.history.push(row);
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.path.with_extension("csv.tmp");
        let mut writer = csv::Writer::from_path(&tmp)?;
        writer.write_record(HEADER)?;
        for row in &self.history {
            writer.write_record(row.fields())?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &self.path)?;

        debug!("Wrote {} metrics rows to {}", self.history.len(), self.path.display());
        Ok(())
    }
}
