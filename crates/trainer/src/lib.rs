pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod metrics;
pub mod model;
pub mod train;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use dataset::{DatasetWindower, WindowShape, WindowedSets, Windowing};
pub use error::TrainError;
pub use metrics::{MetricsLog, MetricsRow};
pub use model::{Forecaster, StepMetrics};
pub use train::{CycleOutcome, Trainer, TrainerState};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What to do when the latest checkpoint cannot be restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestorePolicy {
    /// Fail the cycle; the trainer loop stops with `TrainError::Restore`.
    #[default]
    Fail,
    /// Log the failure and train from a freshly built model.
    Initial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Number of most recent store rows used per cycle.
    pub data_size: usize,
    pub epochs: usize,
    pub input_width: usize,
    pub label_width: usize,
    pub shift: usize,
    pub batch_size: usize,
    /// Train / validation / test ratios, in temporal order.
    pub partition: [f64; 3],
    pub wait_time_ms: u64,
    pub checkpoint_dir: PathBuf,
    pub max_to_keep: usize,
    pub metrics_path: PathBuf,
    pub restore_policy: RestorePolicy,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            data_size: 10_000,
            epochs: 5,
            input_width: 64,
            label_width: 64,
            shift: 0,
            batch_size: 64,
            partition: [0.8, 0.1, 0.1],
            wait_time_ms: 10,
            checkpoint_dir: PathBuf::from("./checkpoints"),
            max_to_keep: 100,
            metrics_path: PathBuf::from("./data/training_history.csv"),
            restore_policy: RestorePolicy::Fail,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> error::Result<()> {
        let fail = |msg: String| Err(TrainError::Config(msg));

        for (name, value) in [
            ("data_size", self.data_size),
            ("epochs", self.epochs),
            ("input_width", self.input_width),
            ("label_width", self.label_width),
            ("batch_size", self.batch_size),
            ("max_to_keep", self.max_to_keep),
        ] {
            if value == 0 {
                return fail(format!("{name} must be positive"));
            }
        }
        if self.label_width > self.input_width + self.shift {
            return fail(format!(
                "label_width {} exceeds input_width + shift = {}",
                self.label_width,
                self.input_width + self.shift
            ));
        }
        if self.partition.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return fail(format!("partition ratios must be positive, got {:?}", self.partition));
        }
        let total: f64 = self.partition.iter().sum();
        if total > 1.0 + 1e-9 {
            return fail(format!("partition ratios sum to {total}, more than 1"));
        }
        if self.data_size as f64 <= self.min_rows() {
            return fail(format!(
                "data_size {} can never exceed the {:.1} rows needed to fill every split",
                self.data_size,
                self.min_rows()
            ));
        }
        Ok(())
    }

    /// Rows must strictly exceed this before any window set is built.
    pub fn min_rows(&self) -> f64 {
        let smallest = self.partition.iter().copied().fold(f64::INFINITY, f64::min);
        (self.input_width + self.shift + self.batch_size) as f64 / smallest
    }
}
