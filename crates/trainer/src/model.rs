use std::path::Path;

use tensors::Batch;

/// Loss and root-mean-squared error of one step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepMetrics {
    pub loss: f64,
    pub rmse: f64,
}

impl StepMetrics {
    pub fn is_finite(&self) -> bool {
        self.loss.is_finite() && self.rmse.is_finite()
    }
}

/// A trainable sequence model, as seen by the trainer loop.
///
/// Backends own their weights and optimizer state. Checkpoints are addressed
/// by path; what goes into the file is up to the backend.
pub trait Forecaster {
    /// One weight update on `batch`.
    fn train_step(&mut self, batch: &Batch) -> anyhow::Result<StepMetrics>;

    /// Evaluates `batch` without touching the weights.
    fn test_step(&mut self, batch: &Batch) -> anyhow::Result<StepMetrics>;

    fn save(&self, path: &Path) -> anyhow::Result<()>;

    fn restore(&mut self, path: &Path) -> anyhow::Result<()>;
}

/// Example-weighted mean of step metrics over one pass.
///
/// RMSE is recombined through the mean squared error so a ragged last batch
/// counts for exactly its share.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsAccumulator {
    loss: f64,
    squared_error: f64,
    examples: usize,
}

impl MetricsAccumulator {
    pub fn add(&mut self, step: StepMetrics, examples: usize) {
        let w = examples as f64;
        self.loss += step.loss * w;
        self.squared_error += step.rmse * step.rmse * w;
        self.examples += examples;
    }

    pub fn mean(&self) -> StepMetrics {
        if self.examples == 0 {
            return StepMetrics::default();
        }
        let n = self.examples as f64;
        StepMetrics {
            loss: self.loss / n,
            rmse: (self.squared_error / n).sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_by_batch_size() {
        let mut acc = MetricsAccumulator::default();
        let unit = StepMetrics {
            loss: 1.0,
            rmse: 1.0,
        };
        let large = StepMetrics {
            loss: 4.0,
            rmse: 2.0,
        };
        acc.add(unit, 3);
        acc.add(large, 1);
        let m = acc.mean();
        assert!((m.loss - 1.75).abs() < 1e-12);
        assert!((m.rmse - (7.0f64 / 4.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_pass_is_zero() {
        assert_eq!(MetricsAccumulator::default().mean(), StepMetrics::default());
    }
}
