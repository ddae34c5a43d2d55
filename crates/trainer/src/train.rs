use log::{error, info, warn};
use std::marker::PhantomData;
use std::time::Instant;

use telemetry::PersistentStore;
use tensors::Batch;
use utils::Worker;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::dataset::{DatasetWindower, WindowShape, WindowedSets, Windowing};
use crate::error::{Result, TrainError};
use crate::metrics::{MetricsLog, MetricsRow};
use crate::model::{Forecaster, MetricsAccumulator, StepMetrics};
use crate::{RestorePolicy, TrainerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    /// Waiting for enough data.
    Idle,
    /// Windows built for the current cycle.
    Loaded,
    Training,
    /// The last epoch of a cycle has been saved.
    Checkpointed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped { rows: usize },
    Trained {
        epochs: usize,
        last_checkpoint: Option<Checkpoint>,
    },
}

/// Retrains a forecaster on the most recent slice of the store, once per
/// cycle, and keeps checkpoints and the metrics history up to date.
///
/// The model is rebuilt through `build_model` every cycle and then restored
/// from the latest checkpoint, so nothing model-related lives across cycles
/// except what is on disk.
pub struct Trainer<M, F> {
    config: TrainerConfig,
    store: PersistentStore,
    windower: DatasetWindower,
    checkpoints: CheckpointStore,
    metrics: MetricsLog,
    build_model: F,
    state: TrainerState,
    _model: PhantomData<fn() -> M>,
}

impl<M, F> Trainer<M, F>
where
    M: Forecaster,
    F: FnMut(&WindowShape) -> anyhow::Result<M>,
{
    pub fn new(config: TrainerConfig, store: PersistentStore, build_model: F) -> Result<Self> {
        config.validate()?;
        let checkpoints = CheckpointStore::open(&config.checkpoint_dir, config.max_to_keep)?;
        let metrics = MetricsLog::new(&config.metrics_path);

        Ok(Self {
            windower: DatasetWindower::new(&config),
            config,
            store,
            checkpoints,
            metrics,
            build_model,
            state: TrainerState::Idle,
            _model: PhantomData,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn metrics(&self) -> &MetricsLog {
        &self.metrics
    }

    /// Reload, restore, train `epochs` epochs. Returns `Skipped` without
    /// touching the model when the store does not hold enough rows yet.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let sets = match self.windower.load(&self.store)? {
            Windowing::Insufficient { rows } => {
                self.state = TrainerState::Idle;
                return Ok(CycleOutcome::Skipped { rows });
            }
            Windowing::Ready(sets) => sets,
        };
        self.state = TrainerState::Loaded;
        info!(
            "Loaded {} rows: {} train, {} validation, {} test batches",
            sets.rows,
            sets.train.len(),
            sets.validation.len(),
            sets.test.len()
        );

        let mut model = self.prepare_model(&sets.shape)?;
        let last_checkpoint = self.train(&mut model, &sets)?;

        Ok(CycleOutcome::Trained {
            epochs: self.config.epochs,
            last_checkpoint,
        })
    }

    fn prepare_model(&mut self, shape: &WindowShape) -> Result<M> {
        let mut model = (self.build_model)(shape)?;
        let Some(latest) = self.checkpoints.latest() else {
            info!("No checkpoint yet, training from scratch");
            return Ok(model);
        };

        match model.restore(&latest.path) {
            Ok(()) => {
                info!("Restored checkpoint version {}", latest.version);
                Ok(model)
            }
            Err(cause) => match self.config.restore_policy {
                RestorePolicy::Fail => Err(TrainError::Restore {
                    path: latest.path,
                    cause,
                }),
                RestorePolicy::Initial => {
                    error!(
                        "Cannot restore {}: {:#}; training from scratch",
                        latest.path.display(),
                        cause
                    );
                    // The failed restore may have left the model half-loaded.
                    Ok((self.build_model)(shape)?)
                }
            },
        }
    }

    fn train(&mut self, model: &mut M, sets: &WindowedSets) -> Result<Option<Checkpoint>> {
        self.state = TrainerState::Training;
        let mut last_checkpoint = None;

        for epoch in 0..self.config.epochs {
            let start = Instant::now();
            let train = run_pass(&sets.train, |b| model.train_step(b))?;
            let test = run_pass(&sets.test, |b| model.test_step(b))?;

            info!(
                "Epoch {}, Loss: {:.5}, RMSE {:.5}, Test Loss: {:.5}, Test RMSE {:.5}, {:.3} secs",
                epoch + 1,
                train.loss,
                train.rmse,
                test.loss,
                test.rmse,
                start.elapsed().as_secs_f64()
            );
            if !train.is_finite() || !test.is_finite() {
                warn!("Epoch {} produced non-finite metrics", epoch + 1);
            }

            self.metrics.record(MetricsRow {
                training_loss: train.loss,
                training_rmse: train.rmse,
                test_loss: test.loss,
                test_rmse: test.rmse,
            })?;

            let checkpoint = self.checkpoints.save(|path| model.save(path))?;
            info!("Saved checkpoint for epoch {} at {}", epoch + 1, checkpoint.path.display());
            last_checkpoint = Some(checkpoint);
        }

        self.state = TrainerState::Checkpointed;
        Ok(last_checkpoint)
    }
}

fn run_pass<S>(batches: &[Batch], mut step: S) -> Result<StepMetrics>
where
    S: FnMut(&Batch) -> anyhow::Result<StepMetrics>,
{
    let mut acc = MetricsAccumulator::default();
    for batch in batches {
        acc.add(step(batch)?, batch.len());
    }
    Ok(acc.mean())
}

impl<M, F> Worker for Trainer<M, F>
where
    M: Forecaster + 'static,
    F: FnMut(&WindowShape) -> anyhow::Result<M> + Send + 'static,
{
    type Error = TrainError;

    fn name(&self) -> &str {
        "Trainer"
    }

    fn work(&mut self) -> Result<()> {
        self.run_cycle().map(|_| ())
    }
}
