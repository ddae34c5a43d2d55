use anyhow::{ensure, Result};
use log::debug;
use std::path::Path;
use tch::nn::{self, Module, OptimizerConfig, RNN};
use tch::{Device, Reduction, Tensor};

use tensors::{Batch, Tensor3};
use trainer::{Forecaster, StepMetrics, WindowShape};

use crate::config::ModelConfig;
use crate::layer_norm::RMSNorm;
use crate::safetensors_util::{load_safetensors, save_safetensors};

/// LSTM over the input window, RMSNorm, then a per-step linear head on the
/// last `label_width` steps.
///
/// The input sequence is extended with `shift` zero steps so that step `t` of
/// the output lines up with row `t` of the window; labels may then reach past
/// the inputs by up to `shift` rows.
pub struct SequenceForecaster {
    vs: nn::VarStore,
    lstm: nn::LSTM,
    norm: RMSNorm,
    head: nn::Linear,
    optimizer: nn::Optimizer,
    shape: WindowShape,
    dropout: f64,
}

impl SequenceForecaster {
    pub fn new(shape: &WindowShape, config: &ModelConfig) -> Result<Self> {
        ensure!(
            shape.label_width <= shape.total_width(),
            "label_width {} exceeds input_width + shift = {}",
            shape.label_width,
            shape.total_width()
        );
        ensure!(
            shape.input_columns > 0 && shape.label_columns > 0,
            "window needs input and label columns, got {shape:?}"
        );

        let device = if config.use_cuda { Device::cuda_if_available() } else { Device::Cpu };
        let vs = nn::VarStore::new(device);
        let (lstm, norm, head) = {
            let root = vs.root();
            let rnn = nn::RNNConfig {
                num_layers: config.num_layers,
                batch_first: true,
                ..Default::default()
            };
            let hidden = config.hidden_size;
            let lstm = nn::lstm(&root / "lstm", shape.input_columns as i64, hidden, rnn);
            let norm = RMSNorm::new(&(&root / "norm"), hidden, config.layer_norm_epsilon);
            let head = nn::linear(
                &root / "head",
                hidden,
                shape.label_columns as i64,
                Default::default(),
            );
            (lstm, norm, head)
        };
        let optimizer = nn::AdamW::default().build(&vs, config.learning_rate)?;
        debug!("Built LSTM forecaster on {:?} for {:?}", device, shape);

        Ok(Self {
            vs,
            lstm,
            norm,
            head,
            optimizer,
            shape: *shape,
            dropout: config.dropout,
        })
    }

    /// inputs: [batch, input_width, input_columns]
    /// returns: [batch, label_width, label_columns]
    pub fn forward_t(&self, inputs: &Tensor, train: bool) -> Tensor {
        let (out, _) = if self.shape.shift > 0 {
            let size = inputs.size();
            let padding = Tensor::zeros(
                [size[0], self.shape.shift as i64, size[2]],
                (inputs.kind(), inputs.device()),
            );
            self.lstm.seq(&Tensor::cat(&[inputs, &padding], 1))
        } else {
            self.lstm.seq(inputs)
        };
        let steps = self.shape.label_width as i64;
        let start = self.shape.total_width() as i64 - steps;
        let out = out.narrow(1, start, steps).dropout(self.dropout, train);
        self.head.forward(&self.norm.forward(&out))
    }

    fn to_tensor(&self, t: &Tensor3) -> Tensor {
        let [a, b, c] = t.dims();
        Tensor::from_slice(t.as_slice())
            .view([a as i64, b as i64, c as i64])
            .to_device(self.vs.device())
    }

    fn step(&mut self, batch: &Batch, train: bool) -> Result<StepMetrics> {
        let [_, width, columns] = batch.inputs.dims();
        ensure!(
            width == self.shape.input_width && columns == self.shape.input_columns,
            "batch inputs {:?} do not fit {:?}",
            batch.inputs.dims(),
            self.shape
        );

        let inputs = self.to_tensor(&batch.inputs);
        let labels = self.to_tensor(&batch.labels);
        let loss = if train {
            let loss = self.forward_t(&inputs, true).mse_loss(&labels, Reduction::Mean);
            self.optimizer.backward_step(&loss);
            loss
        } else {
            tch::no_grad(|| self.forward_t(&inputs, false).mse_loss(&labels, Reduction::Mean))
        };

        let loss = loss.double_value(&[]);
        Ok(StepMetrics {
            loss,
            rmse: loss.sqrt(),
        })
    }
}

impl Forecaster for SequenceForecaster {
    fn train_step(&mut self, batch: &Batch) -> Result<StepMetrics> {
        self.step(batch, true)
    }

    fn test_step(&mut self, batch: &Batch) -> Result<StepMetrics> {
        self.step(batch, false)
    }

    fn save(&self, path: &Path) -> Result<()> {
        save_safetensors(&self.vs, path)
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        load_safetensors(&mut self.vs, path)
    }
}

/// Model factory for [`trainer::Trainer`].
pub fn builder(
    config: ModelConfig,
) -> impl FnMut(&WindowShape) -> Result<SequenceForecaster> + Send + 'static {
    move |shape: &WindowShape| SequenceForecaster::new(shape, &config)
}
