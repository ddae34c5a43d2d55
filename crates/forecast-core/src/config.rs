use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of the LSTM state.
    pub hidden_size: i64,
    /// Number of stacked LSTM layers.
    pub num_layers: i64,
    /// Dropout probability on the recurrent output, training only.
    pub dropout: f64,
    /// RMSNorm epsilon value (for numerical stability).
    pub layer_norm_epsilon: f64,
    pub learning_rate: f64,
    /// Place the model on CUDA when a device is available.
    pub use_cuda: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            num_layers: 1,
            dropout: 0.0,
            layer_norm_epsilon: 1e-5,
            learning_rate: 1e-3,
            use_cuda: true,
        }
    }
}
