use tch::{nn, Kind, Tensor};

#[derive(Debug)]
pub struct RMSNorm {
    weight: Tensor,
    eps: f64,
}

impl RMSNorm {
    pub fn new(vs: &nn::Path, dim: i64, eps: f64) -> Self {
        let weight = vs.var("weight", &[dim], nn::Init::Const(1.0));
        Self { weight, eps }
    }

    /// x: [batch, seq_len, dim]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        let norm = x.pow_tensor_scalar(2.0).mean_dim(Some(&[-1][..]), true, Kind::Float) + self.eps;
        x * norm.rsqrt() * &self.weight
    }
}
