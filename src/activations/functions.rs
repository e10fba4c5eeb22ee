use ndarray::{Array, Array1, ArrayView1, Dimension};
use serde::{Serialize, Deserialize};

/// Element-wise non-linearities used by the encoder, the heads and the recurrent cells.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Elu,
    Relu,
    Linear,
    Sigmoid,
    Tanh,
}

impl Activation {
    /// Apply the activation function in-place, whatever the tensor rank.
    pub fn apply<D: Dimension>(&self, input: &mut Array<f32, D>) {
        match self {
            Activation::Elu => input.mapv_inplace(elu),
            Activation::Relu => input.mapv_inplace(|v| v.max(0.0)),
            Activation::Linear => {}
            Activation::Sigmoid => input.mapv_inplace(sigmoid),
            Activation::Tanh => input.mapv_inplace(f32::tanh),
        }
    }

    /// Consuming variant of [`Activation::apply`].
    pub fn applied<D: Dimension>(&self, mut input: Array<f32, D>) -> Array<f32, D> {
        self.apply(&mut input);
        input
    }
}

#[inline]
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

#[inline]
fn elu(v: f32) -> f32 {
    if v > 0.0 { v } else { v.exp() - 1.0 }
}

/// Numerically stable softmax over a single row of logits.
pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}
