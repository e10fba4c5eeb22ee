use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::error::{PolicyError, Result};
use crate::params::{scoped, Parameterized, VariableKind};
use super::initialization::WeightInit;

/// A fully connected (dense) layer
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DenseLayer {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
}

impl DenseLayer {
    /// Create a new dense layer with the given input size, output size, activation and initializer.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        init: WeightInit,
        rng: &mut R,
    ) -> Self {
        DenseLayer {
            weights: init.matrix((input_size, output_size), rng),
            biases: WeightInit::biases(output_size),
            activation,
        }
    }

    pub fn with_weights(mut self, weights: Array2<f32>) -> Result<Self> {
        if weights.dim() != self.weights.dim() {
            return Err(PolicyError::dimension_mismatch(
                format!("{:?}", self.weights.dim()),
                format!("{:?}", weights.dim()),
            ));
        }
        self.weights = weights;
        Ok(self)
    }

    pub fn with_biases(mut self, biases: Array1<f32>) -> Result<Self> {
        if biases.dim() != self.biases.dim() {
            return Err(PolicyError::dimension_mismatch(
                format!("{:?}", self.biases.dim()),
                format!("{:?}", biases.dim()),
            ));
        }
        self.biases = biases;
        Ok(self)
    }

    /// Forward pass for a `[batch, input_size]` matrix.
    pub fn forward(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        if inputs.ncols() != self.input_size() {
            return Err(PolicyError::dimension_mismatch(
                format!("[*, {}]", self.input_size()),
                format!("{:?}", inputs.shape()),
            ));
        }
        let outputs = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        Ok(self.activation.applied(outputs))
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }
}

impl Parameterized for DenseLayer {
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>)) {
        f(scoped(scope, "weights"), VariableKind::Trainable, self.weights.view().into_dyn());
        f(scoped(scope, "biases"), VariableKind::Trainable, self.biases.view().into_dyn());
    }

    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>)) {
        f(scoped(scope, "weights"), VariableKind::Trainable, self.weights.view_mut().into_dyn());
        f(scoped(scope, "biases"), VariableKind::Trainable, self.biases.view_mut().into_dyn());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn forward_applies_affine_map() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = DenseLayer::new(2, 2, Activation::Linear, WeightInit::Zeros, &mut rng)
            .with_weights(array![[1.0, 2.0], [3.0, 4.0]])
            .unwrap()
            .with_biases(array![0.5, -0.5])
            .unwrap();
        let out = layer.forward(array![[1.0, 1.0]].view()).unwrap();
        assert_eq!(out, array![[4.5, 5.5]]);
    }

    #[test]
    fn rejects_wrong_input_width() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = DenseLayer::new(3, 2, Activation::Relu, WeightInit::XavierUniform, &mut rng);
        let err = layer.forward(Array2::zeros((4, 5)).view()).unwrap_err();
        assert!(matches!(err, PolicyError::DimensionMismatch { .. }));
    }

    #[test]
    fn reports_weights_and_biases() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = DenseLayer::new(3, 2, Activation::Relu, WeightInit::XavierUniform, &mut rng);
        let vars = layer.variables("head");
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].name, "head/weights");
        assert_eq!(vars[0].shape, vec![3, 2]);
        assert_eq!(vars[1].shape, vec![2]);
    }
}
