use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use serde::{Serialize, Deserialize};

use crate::error::{PolicyError, Result};
use crate::params::{scoped, Parameterized, VariableKind};

/// Batch renormalization statistics and correction bounds.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Renorm {
    pub renorm_mean: Array1<f32>,
    pub renorm_stddev: Array1<f32>,
    /// `r` is clipped to `[1 / rmax, rmax]`
    pub rmax: f32,
    /// `d` is clipped to `[-dmax, dmax]`
    pub dmax: f32,
}

/// Batch Normalization Layer
///
/// Normalizes the last axis of its input. In the training phase the batch
/// statistics are used and returned as a [`BatchNormUpdate`]; the moving
/// statistics only change when that update is applied. Outside the training
/// phase the moving statistics are used and every row is processed independently.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BatchNormLayer {
    /// Scale parameter (gamma)
    pub gamma: Array1<f32>,

    /// Shift parameter (beta)
    pub beta: Array1<f32>,

    pub moving_mean: Array1<f32>,
    pub moving_variance: Array1<f32>,

    /// Weight kept by the old value when a moving statistic is updated
    pub momentum: f32,

    /// Small constant for numerical stability
    pub epsilon: f32,

    pub renorm: Option<Renorm>,
}

/// Batch statistics collected during a training-phase forward pass.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchNormUpdate {
    pub mean: Array1<f32>,
    pub variance: Array1<f32>,
}

impl BatchNormLayer {
    /// Create a new batch normalization layer
    pub fn new(num_features: usize, momentum: f32, epsilon: f32) -> Self {
        BatchNormLayer {
            gamma: Array1::ones(num_features),
            beta: Array1::zeros(num_features),
            moving_mean: Array1::zeros(num_features),
            moving_variance: Array1::ones(num_features),
            momentum,
            epsilon,
            renorm: None,
        }
    }

    /// Enable batch renormalization with the given clipping bounds.
    pub fn with_renorm(mut self, rmax: f32, dmax: f32) -> Self {
        let n = self.num_features();
        self.renorm = Some(Renorm {
            renorm_mean: Array1::zeros(n),
            renorm_stddev: Array1::ones(n),
            rmax,
            dmax,
        });
        self
    }

    pub fn num_features(&self) -> usize {
        self.gamma.len()
    }

    /// Normalize a `[rows, features]` matrix.
    pub fn forward(&self, inputs: ArrayView2<f32>, training: bool) -> Result<(Array2<f32>, Option<BatchNormUpdate>)> {
        if inputs.ncols() != self.num_features() {
            return Err(PolicyError::dimension_mismatch(
                format!("[*, {}]", self.num_features()),
                format!("{:?}", inputs.shape()),
            ));
        }

        if !training || inputs.nrows() == 0 {
            let std = self.moving_variance.mapv(|v| (v + self.epsilon).sqrt());
            let normalized = (&inputs - &self.moving_mean.view().insert_axis(Axis(0)))
                / &std.insert_axis(Axis(0));
            return Ok((self.scale_shift(normalized), None));
        }

        let rows = inputs.nrows() as f32;
        let mean = inputs.sum_axis(Axis(0)) / rows;
        let centered = &inputs - &mean.view().insert_axis(Axis(0));
        let variance = centered.mapv(|v| v * v).sum_axis(Axis(0)) / rows;
        let std = variance.mapv(|v| (v + self.epsilon).sqrt());

        let mut normalized = centered / &std.view().insert_axis(Axis(0));
        if let Some(renorm) = &self.renorm {
            if !(renorm.rmax >= 1.0 && renorm.dmax >= 0.0) {
                return Err(PolicyError::invalid_parameter(
                    "renorm".to_string(),
                    format!("rmax {} must be >= 1 and dmax {} >= 0", renorm.rmax, renorm.dmax),
                ));
            }
            let r = (&std / &renorm.renorm_stddev).mapv(|v| v.clamp(1.0 / renorm.rmax, renorm.rmax));
            let d = ((&mean - &renorm.renorm_mean) / &renorm.renorm_stddev)
                .mapv(|v| v.clamp(-renorm.dmax, renorm.dmax));
            normalized = normalized * &r.insert_axis(Axis(0)) + &d.insert_axis(Axis(0));
        }

        Ok((self.scale_shift(normalized), Some(BatchNormUpdate { mean, variance })))
    }

    fn scale_shift(&self, normalized: Array2<f32>) -> Array2<f32> {
        normalized * &self.gamma.view().insert_axis(Axis(0)) + &self.beta.view().insert_axis(Axis(0))
    }

    /// Fold batch statistics into the moving averages.
    pub fn apply_update(&mut self, update: &BatchNormUpdate) -> Result<()> {
        if update.mean.len() != self.num_features() || update.variance.len() != self.num_features() {
            return Err(PolicyError::dimension_mismatch(
                format!("[{}]", self.num_features()),
                format!("[{}]", update.mean.len()),
            ));
        }
        let m = self.momentum;
        let eps = self.epsilon;
        self.moving_mean = &self.moving_mean * m + &update.mean * (1.0 - m);
        self.moving_variance = &self.moving_variance * m + &update.variance * (1.0 - m);
        if let Some(renorm) = self.renorm.as_mut() {
            let batch_std = update.variance.mapv(|v| (v + eps).sqrt());
            renorm.renorm_mean = &renorm.renorm_mean * m + &update.mean * (1.0 - m);
            renorm.renorm_stddev = &renorm.renorm_stddev * m + &batch_std * (1.0 - m);
        }
        Ok(())
    }
}

impl Parameterized for BatchNormLayer {
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>)) {
        f(scoped(scope, "gamma"), VariableKind::Trainable, self.gamma.view().into_dyn());
        f(scoped(scope, "beta"), VariableKind::Trainable, self.beta.view().into_dyn());
        f(scoped(scope, "moving_mean"), VariableKind::MovingAverage, self.moving_mean.view().into_dyn());
        f(scoped(scope, "moving_variance"), VariableKind::MovingAverage, self.moving_variance.view().into_dyn());
        if let Some(renorm) = &self.renorm {
            f(scoped(scope, "renorm_mean"), VariableKind::Renorm, renorm.renorm_mean.view().into_dyn());
            f(scoped(scope, "renorm_stddev"), VariableKind::Renorm, renorm.renorm_stddev.view().into_dyn());
        }
    }

    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>)) {
        f(scoped(scope, "gamma"), VariableKind::Trainable, self.gamma.view_mut().into_dyn());
        f(scoped(scope, "beta"), VariableKind::Trainable, self.beta.view_mut().into_dyn());
        f(scoped(scope, "moving_mean"), VariableKind::MovingAverage, self.moving_mean.view_mut().into_dyn());
        f(scoped(scope, "moving_variance"), VariableKind::MovingAverage, self.moving_variance.view_mut().into_dyn());
        if let Some(renorm) = self.renorm.as_mut() {
            f(scoped(scope, "renorm_mean"), VariableKind::Renorm, renorm.renorm_mean.view_mut().into_dyn());
            f(scoped(scope, "renorm_stddev"), VariableKind::Renorm, renorm.renorm_stddev.view_mut().into_dyn());
        }
    }
}
