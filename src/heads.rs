//! Actor-critic head.
//!
//! Two linear maps over the flattened recurrent output: policy logits and a
//! scalar value. Actions are sampled from the softmax of the logits.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::activations::{softmax, Activation};
use crate::error::{PolicyError, Result};
use crate::layers::{DenseLayer, WeightInit};
use crate::params::{scoped, Parameterized, VariableKind};

const LOGITS_INIT_STD: f32 = 0.01;
const VALUE_INIT_STD: f32 = 1.0;

#[derive(Clone, Debug)]
pub struct HeadOutput {
    /// `[M, A]`
    pub logits: Array2<f32>,
    /// `[M]`
    pub value: Array1<f32>,
    /// `[M]` action indices
    pub sample: Array1<usize>,
}

/// Action indices as one-hot rows `[M, num_actions]`.
pub fn one_hot(actions: ArrayView1<usize>, num_actions: usize) -> Result<Array2<f32>> {
    let mut out = Array2::zeros((actions.len(), num_actions));
    for (mut row, &action) in out.outer_iter_mut().zip(actions.iter()) {
        let Some(slot) = row.get_mut(action) else {
            return Err(PolicyError::invalid_parameter(
                "action".to_string(),
                format!("{} is outside an action space of {}", action, num_actions),
            ));
        };
        *slot = 1.0;
    }
    Ok(out)
}

#[derive(Clone, Debug)]
pub struct ActorCriticHead {
    logits: DenseLayer,
    value: DenseLayer,
}

impl ActorCriticHead {
    pub fn new<R: Rng + ?Sized>(input_size: usize, num_actions: usize, rng: &mut R) -> Result<Self> {
        if num_actions == 0 {
            return Err(PolicyError::invalid_parameter(
                "ac_space".to_string(),
                "at least one action is required".to_string(),
            ));
        }
        Ok(ActorCriticHead {
            logits: DenseLayer::new(
                input_size,
                num_actions,
                Activation::Linear,
                WeightInit::NormalizedColumns { std: LOGITS_INIT_STD },
                rng,
            ),
            value: DenseLayer::new(
                input_size,
                1,
                Activation::Linear,
                WeightInit::NormalizedColumns { std: VALUE_INIT_STD },
                rng,
            ),
        })
    }

    pub fn num_actions(&self) -> usize {
        self.logits.output_size()
    }

    pub fn input_size(&self) -> usize {
        self.logits.input_size()
    }

    /// `[M, features]` to logits, value and one sampled action per row.
    pub fn forward<R: Rng + ?Sized>(&self, features: ArrayView2<f32>, rng: &mut R) -> Result<HeadOutput> {
        let logits = self.logits.forward(features)?;
        let value = self.value.forward(features)?.index_axis_move(Axis(1), 0);
        let sample = sample_actions(logits.view(), rng)?;
        Ok(HeadOutput { logits, value, sample })
    }
}

/// Draw one action per row from `softmax(logits)`.
pub fn sample_actions<R: Rng + ?Sized>(logits: ArrayView2<f32>, rng: &mut R) -> Result<Array1<usize>> {
    let mut sample = Array1::zeros(logits.nrows());
    for (slot, row) in sample.iter_mut().zip(logits.outer_iter()) {
        let probs = softmax(row);
        let dist = WeightedIndex::new(probs.iter().copied())
            .map_err(|err| PolicyError::NumericalError(format!("cannot sample from logits {}: {}", row, err)))?;
        *slot = dist.sample(rng);
    }
    Ok(sample)
}

impl Parameterized for ActorCriticHead {
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>)) {
        self.logits.visit(&scoped(scope, "logits"), f);
        self.value.visit(&scoped(scope, "value"), f);
    }

    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>)) {
        self.logits.visit_mut(&scoped(scope, "logits"), f);
        self.value.visit_mut(&scoped(scope, "value"), f);
    }
}
