//! Feature-axis concatenation of the recurrent stage inputs.
//!
//! Stage 1 is `[external, action_reward]`. Stage 2 is
//! `[lstm_1, external, action_reward]` followed by `internal` when that modality
//! exists. The order fixes the weight layout of the layer that consumes it.

use ndarray::{concatenate, Array3, ArrayView3, Axis};
use serde::{Serialize, Deserialize};

use crate::error::{PolicyError, Result};

/// Concatenate named `[batch, time, feature_i]` tensors along the feature axis.
pub fn concat_features(inputs: &[(&str, ArrayView3<f32>)]) -> Result<Array3<f32>> {
    let Some((first_name, first)) = inputs.first() else {
        return Err(PolicyError::MissingInput("nothing to concatenate".to_string()));
    };
    let (batch, time, _) = first.dim();
    for (name, x) in &inputs[1..] {
        let (b, t, _) = x.dim();
        if (b, t) != (batch, time) {
            return Err(PolicyError::shape_contract(
                format!("concatenating '{}' with '{}'", name, first_name),
                format!("expected [{}, {}, *], got {:?}", batch, time, x.shape()),
            ));
        }
    }
    let views: Vec<ArrayView3<f32>> = inputs.iter().map(|(_, x)| x.view()).collect();
    Ok(concatenate(Axis(2), &views)?)
}

/// Feature widths of every stage input, fixed when the network is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLayout {
    pub external: usize,
    pub action_reward: usize,
    pub internal: Option<usize>,
    pub lstm_1_units: usize,
}

impl StageLayout {
    pub fn stage_1_width(&self) -> usize {
        self.external + self.action_reward
    }

    pub fn stage_2_width(&self) -> usize {
        self.lstm_1_units + self.external + self.action_reward + self.internal.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn concatenates_in_order() {
        let a = Array3::from_elem((2, 3, 1), 1.0);
        let b = Array3::from_elem((2, 3, 2), 2.0);
        let out = concat_features(&[("a", a.view()), ("b", b.view())]).unwrap();
        assert_eq!(out.dim(), (2, 3, 3));
        assert_eq!(out[[1, 2, 0]], 1.0);
        assert_eq!(out[[1, 2, 2]], 2.0);
    }

    #[test]
    fn misaligned_time_names_the_input() {
        let a = Array3::<f32>::zeros((2, 3, 1));
        let b = Array3::<f32>::zeros((2, 4, 1));
        let err = concat_features(&[("external", a.view()), ("internal", b.view())]).unwrap_err();
        assert!(err.to_string().contains("internal"));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(concat_features(&[]).is_err());
    }

    #[test]
    fn stage_widths() {
        let layout = StageLayout { external: 320, action_reward: 5, internal: None, lstm_1_units: 8 };
        assert_eq!(layout.stage_1_width(), 325);
        assert_eq!(layout.stage_2_width(), 333);
        let with_internal = StageLayout { internal: Some(7), ..layout };
        assert_eq!(with_internal.stage_2_width(), 340);
    }
}
