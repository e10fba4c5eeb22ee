//! Batch/time reshaping between the encoder layout `[batch * time, features...]`
//! and the recurrent layout `[batch, time, features]`.
//!
//! The encoder never sees time, the recurrent layers need it. The time length
//! is never supplied directly: it is derived from the leading dimension of the
//! encoded tensor and the caller's batch size, through [`time_length`].

use ndarray::{Array2, Array3, ArrayView3, ArrayViewD};
use serde::{Serialize, Deserialize};

use crate::error::{PolicyError, Result};

/// How a flattened leading dimension decomposes into `[batch, time]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchShapeContext {
    pub batch_size: usize,
    pub time_length: usize,
}

impl BatchShapeContext {
    /// Derive the context for `leading` rows split into `batch_size` sequences.
    pub fn derive(leading: usize, batch_size: usize) -> Result<Self> {
        Ok(BatchShapeContext {
            batch_size,
            time_length: time_length(leading, batch_size)?,
        })
    }

    /// Flattened leading dimension, `batch_size * time_length`.
    pub fn rows(&self) -> usize {
        self.batch_size * self.time_length
    }
}

/// Validated `leading / batch_size`, shared by every reshape site.
pub fn time_length(leading: usize, batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        return Err(PolicyError::shape_contract(
            "batch/time split".to_string(),
            format!("batch size is zero for a leading dimension of {}", leading),
        ));
    }
    if leading % batch_size != 0 {
        return Err(PolicyError::shape_contract(
            "batch/time split".to_string(),
            format!(
                "leading dimension {} is not a multiple of batch size {}",
                leading, batch_size
            ),
        ));
    }
    Ok(leading / batch_size)
}

/// Product of the trailing feature dimensions.
pub fn flat_width(feature_dims: &[usize]) -> usize {
    feature_dims.iter().product()
}

/// `[batch * time, f1, f2, ...]` to `[batch, time, f1 * f2 * ...]`.
pub fn fold_time(x: ArrayViewD<f32>, ctx: &BatchShapeContext) -> Result<Array3<f32>> {
    let shape = x.shape();
    let Some((&leading, features)) = shape.split_first() else {
        return Err(PolicyError::shape_contract(
            "fold_time".to_string(),
            "scalar input has no leading dimension".to_string(),
        ));
    };
    if leading != ctx.rows() {
        return Err(PolicyError::shape_contract(
            "fold_time".to_string(),
            format!(
                "leading dimension {} does not equal batch {} x time {}",
                leading, ctx.batch_size, ctx.time_length
            ),
        ));
    }
    let width = flat_width(features);
    // Iteration is in logical order, so any memory layout folds correctly.
    let data: Vec<f32> = x.iter().copied().collect();
    Ok(Array3::from_shape_vec((ctx.batch_size, ctx.time_length, width), data)?)
}

/// `[batch, time, features]` back to `[batch * time, features]`.
pub fn unfold_time(x: ArrayView3<f32>) -> Result<Array2<f32>> {
    let (batch, time, width) = x.dim();
    let data: Vec<f32> = x.iter().copied().collect();
    Ok(Array2::from_shape_vec((batch * time, width), data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array4, IxDyn};

    #[test]
    fn derives_time_length() {
        let ctx = BatchShapeContext::derive(6, 2).unwrap();
        assert_eq!(ctx, BatchShapeContext { batch_size: 2, time_length: 3 });
        assert_eq!(ctx.rows(), 6);
    }

    #[test]
    fn indivisible_leading_dimension_is_reported() {
        let err = BatchShapeContext::derive(10, 4).unwrap_err();
        match err {
            PolicyError::ShapeContract { detail, .. } => {
                assert!(detail.contains("10"));
                assert!(detail.contains("4"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn zero_batch_is_reported() {
        assert!(matches!(time_length(6, 0), Err(PolicyError::ShapeContract { .. })));
    }

    #[test]
    fn fold_flattens_trailing_dims_in_order() {
        let x = Array4::from_shape_fn((4, 2, 2, 1), |(n, h, w, _)| (n * 100 + h * 10 + w) as f32);
        let ctx = BatchShapeContext::derive(4, 2).unwrap();
        let folded = fold_time(x.view().into_dyn(), &ctx).unwrap();
        assert_eq!(folded.dim(), (2, 2, 4));
        // Row n = b * time + t
        assert_eq!(folded[[1, 0, 3]], 211.0);
        assert_eq!(folded[[0, 1, 1]], 101.0);
    }

    #[test]
    fn fold_handles_non_standard_layout() {
        let x = Array::from_shape_fn(IxDyn(&[3, 2]), |i| (i[0] * 2 + i[1]) as f32);
        let ctx = BatchShapeContext::derive(2, 1).unwrap();
        let folded = fold_time(x.t(), &ctx).unwrap();
        assert_eq!(folded.iter().copied().collect::<Vec<_>>(), vec![0.0, 2.0, 4.0, 1.0, 3.0, 5.0]);
    }

    #[test]
    fn fold_rejects_mismatched_rows() {
        let x = Array::zeros(IxDyn(&[5, 3]));
        let ctx = BatchShapeContext { batch_size: 2, time_length: 3 };
        assert!(fold_time(x.view(), &ctx).is_err());
    }

    #[test]
    fn unfold_inverts_fold() {
        let x = Array::from_shape_fn(IxDyn(&[6, 5]), |i| (i[0] * 5 + i[1]) as f32);
        let ctx = BatchShapeContext::derive(6, 3).unwrap();
        let folded = fold_time(x.view(), &ctx).unwrap();
        let back = unfold_time(folded.view()).unwrap();
        assert_eq!(back.into_dyn(), x);
    }
}
