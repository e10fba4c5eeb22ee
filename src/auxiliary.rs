//! Auxiliary target callbacks.
//!
//! Auxiliary tasks regularize the shared trunk with self-supervised targets.
//! The network only produces the targets; losses live with the training loop.
//! When `aux_estimate` is off the registry is empty.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{s, Array3, ArrayD, ArrayView4, ArrayViewD, Axis, Ix4};

use crate::config::PolicyConfig;
use crate::error::{PolicyError, Result};

pub const PIXEL_CHANGE: &str = "pixel_change";

/// Target producer taking `(state, last_state)`.
pub type AuxCallback = Arc<dyn Fn(ArrayViewD<f32>, ArrayViewD<f32>) -> Result<ArrayD<f32>> + Send + Sync>;

/// Wrap a closure as an [`AuxCallback`].
pub fn callback<F>(f: F) -> AuxCallback
where
    F: Fn(ArrayViewD<f32>, ArrayViewD<f32>) -> Result<ArrayD<f32>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Named auxiliary target producers.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: BTreeMap<String, AuxCallback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for `config`: empty unless `aux_estimate` is set.
    pub fn for_config(config: &PolicyConfig) -> Self {
        let mut registry = Self::new();
        if config.aux_estimate {
            let stride = config.aux.pc_estimator_stride;
            registry.register(PIXEL_CHANGE, callback(move |state, last| pixel_change_target(state, last, stride)));
        }
        registry
    }

    pub fn register(&mut self, name: &str, callback: AuxCallback) {
        self.callbacks.insert(name.to_string(), callback);
    }

    pub fn names(&self) -> Vec<&str> {
        self.callbacks.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&AuxCallback> {
        self.callbacks
            .get(name)
            .ok_or_else(|| PolicyError::UnknownCallback(name.to_string()))
    }

    pub fn call(&self, name: &str, state: ArrayViewD<f32>, last_state: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        (self.get(name)?)(state, last_state)
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.callbacks.keys()).finish()
    }
}

/// Pixel-change target between two frames.
///
/// Takes `[H, W, C]` or `[N, H, W, C]` frames. The absolute difference has a
/// one-pixel border cropped from every spatial axis longer than two, is
/// averaged over channels and then average-pooled with window and stride
/// `stride` (partial windows at the far edge average what they cover).
/// Returns `[H', W']` or `[N, H', W']`.
pub fn pixel_change_target(state: ArrayViewD<f32>, last_state: ArrayViewD<f32>, stride: [usize; 2]) -> Result<ArrayD<f32>> {
    if state.shape() != last_state.shape() {
        return Err(PolicyError::dimension_mismatch(
            format!("last state {:?}", state.shape()),
            format!("{:?}", last_state.shape()),
        ));
    }
    if stride.contains(&0) {
        return Err(PolicyError::invalid_parameter(
            "pc_estimator_stride".to_string(),
            format!("{:?} has a zero extent", stride),
        ));
    }

    let batched = match state.ndim() {
        3 => false,
        4 => true,
        _ => {
            return Err(PolicyError::dimension_mismatch(
                "[H, W, C] or [N, H, W, C]".to_string(),
                format!("{:?}", state.shape()),
            ))
        }
    };
    let state = as_batch(state, batched)?;
    let last_state = as_batch(last_state, batched)?;

    let (_, h, w, _) = state.dim();
    let rows = crop(h);
    let cols = crop(w);
    let diff = (&state.slice(s![.., rows.0..rows.1, cols.0..cols.1, ..])
        - &last_state.slice(s![.., rows.0..rows.1, cols.0..cols.1, ..]))
        .mapv(f32::abs);
    let Some(change) = diff.mean_axis(Axis(3)) else {
        return Err(PolicyError::dimension_mismatch(
            "at least one channel".to_string(),
            "0".to_string(),
        ));
    };

    let pooled = average_pool(&change, stride);
    Ok(if batched {
        pooled.into_dyn()
    } else {
        pooled.index_axis_move(Axis(0), 0).into_dyn()
    })
}

fn as_batch(x: ArrayViewD<f32>, batched: bool) -> Result<ArrayView4<f32>> {
    let x = if batched { x } else { x.insert_axis(Axis(0)) };
    Ok(x.into_dimensionality::<Ix4>()?)
}

fn crop(extent: usize) -> (usize, usize) {
    if extent > 2 {
        (1, extent - 1)
    } else {
        (0, extent)
    }
}

fn average_pool(x: &Array3<f32>, stride: [usize; 2]) -> Array3<f32> {
    let (n, h, w) = x.dim();
    let [sh, sw] = stride;
    let (oh, ow) = ((h + sh - 1) / sh, (w + sw - 1) / sw);
    Array3::from_shape_fn((n, oh, ow), |(b, i, j)| {
        let rows = i * sh..((i + 1) * sh).min(h);
        let cols = j * sw..((j + 1) * sw).min(w);
        let count = (rows.len() * cols.len()) as f32;
        x.slice(s![b, rows, cols]).sum() / count
    })
}
