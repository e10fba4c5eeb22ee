//! 2D convolution over NHWC tensors
//!
//! Kernels are laid out `[kernel_h, kernel_w, in_channels, out_channels]` and
//! padding follows the SAME rule: `out = ceil(in / stride)`, with the surplus
//! split evenly and any odd cell padded at the end.

use ndarray::{s, Array1, Array3, Array4, ArrayView3, ArrayView4, ArrayViewD, ArrayViewMutD, Zip};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{PolicyError, Result};
use crate::params::{scoped, Parameterized, VariableKind};
use super::initialization::WeightInit;

/// 2D Convolutional Layer
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Conv2DLayer {
    /// Convolution kernels `[kh, kw, in_channels, out_channels]`
    pub kernels: Array4<f32>,

    /// Bias terms for each output channel
    pub biases: Array1<f32>,

    /// Stride along height and width
    pub stride: (usize, usize),
}

impl Conv2DLayer {
    /// Create a new 2D convolutional layer
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        rng: &mut R,
    ) -> Result<Self> {
        if kernel_size.0 == 0 || kernel_size.1 == 0 {
            return Err(PolicyError::invalid_parameter(
                "conv_2d_filter_size".to_string(),
                format!("{:?} has a zero extent", kernel_size),
            ));
        }
        if stride.0 == 0 || stride.1 == 0 {
            return Err(PolicyError::invalid_parameter(
                "conv_2d_stride".to_string(),
                format!("{:?} has a zero extent", stride),
            ));
        }
        let kernels = WeightInit::xavier_kernel((kernel_size.0, kernel_size.1, in_channels, out_channels), rng);

        Ok(Conv2DLayer {
            kernels,
            biases: WeightInit::biases(out_channels),
            stride,
        })
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        let (kh, kw, _, _) = self.kernels.dim();
        (kh, kw)
    }

    pub fn in_channels(&self) -> usize {
        self.kernels.dim().2
    }

    pub fn out_channels(&self) -> usize {
        self.kernels.dim().3
    }

    /// Output `(height, width, channels)` for an input of `(height, width)`.
    pub fn output_shape(&self, height: usize, width: usize) -> (usize, usize, usize) {
        (
            height.div_ceil(self.stride.0),
            width.div_ceil(self.stride.1),
            self.out_channels(),
        )
    }

    /// Leading pad for one spatial axis under the SAME rule.
    fn pad_before(input: usize, output: usize, kernel: usize, stride: usize) -> usize {
        let needed = (output.saturating_sub(1) * stride + kernel).saturating_sub(input);
        needed / 2
    }

    /// Forward pass for a batch `[batch, height, width, channels]`.
    pub fn forward(&self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch_size, in_h, in_w, in_c) = input.dim();
        if in_c != self.in_channels() {
            return Err(PolicyError::dimension_mismatch(
                format!("[*, *, *, {}]", self.in_channels()),
                format!("{:?}", input.shape()),
            ));
        }

        let (out_h, out_w, out_c) = self.output_shape(in_h, in_w);
        let mut output = Array4::zeros((batch_size, out_h, out_w, out_c));

        Zip::from(output.outer_iter_mut())
            .and(input.outer_iter())
            .par_for_each(|mut out, sample| out.assign(&self.convolve(sample, out_h, out_w)));

        Ok(output)
    }

    /// Convolve a single `[height, width, channels]` sample.
    fn convolve(&self, sample: ArrayView3<f32>, out_h: usize, out_w: usize) -> Array3<f32> {
        let (in_h, in_w, _) = sample.dim();
        let (kh, kw) = self.kernel_size();
        let pad_h = Self::pad_before(in_h, out_h, kh, self.stride.0);
        let pad_w = Self::pad_before(in_w, out_w, kw, self.stride.1);

        let mut out = Array3::zeros((out_h, out_w, self.out_channels()));
        for oh in 0..out_h {
            for ow in 0..out_w {
                let mut acc = self.biases.clone();
                for i in 0..kh {
                    // Cells falling into the padding contribute zero.
                    let Some(ih) = (oh * self.stride.0 + i).checked_sub(pad_h).filter(|&h| h < in_h) else {
                        continue;
                    };
                    for j in 0..kw {
                        let Some(iw) = (ow * self.stride.1 + j).checked_sub(pad_w).filter(|&w| w < in_w) else {
                            continue;
                        };
                        let pixel = sample.slice(s![ih, iw, ..]);
                        acc += &pixel.dot(&self.kernels.slice(s![i, j, .., ..]));
                    }
                }
                out.slice_mut(s![oh, ow, ..]).assign(&acc);
            }
        }
        out
    }
}

impl Parameterized for Conv2DLayer {
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>)) {
        f(scoped(scope, "kernels"), VariableKind::Trainable, self.kernels.view().into_dyn());
        f(scoped(scope, "biases"), VariableKind::Trainable, self.biases.view().into_dyn());
    }

    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>)) {
        f(scoped(scope, "kernels"), VariableKind::Trainable, self.kernels.view_mut().into_dyn());
        f(scoped(scope, "biases"), VariableKind::Trainable, self.biases.view_mut().into_dyn());
    }
}
