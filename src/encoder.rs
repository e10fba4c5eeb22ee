//! Convolutional feature extractor for the `external` modality.
//!
//! A stack of identical blocks, each a SAME-padded convolution, an optional
//! batch normalization and the configured activation. The output
//! `[N, H', W', filters]` is flattened per sample to `[N, H' * W' * filters]`.

use log::trace;
use ndarray::{Array2, Array4, ArrayView4, ArrayViewD, ArrayViewMutD};
use rand::Rng;

use crate::activations::Activation;
use crate::config::EncoderConfig;
use crate::error::{PolicyError, Result};
use crate::layers::{BatchNormLayer, BatchNormUpdate, Conv2DLayer};
use crate::params::{scoped, Parameterized, VariableKind};

/// Pending moving-statistics update of one encoder block.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateOp {
    pub block: usize,
    pub stats: BatchNormUpdate,
}

#[derive(Clone, Debug)]
struct ConvBlock {
    conv: Conv2DLayer,
    norm: Option<BatchNormLayer>,
}

#[derive(Clone, Debug)]
pub struct ConvEncoder {
    blocks: Vec<ConvBlock>,
    activation: Activation,
    input_shape: (usize, usize, usize),
}

impl ConvEncoder {
    /// Build the encoder for `[height, width, channels]` inputs.
    pub fn new<R: Rng + ?Sized>(input_shape: &[usize], config: &EncoderConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let &[height, width, channels] = input_shape else {
            return Err(PolicyError::invalid_parameter(
                "external".to_string(),
                format!("expected an [H, W, C] observation, got {:?}", input_shape),
            ));
        };
        if height == 0 || width == 0 || channels == 0 {
            return Err(PolicyError::invalid_parameter(
                "external".to_string(),
                format!("{:?} has a zero extent", input_shape),
            ));
        }

        let [kh, kw] = config.conv_2d_filter_size;
        let [sh, sw] = config.conv_2d_stride;
        let filters = config.conv_2d_num_filters;

        let mut blocks = Vec::with_capacity(config.conv_2d_num_layers);
        let mut in_channels = channels;
        for _ in 0..config.conv_2d_num_layers {
            let conv = Conv2DLayer::new(in_channels, filters, (kh, kw), (sh, sw), rng)?;
            let norm = config.batch_norm.as_ref().map(|bn| {
                let layer = BatchNormLayer::new(filters, bn.momentum, bn.epsilon);
                match &bn.renorm {
                    Some(renorm) => layer.with_renorm(renorm.rmax, renorm.dmax),
                    None => layer,
                }
            });
            blocks.push(ConvBlock { conv, norm });
            in_channels = filters;
        }

        Ok(ConvEncoder {
            blocks,
            activation: config.activation,
            input_shape: (height, width, channels),
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    /// `[H', W', filters]` of the last block.
    pub fn output_shape(&self) -> (usize, usize, usize) {
        let (mut h, mut w, mut c) = self.input_shape;
        for block in &self.blocks {
            (h, w, c) = block.conv.output_shape(h, w);
        }
        (h, w, c)
    }

    /// Flattened feature width per sample.
    pub fn feature_width(&self) -> usize {
        let (h, w, c) = self.output_shape();
        h * w * c
    }

    pub fn has_batch_norm(&self) -> bool {
        self.blocks.iter().any(|b| b.norm.is_some())
    }

    /// Encode `[N, H, W, C]` into `[N, features]`.
    ///
    /// In the training phase every normalized block returns its batch statistics
    /// as an [`UpdateOp`]; nothing is written back here.
    pub fn forward(&self, input: ArrayView4<f32>, training: bool) -> Result<(Array2<f32>, Vec<UpdateOp>)> {
        let (n, h, w, c) = input.dim();
        if (h, w, c) != self.input_shape {
            return Err(PolicyError::dimension_mismatch(
                format!("[*, {}, {}, {}]", self.input_shape.0, self.input_shape.1, self.input_shape.2),
                format!("{:?}", input.shape()),
            ));
        }

        let mut update_ops = Vec::new();
        let mut x: Array4<f32> = input.to_owned();
        for (index, block) in self.blocks.iter().enumerate() {
            x = block.conv.forward(x.view())?;
            if let Some(norm) = &block.norm {
                let (bn, bh, bw, bc) = x.dim();
                let rows = x.into_shape((bn * bh * bw, bc))?;
                let (normalized, stats) = norm.forward(rows.view(), training)?;
                if let Some(stats) = stats {
                    update_ops.push(UpdateOp { block: index, stats });
                }
                x = normalized.into_shape((bn, bh, bw, bc))?;
            }
            self.activation.apply(&mut x);
        }

        let (_, oh, ow, oc) = x.dim();
        trace!("encoder: [{}, {}, {}, {}] -> [{}, {}, {}, {}]", n, h, w, c, n, oh, ow, oc);
        Ok((x.into_shape((n, oh * ow * oc))?, update_ops))
    }

    /// Fold pending batch statistics into the moving averages.
    pub fn apply_update_ops(&mut self, ops: &[UpdateOp]) -> Result<()> {
        for op in ops {
            let norm = self
                .blocks
                .get_mut(op.block)
                .and_then(|b| b.norm.as_mut())
                .ok_or_else(|| {
                    PolicyError::invalid_parameter(
                        "update_ops".to_string(),
                        format!("block {} has no batch normalization", op.block),
                    )
                })?;
            norm.apply_update(&op.stats)?;
        }
        Ok(())
    }
}

impl Parameterized for ConvEncoder {
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>)) {
        for (i, block) in self.blocks.iter().enumerate() {
            block.conv.visit(&scoped(scope, &format!("conv_{}", i)), f);
            if let Some(norm) = &block.norm {
                norm.visit(&scoped(scope, &format!("bn_{}", i)), f);
            }
        }
    }

    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>)) {
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.conv.visit_mut(&scoped(scope, &format!("conv_{}", i)), f);
            if let Some(norm) = block.norm.as_mut() {
                norm.visit_mut(&scoped(scope, &format!("bn_{}", i)), f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchNormConfig, RenormConfig};
    use ndarray::Array4;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    #[test]
    fn default_encoder_geometry() {
        let encoder = ConvEncoder::new(&[10, 10, 3], &EncoderConfig::default(), &mut rng()).unwrap();
        assert_eq!(encoder.num_blocks(), 4);
        // Height 10 -> 5 -> 3 -> 2 -> 1, width untouched
        assert_eq!(encoder.output_shape(), (1, 10, 32));
        assert_eq!(encoder.feature_width(), 320);
    }

    #[test]
    fn forward_flattens_per_sample() {
        let config = EncoderConfig::default().with_num_layers(2).with_num_filters(4);
        let encoder = ConvEncoder::new(&[8, 2, 1], &config, &mut rng()).unwrap();
        let input = Array4::from_elem((3, 8, 2, 1), 0.5);
        let (features, ops) = encoder.forward(input.view(), false).unwrap();
        assert_eq!(features.dim(), (3, 2 * 2 * 4));
        assert!(ops.is_empty());
        // ELU output is bounded below by -1
        assert!(features.iter().all(|&v| v >= -1.0));
    }

    #[test]
    fn rejects_wrong_observation_shape() {
        let encoder = ConvEncoder::new(&[8, 2, 1], &EncoderConfig::default(), &mut rng()).unwrap();
        let input = Array4::zeros((1, 8, 3, 1));
        assert!(matches!(encoder.forward(input.view(), false), Err(PolicyError::DimensionMismatch { .. })));
        assert!(ConvEncoder::new(&[8, 2], &EncoderConfig::default(), &mut rng()).is_err());
    }

    #[test]
    fn training_phase_returns_update_ops() {
        let config = EncoderConfig::default().with_num_layers(2).with_num_filters(2).with_batch_norm(BatchNormConfig {
            renorm: Some(RenormConfig::default()),
            ..BatchNormConfig::default()
        });
        let mut encoder = ConvEncoder::new(&[4, 1, 1], &config, &mut rng()).unwrap();
        let input = Array4::from_shape_fn((2, 4, 1, 1), |(n, h, _, _)| (n + h) as f32);

        let (_, ops) = encoder.forward(input.view(), true).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].block, 1);

        let before = encoder.variables("encoder");
        assert!(before.iter().any(|v| v.name == "encoder/bn_0/moving_mean"));
        assert!(before.iter().any(|v| v.name == "encoder/bn_1/renorm_stddev"));

        encoder.apply_update_ops(&ops).unwrap();
        let (_, inference_ops) = encoder.forward(input.view(), false).unwrap();
        assert!(inference_ops.is_empty());
    }

    #[test]
    fn update_op_for_plain_block_is_rejected() {
        let mut encoder = ConvEncoder::new(&[4, 1, 1], &EncoderConfig::default(), &mut rng()).unwrap();
        let op = UpdateOp {
            block: 0,
            stats: BatchNormUpdate { mean: ndarray::Array1::zeros(32), variance: ndarray::Array1::ones(32) },
        };
        assert!(encoder.apply_update_ops(&[op]).is_err());
    }
}
