//! Network configuration.
//!
//! Every field has a default, so a JSON document only needs the keys it
//! changes. Unknown keys are rejected.

use std::fs;
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::error::{PolicyError, Result};
use crate::layers::CellKind;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Units of recurrent layer 1 and layer 2
    pub lstm_layers: (usize, usize),
    pub lstm_class: CellKind,
    /// Register the auxiliary target callbacks
    pub aux_estimate: bool,
    /// Frames per reward-prediction sample, the last one being the target
    pub rp_sequence_size: usize,
    pub encoder: EncoderConfig,
    pub aux: AuxConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            lstm_layers: (64, 256),
            lstm_class: CellKind::BasicLstm,
            aux_estimate: false,
            rp_sequence_size: 4,
            encoder: EncoderConfig::default(),
            aux: AuxConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderConfig {
    /// Kernel `[height, width]`
    pub conv_2d_filter_size: [usize; 2],
    pub conv_2d_stride: [usize; 2],
    pub conv_2d_num_filters: usize,
    pub conv_2d_num_layers: usize,
    pub activation: Activation,
    /// Batch normalization after every convolution
    pub batch_norm: Option<BatchNormConfig>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            conv_2d_filter_size: [3, 1],
            conv_2d_stride: [2, 1],
            conv_2d_num_filters: 32,
            conv_2d_num_layers: 4,
            activation: Activation::Elu,
            batch_norm: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchNormConfig {
    pub momentum: f32,
    pub epsilon: f32,
    pub renorm: Option<RenormConfig>,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        BatchNormConfig {
            momentum: 0.99,
            epsilon: 1e-3,
            renorm: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenormConfig {
    pub rmax: f32,
    pub dmax: f32,
}

impl Default for RenormConfig {
    fn default() -> Self {
        RenormConfig { rmax: 3.0, dmax: 5.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuxConfig {
    /// Pooling window and stride of the pixel-change target, `[height, width]`
    pub pc_estimator_stride: [usize; 2],
}

impl Default for AuxConfig {
    fn default() -> Self {
        AuxConfig { pc_estimator_stride: [2, 1] }
    }
}

impl PolicyConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PolicyConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let (u1, u2) = self.lstm_layers;
        if u1 == 0 || u2 == 0 {
            return Err(invalid("lstm_layers", format!("({}, {}) must both be non-zero", u1, u2)));
        }
        if self.rp_sequence_size < 2 {
            return Err(invalid(
                "rp_sequence_size",
                format!("{} leaves no frames before the target", self.rp_sequence_size),
            ));
        }
        self.encoder.validate()?;
        non_zero_pair("pc_estimator_stride", self.aux.pc_estimator_stride)
    }

    pub fn with_lstm_layers(mut self, units_1: usize, units_2: usize) -> Self {
        self.lstm_layers = (units_1, units_2);
        self
    }

    pub fn with_lstm_class(mut self, kind: CellKind) -> Self {
        self.lstm_class = kind;
        self
    }

    pub fn with_aux_estimate(mut self, enabled: bool) -> Self {
        self.aux_estimate = enabled;
        self
    }

    pub fn with_rp_sequence_size(mut self, size: usize) -> Self {
        self.rp_sequence_size = size;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderConfig) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_pc_estimator_stride(mut self, stride: [usize; 2]) -> Self {
        self.aux.pc_estimator_stride = stride;
        self
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        non_zero_pair("conv_2d_filter_size", self.conv_2d_filter_size)?;
        non_zero_pair("conv_2d_stride", self.conv_2d_stride)?;
        if self.conv_2d_num_filters == 0 {
            return Err(invalid("conv_2d_num_filters", "must be non-zero".to_string()));
        }
        if self.conv_2d_num_layers == 0 {
            return Err(invalid("conv_2d_num_layers", "must be non-zero".to_string()));
        }
        if let Some(bn) = &self.batch_norm {
            if !(0.0..1.0).contains(&bn.momentum) {
                return Err(invalid("batch_norm.momentum", format!("{} is outside [0, 1)", bn.momentum)));
            }
            if bn.epsilon.is_nan() || bn.epsilon <= 0.0 {
                return Err(invalid("batch_norm.epsilon", format!("{} must be positive", bn.epsilon)));
            }
            if let Some(renorm) = &bn.renorm {
                // Negated so that NaN bounds are rejected too
                if !(renorm.rmax >= 1.0 && renorm.dmax >= 0.0) {
                    return Err(invalid(
                        "batch_norm.renorm",
                        format!("rmax {} must be >= 1 and dmax {} >= 0", renorm.rmax, renorm.dmax),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn with_filter_size(mut self, height: usize, width: usize) -> Self {
        self.conv_2d_filter_size = [height, width];
        self
    }

    pub fn with_stride(mut self, height: usize, width: usize) -> Self {
        self.conv_2d_stride = [height, width];
        self
    }

    pub fn with_num_filters(mut self, filters: usize) -> Self {
        self.conv_2d_num_filters = filters;
        self
    }

    pub fn with_num_layers(mut self, layers: usize) -> Self {
        self.conv_2d_num_layers = layers;
        self
    }

    pub fn with_batch_norm(mut self, batch_norm: BatchNormConfig) -> Self {
        self.batch_norm = Some(batch_norm);
        self
    }
}

fn invalid(name: &str, reason: String) -> PolicyError {
    PolicyError::invalid_parameter(name.to_string(), reason)
}

fn non_zero_pair(name: &str, pair: [usize; 2]) -> Result<()> {
    if pair.contains(&0) {
        Err(invalid(name, format!("{:?} has a zero extent", pair)))
    } else {
        Ok(())
    }
}
