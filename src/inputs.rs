//! Input slots of the network.
//!
//! A [`PlaceholderSpec`] names an input and fixes its static shape, with `None`
//! for dimensions only known at evaluation time. The [`PlaceholderRegistry`]
//! declares the slots of the three input contexts. Only the on-policy context
//! is evaluated; the off-policy and reward-prediction slots are declared so a
//! training loop can be written against the full set.
//!
//! A [`PolicyFeed`] binds concrete arrays to the on-policy slots for one
//! forward pass.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{ArrayView2, ArrayViewD};
use serde::{Serialize, Deserialize};

use crate::error::{PolicyError, Result};
use crate::recurrent::StackedState;
use crate::shape::flat_width;

pub const EXTERNAL: &str = "external";
pub const INTERNAL: &str = "internal";

/// Named modality shapes of one observation, without the leading batch dimension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationSpace {
    modalities: BTreeMap<String, Vec<usize>>,
}

impl ObservationSpace {
    /// Observation space with only the mandatory `external` modality, `[H, W, C]`.
    pub fn new(external: Vec<usize>) -> Self {
        let mut modalities = BTreeMap::new();
        modalities.insert(EXTERNAL.to_string(), external);
        ObservationSpace { modalities }
    }

    pub fn with_internal(self, shape: Vec<usize>) -> Self {
        self.with_modality(INTERNAL, shape)
    }

    /// Declare any other modality. The network does not consume it, but feeds
    /// carrying it are shape-checked.
    pub fn with_modality(mut self, name: &str, shape: Vec<usize>) -> Self {
        self.modalities.insert(name.to_string(), shape);
        self
    }

    pub fn external(&self) -> Result<&[usize]> {
        self.modalities
            .get(EXTERNAL)
            .map(Vec::as_slice)
            .ok_or_else(|| PolicyError::MissingInput(format!("observation space has no '{}' modality", EXTERNAL)))
    }

    pub fn internal(&self) -> Option<&[usize]> {
        self.modalities.get(INTERNAL).map(Vec::as_slice)
    }

    /// Flattened width of the internal modality per time step.
    pub fn internal_width(&self) -> Option<usize> {
        self.internal().map(flat_width)
    }

    pub fn modalities(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.modalities.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    I32,
    Bool,
}

/// A named input slot with a partially known shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderSpec {
    pub name: String,
    pub dtype: DType,
    /// `None` marks a dimension bound at evaluation time.
    pub shape: Vec<Option<usize>>,
}

impl PlaceholderSpec {
    pub fn new(name: String, dtype: DType, shape: Vec<Option<usize>>) -> Self {
        PlaceholderSpec { name, dtype, shape }
    }

    fn scalar(name: String, dtype: DType) -> Self {
        PlaceholderSpec::new(name, dtype, Vec::new())
    }

    /// Check a concrete shape against this slot.
    pub fn check(&self, actual: &[usize]) -> Result<()> {
        let fits = actual.len() == self.shape.len()
            && self.shape.iter().zip(actual).all(|(want, &got)| want.map_or(true, |w| w == got));
        if fits {
            Ok(())
        } else {
            Err(PolicyError::dimension_mismatch(
                format!("{} {}", self.name, ShapeDisplay(&self.shape)),
                format!("{:?}", actual),
            ))
        }
    }
}

struct ShapeDisplay<'a>(&'a [Option<usize>]);

impl fmt::Display for ShapeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match dim {
                Some(d) => write!(f, "{}", d)?,
                None => write!(f, "*")?,
            }
        }
        write!(f, "]")
    }
}

/// The three input contexts of the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputContext {
    OnPolicy,
    OffPolicy,
    RewardPrediction,
}

impl InputContext {
    pub fn prefix(&self) -> &'static str {
        match self {
            InputContext::OnPolicy => "on_policy",
            InputContext::OffPolicy => "off_policy",
            InputContext::RewardPrediction => "reward_prediction",
        }
    }
}

/// Slots of one input context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPlaceholders {
    pub context: InputContext,
    /// Observation slots per modality, `[*, modality shape...]`
    pub state_in: BTreeMap<String, PlaceholderSpec>,
    /// `[*, action_space + 1]`, absent for reward prediction
    pub action_reward: Option<PlaceholderSpec>,
    pub batch_size: PlaceholderSpec,
    /// Absent for reward prediction, whose window is fixed. The time length
    /// is always derived from the leading dimension and `batch_size`; this
    /// scalar only names it.
    pub time_length: Option<PlaceholderSpec>,
    /// `[batch_size]` valid steps per row, bound by [`PolicyFeed::sequence_lengths`]
    pub sequence_lengths: Option<PlaceholderSpec>,
}

impl ContextPlaceholders {
    fn declare(context: InputContext, ob_space: &ObservationSpace, ac_space: usize) -> Self {
        let prefix = context.prefix();
        let state_in = ob_space
            .modalities()
            .map(|(name, shape)| {
                let mut dims = vec![None];
                dims.extend(shape.iter().map(|&d| Some(d)));
                let spec = PlaceholderSpec::new(format!("{}/state_in/{}", prefix, name), DType::F32, dims);
                (name.to_string(), spec)
            })
            .collect();
        let sequential = context != InputContext::RewardPrediction;

        ContextPlaceholders {
            context,
            state_in,
            action_reward: sequential.then(|| {
                PlaceholderSpec::new(
                    format!("{}/action_reward_in", prefix),
                    DType::F32,
                    vec![None, Some(ac_space + 1)],
                )
            }),
            batch_size: PlaceholderSpec::scalar(format!("{}/batch_size", prefix), DType::I32),
            time_length: sequential.then(|| PlaceholderSpec::scalar(format!("{}/time_length", prefix), DType::I32)),
            sequence_lengths: sequential
                .then(|| PlaceholderSpec::new(format!("{}/sequence_lengths", prefix), DType::I32, vec![None])),
        }
    }

    /// Every slot of this context.
    pub fn specs(&self) -> Vec<&PlaceholderSpec> {
        let mut specs: Vec<&PlaceholderSpec> = self.state_in.values().collect();
        specs.extend(self.action_reward.iter());
        specs.push(&self.batch_size);
        specs.extend(self.time_length.iter());
        specs.extend(self.sequence_lengths.iter());
        specs
    }

    /// Check a feed against this context and return its flattened leading dimension.
    pub fn validate(&self, feed: &PolicyFeed<'_>) -> Result<usize> {
        for required in [EXTERNAL, INTERNAL] {
            if self.state_in.contains_key(required) && !feed.observations.contains_key(required) {
                return Err(PolicyError::MissingInput(format!(
                    "{}/state_in/{}",
                    self.context.prefix(),
                    required
                )));
            }
        }

        let mut leading: Option<(&str, usize)> = None;
        for (name, value) in &feed.observations {
            let spec = self.state_in.get(name).ok_or_else(|| {
                PolicyError::invalid_parameter(
                    format!("observation '{}'", name),
                    "modality is not declared in the observation space".to_string(),
                )
            })?;
            spec.check(value.shape())?;
            agree_on_leading(&mut leading, name, value.shape()[0])?;
        }

        if let Some(spec) = &self.action_reward {
            spec.check(feed.action_reward.shape())?;
            agree_on_leading(&mut leading, "action_reward", feed.action_reward.nrows())?;
        }

        if let (Some(spec), Some(lengths)) = (&self.sequence_lengths, &feed.sequence_lengths) {
            spec.check(&[lengths.len()])?;
            if lengths.len() != feed.batch_size {
                return Err(PolicyError::dimension_mismatch(
                    format!("{} [{}]", spec.name, feed.batch_size),
                    format!("[{}]", lengths.len()),
                ));
            }
        }

        leading
            .map(|(_, n)| n)
            .ok_or_else(|| PolicyError::MissingInput(format!("{}/state_in", self.context.prefix())))
    }
}

fn agree_on_leading<'a>(seen: &mut Option<(&'a str, usize)>, name: &'a str, n: usize) -> Result<()> {
    match *seen {
        Some((first, m)) if m != n => Err(PolicyError::shape_contract(
            "input binding".to_string(),
            format!("'{}' has {} rows but '{}' has {}", name, n, first, m),
        )),
        Some(_) => Ok(()),
        None => {
            *seen = Some((name, n));
            Ok(())
        }
    }
}

/// Every input slot the network declares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderRegistry {
    pub on_policy: ContextPlaceholders,
    pub off_policy: ContextPlaceholders,
    pub reward_prediction: ContextPlaceholders,
    /// Window of frames the reward-prediction context consumes, `rp_sequence_size - 1`
    pub rp_window: usize,
    /// Boolean scalar, `false` unless bound
    pub train_phase: PlaceholderSpec,
}

impl PlaceholderRegistry {
    pub fn declare(ob_space: &ObservationSpace, ac_space: usize, rp_sequence_size: usize) -> Self {
        PlaceholderRegistry {
            on_policy: ContextPlaceholders::declare(InputContext::OnPolicy, ob_space, ac_space),
            off_policy: ContextPlaceholders::declare(InputContext::OffPolicy, ob_space, ac_space),
            reward_prediction: ContextPlaceholders::declare(InputContext::RewardPrediction, ob_space, ac_space),
            rp_window: rp_sequence_size.saturating_sub(1),
            train_phase: PlaceholderSpec::scalar("train_phase".to_string(), DType::Bool),
        }
    }

    pub fn context(&self, context: InputContext) -> &ContextPlaceholders {
        match context {
            InputContext::OnPolicy => &self.on_policy,
            InputContext::OffPolicy => &self.off_policy,
            InputContext::RewardPrediction => &self.reward_prediction,
        }
    }

    /// Every declared slot, context by context, then the training-phase flag.
    pub fn specs(&self) -> Vec<&PlaceholderSpec> {
        let mut specs = self.on_policy.specs();
        specs.extend(self.off_policy.specs());
        specs.extend(self.reward_prediction.specs());
        specs.push(&self.train_phase);
        specs
    }
}

/// Concrete bindings for one on-policy forward pass.
#[derive(Clone, Debug)]
pub struct PolicyFeed<'a> {
    /// Modality name to `[batch * time, modality shape...]`
    pub observations: BTreeMap<String, ArrayViewD<'a, f32>>,
    /// `[batch * time, action_space + 1]`: one-hot previous action, then previous reward
    pub action_reward: ArrayView2<'a, f32>,
    pub batch_size: usize,
    /// Initial recurrent state; zeros when unset
    pub initial_state: Option<&'a StackedState>,
    /// Per-row number of valid steps; all steps when unset
    pub sequence_lengths: Option<Vec<usize>>,
    pub train_phase: bool,
}

impl<'a> PolicyFeed<'a> {
    pub fn new(external: ArrayViewD<'a, f32>, action_reward: ArrayView2<'a, f32>, batch_size: usize) -> Self {
        let mut observations = BTreeMap::new();
        observations.insert(EXTERNAL.to_string(), external);
        PolicyFeed {
            observations,
            action_reward,
            batch_size,
            initial_state: None,
            sequence_lengths: None,
            train_phase: false,
        }
    }

    pub fn with_internal(self, internal: ArrayViewD<'a, f32>) -> Self {
        self.with_modality(INTERNAL, internal)
    }

    pub fn with_modality(mut self, name: &str, value: ArrayViewD<'a, f32>) -> Self {
        self.observations.insert(name.to_string(), value);
        self
    }

    pub fn with_state(mut self, state: &'a StackedState) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn with_sequence_lengths(mut self, lengths: Vec<usize>) -> Self {
        self.sequence_lengths = Some(lengths);
        self
    }

    pub fn with_train_phase(mut self, train_phase: bool) -> Self {
        self.train_phase = train_phase;
        self
    }

    pub fn external(&self) -> Result<&ArrayViewD<'a, f32>> {
        self.observations
            .get(EXTERNAL)
            .ok_or_else(|| PolicyError::MissingInput(EXTERNAL.to_string()))
    }

    pub fn internal(&self) -> Option<&ArrayViewD<'a, f32>> {
        self.observations.get(INTERNAL)
    }
}
