//! The stacked-LSTM actor-critic policy.
//!
//! Data flow of one on-policy pass:
//!
//! ```text
//! external [N, H, W, C] -> ConvEncoder -> [N, F] -> fold -> [B, T, F]
//! stage 1  = [external, action_reward]                     -> lstm_1
//! stage 2  = [lstm_1, external, action_reward, internal?]  -> lstm_2
//! lstm_2 [B, T, U2] -> unfold -> [N, U2] -> ActorCriticHead -> logits, value, sample
//! ```
//!
//! `N = B * T` where `B` is bound by the caller and `T` is derived.

use log::{debug, trace, warn};
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, ArrayViewMutD, Ix4};
use rand::Rng;

use crate::auxiliary::{CallbackRegistry, PIXEL_CHANGE};
use crate::concat::{concat_features, StageLayout};
use crate::config::PolicyConfig;
use crate::encoder::{ConvEncoder, UpdateOp};
use crate::error::{PolicyError, Result};
use crate::heads::{one_hot, ActorCriticHead};
use crate::inputs::{ObservationSpace, PlaceholderRegistry, PlaceholderSpec, PolicyFeed, EXTERNAL, INTERNAL};
use crate::params::{scoped, Parameterized, VariableInfo, VariableKind, VariableSnapshot};
use crate::recurrent::{StackedRecurrentCore, StackedState};
use crate::shape::{fold_time, unfold_time, BatchShapeContext};

const ACTION_REWARD: &str = "action_reward";

/// Result of one on-policy forward pass.
#[derive(Clone, Debug)]
pub struct PolicyOutput {
    /// `[N, A]`
    pub logits: Array2<f32>,
    /// `[N]`
    pub value: Array1<f32>,
    /// `[N]` sampled action indices
    pub sample: Array1<usize>,
    /// Feed back as the next chunk's initial state
    pub state_out: StackedState,
    pub shape: BatchShapeContext,
    /// Pending batch-norm statistics, empty outside the training phase
    pub update_ops: Vec<UpdateOp>,
}

impl PolicyOutput {
    /// Sampled actions as one-hot rows `[N, A]`.
    pub fn sample_one_hot(&self) -> Result<Array2<f32>> {
        one_hot(self.sample.view(), self.logits.ncols())
    }
}

/// Convolutional encoder, two stacked recurrent layers and an actor-critic head
/// sharing one trunk.
#[derive(Clone)]
pub struct StackedLstmPolicy {
    config: PolicyConfig,
    ob_space: ObservationSpace,
    ac_space: usize,
    layout: StageLayout,
    placeholders: PlaceholderRegistry,
    encoder: ConvEncoder,
    core: StackedRecurrentCore,
    head: ActorCriticHead,
    callbacks: CallbackRegistry,
}

impl StackedLstmPolicy {
    /// Build the network. All weights are drawn from `rng`, so a seeded
    /// generator gives a reproducible network.
    pub fn new<R: Rng + ?Sized>(
        ob_space: ObservationSpace,
        ac_space: usize,
        config: PolicyConfig,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;
        if ac_space == 0 {
            return Err(PolicyError::invalid_parameter(
                "ac_space".to_string(),
                "at least one action is required".to_string(),
            ));
        }

        let encoder = ConvEncoder::new(ob_space.external()?, &config.encoder, rng)?;
        let internal = ob_space.internal_width();
        if internal == Some(0) {
            warn!("'{}' modality has zero width and adds nothing to stage 2", INTERNAL);
        }

        let (units_1, units_2) = config.lstm_layers;
        let layout = StageLayout {
            external: encoder.feature_width(),
            action_reward: ac_space + 1,
            internal,
            lstm_1_units: units_1,
        };
        let core = StackedRecurrentCore::new(
            config.lstm_class,
            config.lstm_layers,
            layout.stage_1_width(),
            layout.stage_2_width() - units_1,
            rng,
        );
        let head = ActorCriticHead::new(units_2, ac_space, rng)?;
        let placeholders = PlaceholderRegistry::declare(&ob_space, ac_space, config.rp_sequence_size);
        let callbacks = CallbackRegistry::for_config(&config);

        let policy = StackedLstmPolicy {
            config,
            ob_space,
            ac_space,
            layout,
            placeholders,
            encoder,
            core,
            head,
            callbacks,
        };

        debug!(
            "encoder: {} blocks, {:?} -> {:?} ({} features)",
            policy.encoder.num_blocks(),
            policy.encoder.input_shape(),
            policy.encoder.output_shape(),
            layout.external
        );
        debug!(
            "{:?} core: stage 1 width {} -> {} units, stage 2 width {} -> {} units",
            policy.config.lstm_class,
            layout.stage_1_width(),
            units_1,
            layout.stage_2_width(),
            units_2
        );
        debug!(
            "{} actions, {} variables, {} parameters, callbacks {:?}",
            ac_space,
            policy.var_list().len(),
            policy.num_parameters(),
            policy.callbacks
        );

        Ok(policy)
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn ob_space(&self) -> &ObservationSpace {
        &self.ob_space
    }

    pub fn ac_space(&self) -> usize {
        self.ac_space
    }

    pub fn layout(&self) -> &StageLayout {
        &self.layout
    }

    pub fn placeholders(&self) -> &PlaceholderRegistry {
        &self.placeholders
    }

    pub fn encoder(&self) -> &ConvEncoder {
        &self.encoder
    }

    pub fn core(&self) -> &StackedRecurrentCore {
        &self.core
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Zero initial state for `batch_size` sequences.
    pub fn zero_state(&self, batch_size: usize) -> StackedState {
        self.core.zero_state(batch_size)
    }

    /// Flattened initial-state slots, layer 1 then layer 2.
    pub fn state_placeholders(&self) -> Vec<PlaceholderSpec> {
        self.core.state_placeholders()
    }

    /// Rebuild a state from the flat tensor list returned by [`StackedState::flatten`].
    pub fn unflatten_state(&self, flat: Vec<Array2<f32>>) -> Result<StackedState> {
        StackedState::from_flat(flat, self.core.kinds())
    }

    /// One on-policy pass. `rng` is only used to sample actions.
    pub fn forward<R: Rng + ?Sized>(&self, feed: &PolicyFeed<'_>, rng: &mut R) -> Result<PolicyOutput> {
        let rows = self.placeholders.on_policy.validate(feed)?;
        let shape = BatchShapeContext::derive(rows, feed.batch_size)?;
        trace!(
            "forward: {} rows = batch {} x time {}, train_phase {}",
            rows,
            shape.batch_size,
            shape.time_length,
            feed.train_phase
        );

        let external = feed.external()?.view().into_dimensionality::<Ix4>()?;
        let (features, update_ops) = self.encoder.forward(external, feed.train_phase)?;

        let external_seq = fold_time(features.view().into_dyn(), &shape)?;
        let action_reward_seq = fold_time(feed.action_reward.into_dyn(), &shape)?;
        let internal_seq = feed.internal().map(|x| fold_time(x.view(), &shape)).transpose()?;

        let stage_1 = concat_features(&[
            (EXTERNAL, external_seq.view()),
            (ACTION_REWARD, action_reward_seq.view()),
        ])?;
        let mut stage_2_extra = vec![
            (EXTERNAL, external_seq.view()),
            (ACTION_REWARD, action_reward_seq.view()),
        ];
        if let Some(internal) = &internal_seq {
            stage_2_extra.push((INTERNAL, internal.view()));
        }

        let zero_state;
        let initial = match feed.initial_state {
            Some(state) => state,
            None => {
                zero_state = self.core.zero_state(shape.batch_size);
                &zero_state
            }
        };

        let recurrent = self.core.forward(
            stage_1.view(),
            &stage_2_extra,
            initial,
            feed.sequence_lengths.as_deref(),
        )?;
        let flat = unfold_time(recurrent.outputs.view())?;
        let head = self.head.forward(flat.view(), rng)?;

        Ok(PolicyOutput {
            logits: head.logits,
            value: head.value,
            sample: head.sample,
            state_out: recurrent.final_state,
            shape,
            update_ops,
        })
    }

    /// Fold batch statistics returned by a training-phase pass into the encoder.
    pub fn apply_update_ops(&mut self, ops: &[UpdateOp]) -> Result<()> {
        self.encoder.apply_update_ops(ops)
    }

    /// Pixel-change target for `(state, last_state)` frames.
    pub fn pc_target(&self, state: ArrayViewD<f32>, last_state: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        if !self.config.aux_estimate {
            return Err(PolicyError::AuxiliaryDisabled(PIXEL_CHANGE.to_string()));
        }
        self.callbacks.call(PIXEL_CHANGE, state, last_state)
    }

    /// Persisted variables: trainable weights plus batch-norm statistics.
    pub fn var_list(&self) -> Vec<VariableInfo> {
        self.variables("")
    }

    pub fn trainable_variables(&self) -> Vec<VariableInfo> {
        self.var_list()
            .into_iter()
            .filter(|v| v.kind == VariableKind::Trainable)
            .collect()
    }

    pub fn snapshot(&self) -> VariableSnapshot {
        VariableSnapshot::capture(self, "")
    }

    /// Overwrite every persisted variable. Nothing is written unless the
    /// snapshot matches this network exactly.
    pub fn restore(&mut self, snapshot: &VariableSnapshot) -> Result<()> {
        snapshot.restore_into(self, "")
    }
}

impl Parameterized for StackedLstmPolicy {
    fn visit(&self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewD<f32>)) {
        self.encoder.visit(&scoped(scope, "encoder"), f);
        self.core.visit(scope, f);
        self.head.visit(&scoped(scope, "head"), f);
    }

    fn visit_mut(&mut self, scope: &str, f: &mut dyn FnMut(String, VariableKind, ArrayViewMutD<f32>)) {
        self.encoder.visit_mut(&scoped(scope, "encoder"), f);
        self.core.visit_mut(scope, f);
        self.head.visit_mut(&scoped(scope, "head"), f);
    }
}
