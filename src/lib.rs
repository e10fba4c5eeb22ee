//! # navstack - Stacked-LSTM actor-critic policy network
//!
//! A convolutional encoder feeding two stacked recurrent layers and an
//! actor-critic head, in the NAV A3C / "Learning to Reinforcement Learn"
//! topology. Multi-modal observations are encoded, folded from
//! `[batch * time, ...]` into `[batch, time, ...]`, concatenated with the
//! previous action and reward, and run through both recurrent layers before
//! the head produces policy logits, a value estimate and a sampled action.
//!
//! The network is evaluated eagerly on `ndarray` tensors. Training is left to
//! the caller: the crate exposes the input slots, the persisted variable list,
//! pending batch-norm updates and the auxiliary target callbacks.
//!
//! ## Quick Start
//!
//! ```rust
//! use ndarray::{Array2, Array4};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use navstack::{ObservationSpace, PolicyConfig, PolicyFeed, StackedLstmPolicy};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let ob_space = ObservationSpace::new(vec![10, 10, 3]);
//! let config = PolicyConfig::default().with_lstm_layers(8, 16);
//! let policy = StackedLstmPolicy::new(ob_space, 4, config, &mut rng).unwrap();
//!
//! // 2 sequences of 3 steps
//! let external = Array4::<f32>::zeros((6, 10, 10, 3)).into_dyn();
//! let action_reward = Array2::<f32>::zeros((6, 5));
//! let feed = PolicyFeed::new(external.view(), action_reward.view(), 2);
//!
//! let out = policy.forward(&feed, &mut rng).unwrap();
//! assert_eq!(out.logits.dim(), (6, 4));
//! assert_eq!(out.value.len(), 6);
//!
//! // Carry the state into the next chunk
//! let next = PolicyFeed::new(external.view(), action_reward.view(), 2).with_state(&out.state_out);
//! policy.forward(&next, &mut rng).unwrap();
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Element-wise activations and softmax
//! - [`auxiliary`] - Auxiliary target callbacks (pixel change)
//! - [`concat`] - Feature-axis concatenation of stage inputs
//! - [`config`] - Serde-backed network configuration
//! - [`encoder`] - Convolutional feature extractor
//! - [`error`] - Error types and result handling
//! - [`heads`] - Actor-critic head and action sampling
//! - [`inputs`] - Observation spaces, input slots and feeds
//! - [`layers`] - Dense, convolution, batch-norm and recurrent cells
//! - [`params`] - Variable registry and snapshots
//! - [`policy`] - The assembled network
//! - [`recurrent`] - Stacked recurrent core
//! - [`shape`] - Batch/time reshaping

pub mod activations;
pub mod auxiliary;
pub mod concat;
pub mod config;
pub mod encoder;
pub mod error;
pub mod heads;
pub mod inputs;
pub mod layers;
pub mod params;
pub mod policy;
pub mod recurrent;
pub mod shape;

pub use auxiliary::{CallbackRegistry, PIXEL_CHANGE};
pub use config::{AuxConfig, BatchNormConfig, EncoderConfig, PolicyConfig, RenormConfig};
pub use error::{PolicyError, Result};
pub use inputs::{InputContext, ObservationSpace, PlaceholderRegistry, PlaceholderSpec, PolicyFeed};
pub use layers::{CellKind, CellState};
pub use params::{Parameterized, VariableInfo, VariableKind, VariableSnapshot};
pub use policy::{PolicyOutput, StackedLstmPolicy};
pub use recurrent::StackedState;
pub use shape::BatchShapeContext;

#[cfg(test)]
mod tests;
