use ndarray::{Array2, Array4, ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{EncoderConfig, PolicyConfig};
use crate::error::PolicyError;
use crate::inputs::{ObservationSpace, PolicyFeed};
use crate::layers::{CellKind, CellState};
use crate::policy::StackedLstmPolicy;
use crate::recurrent::StackedState;

fn small_config() -> PolicyConfig {
    PolicyConfig::default()
        .with_lstm_layers(4, 6)
        .with_encoder(EncoderConfig::default().with_num_layers(2).with_num_filters(4))
}

fn policy(ob_space: ObservationSpace) -> StackedLstmPolicy {
    StackedLstmPolicy::new(ob_space, 3, small_config(), &mut StdRng::seed_from_u64(1)).unwrap()
}

#[test]
fn test_zero_actions_is_rejected() {
    let result = StackedLstmPolicy::new(
        ObservationSpace::new(vec![4, 1, 1]),
        0,
        small_config(),
        &mut StdRng::seed_from_u64(1),
    );
    assert!(matches!(result, Err(PolicyError::InvalidParameter { .. })));
}

#[test]
fn test_invalid_config_is_rejected_at_construction() {
    let result = StackedLstmPolicy::new(
        ObservationSpace::new(vec![4, 1, 1]),
        3,
        small_config().with_lstm_layers(4, 0),
        &mut StdRng::seed_from_u64(1),
    );
    assert!(result.is_err());
}

#[test]
fn test_non_image_external_is_rejected() {
    let result = StackedLstmPolicy::new(ObservationSpace::new(vec![16]), 3, small_config(), &mut StdRng::seed_from_u64(1));
    assert!(matches!(result, Err(PolicyError::InvalidParameter { .. })));
}

#[test]
fn test_action_reward_width_mismatch() {
    let policy = policy(ObservationSpace::new(vec![4, 1, 1]));
    let external = Array4::<f32>::zeros((2, 4, 1, 1)).into_dyn();
    let action_reward = Array2::<f32>::zeros((2, 3));
    let feed = PolicyFeed::new(external.view(), action_reward.view(), 1);
    let err = policy.forward(&feed, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, PolicyError::DimensionMismatch { .. }));
    assert!(err.to_string().contains("action_reward_in"));
}

#[test]
fn test_modality_shape_mismatch() {
    let policy = policy(ObservationSpace::new(vec![4, 1, 1]).with_internal(vec![2]));
    let external = Array4::<f32>::zeros((2, 4, 1, 1)).into_dyn();
    let internal = ArrayD::<f32>::zeros(IxDyn(&[2, 3]));
    let action_reward = Array2::<f32>::zeros((2, 4));
    let feed = PolicyFeed::new(external.view(), action_reward.view(), 1).with_internal(internal.view());
    let err = policy.forward(&feed, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(err.to_string().contains("state_in/internal"));
}

#[test]
fn test_state_batch_mismatch() {
    let policy = policy(ObservationSpace::new(vec![4, 1, 1]));
    let external = Array4::<f32>::zeros((4, 4, 1, 1)).into_dyn();
    let action_reward = Array2::<f32>::zeros((4, 4));
    let state = policy.zero_state(1);
    let feed = PolicyFeed::new(external.view(), action_reward.view(), 2).with_state(&state);
    let err = policy.forward(&feed, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, PolicyError::DimensionMismatch { .. }));
}

#[test]
fn test_state_of_wrong_cell_kind() {
    let policy = policy(ObservationSpace::new(vec![4, 1, 1]));
    let external = Array4::<f32>::zeros((2, 4, 1, 1)).into_dyn();
    let action_reward = Array2::<f32>::zeros((2, 4));
    let state = StackedState(CellState::zeros(CellKind::Gru, 1, 4), CellState::zeros(CellKind::Gru, 1, 6));
    let feed = PolicyFeed::new(external.view(), action_reward.view(), 1).with_state(&state);
    assert!(policy.forward(&feed, &mut StdRng::seed_from_u64(0)).is_err());
}

#[test]
fn test_zero_batch_size() {
    let policy = policy(ObservationSpace::new(vec![4, 1, 1]));
    let external = Array4::<f32>::zeros((2, 4, 1, 1)).into_dyn();
    let action_reward = Array2::<f32>::zeros((2, 4));
    let feed = PolicyFeed::new(external.view(), action_reward.view(), 0);
    let err = policy.forward(&feed, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, PolicyError::ShapeContract { .. }));
}

#[test]
fn test_unflatten_wrong_count() {
    let policy = policy(ObservationSpace::new(vec![4, 1, 1]));
    let mut flat = policy.zero_state(1).flatten();
    flat.pop();
    assert!(policy.unflatten_state(flat).is_err());
}
