use navstack::{
    CellKind, ObservationSpace, PolicyConfig, PolicyError, PolicyFeed, StackedLstmPolicy, VariableSnapshot,
    PIXEL_CHANGE,
};
use navstack::config::EncoderConfig;
use ndarray::{s, Array2, Array4, ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn one_hot_action_reward(rows: usize, actions: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, actions + 1), |(n, j)| {
        if j == actions {
            (n as f32 * 0.3).cos()
        } else if j == n % actions {
            1.0
        } else {
            0.0
        }
    })
}

fn frames(rows: usize, h: usize, w: usize, c: usize) -> ArrayD<f32> {
    Array4::from_shape_fn((rows, h, w, c), |(n, i, j, k)| ((n * 7 + i * 3 + j + k) as f32 * 0.05).sin()).into_dyn()
}

#[test]
fn test_reference_scenario() {
    let mut rng = StdRng::seed_from_u64(2024);
    let config = PolicyConfig::default().with_lstm_layers(8, 16);
    let policy = StackedLstmPolicy::new(ObservationSpace::new(vec![10, 10, 3]), 4, config, &mut rng).unwrap();

    let external = frames(6, 10, 10, 3);
    let action_reward = one_hot_action_reward(6, 4);
    let feed = PolicyFeed::new(external.view(), action_reward.view(), 2);
    let out = policy.forward(&feed, &mut rng).unwrap();

    assert_eq!(out.logits.dim(), (6, 4));
    assert_eq!(out.value.len(), 6);
    assert_eq!(out.sample.len(), 6);
    assert_eq!(out.shape.batch_size, 2);
    assert_eq!(out.shape.time_length, 3);
    assert_eq!(out.state_out.lstm_1().units(), 8);
    assert_eq!(out.state_out.lstm_2().units(), 16);
    assert_eq!(out.state_out.batch_size(), 2);
    assert!(out.logits.iter().chain(out.value.iter()).all(|v| v.is_finite()));
    assert_eq!(out.sample_one_hot().unwrap().sum(), 6.0);
}

#[test]
fn test_indivisible_batch_is_a_shape_contract_error() {
    let mut rng = StdRng::seed_from_u64(0);
    let config = PolicyConfig::default().with_lstm_layers(8, 16);
    let policy = StackedLstmPolicy::new(ObservationSpace::new(vec![10, 10, 3]), 4, config, &mut rng).unwrap();

    let external = frames(10, 10, 10, 3);
    let action_reward = one_hot_action_reward(10, 4);
    let feed = PolicyFeed::new(external.view(), action_reward.view(), 4);
    match policy.forward(&feed, &mut rng) {
        Err(PolicyError::ShapeContract { detail, .. }) => {
            assert!(detail.contains("10"));
            assert!(detail.contains("4"));
        }
        other => panic!("expected a shape-contract error, got {:?}", other.map(|o| o.shape)),
    }
}

#[test]
fn test_split_sequence_matches_whole_sequence() {
    for kind in [CellKind::BasicLstm, CellKind::Gru] {
        let mut rng = StdRng::seed_from_u64(5);
        let config = PolicyConfig::default()
            .with_lstm_layers(6, 9)
            .with_lstm_class(kind)
            .with_encoder(EncoderConfig::default().with_num_layers(2).with_num_filters(8));
        let ob_space = ObservationSpace::new(vec![8, 1, 2]).with_internal(vec![3]);
        let policy = StackedLstmPolicy::new(ob_space, 3, config, &mut rng).unwrap();

        // Batch 1, 6 steps
        let external = frames(6, 8, 1, 2);
        let internal = Array2::from_shape_fn((6, 3), |(n, j)| (n + j) as f32 * 0.1).into_dyn();
        let action_reward = one_hot_action_reward(6, 3);

        let whole = policy
            .forward(
                &PolicyFeed::new(external.view(), action_reward.view(), 1).with_internal(internal.view()),
                &mut rng,
            )
            .unwrap();

        let first = policy
            .forward(
                &PolicyFeed::new(
                    external.slice(s![..3, .., .., ..]).into_dyn(),
                    action_reward.slice(s![..3, ..]),
                    1,
                )
                .with_internal(internal.slice(s![..3, ..]).into_dyn()),
                &mut rng,
            )
            .unwrap();
        let second = policy
            .forward(
                &PolicyFeed::new(
                    external.slice(s![3.., .., .., ..]).into_dyn(),
                    action_reward.slice(s![3.., ..]),
                    1,
                )
                .with_internal(internal.slice(s![3.., ..]).into_dyn())
                .with_state(&first.state_out),
                &mut rng,
            )
            .unwrap();

        let halves = ndarray::concatenate(ndarray::Axis(0), &[first.logits.view(), second.logits.view()]).unwrap();
        for (a, b) in halves.iter().zip(whole.logits.iter()) {
            assert!((a - b).abs() < 1e-5, "{:?}: {} vs {}", kind, a, b);
        }
        for (a, b) in second.value.iter().zip(whole.value.slice(s![3..]).iter()) {
            assert!((a - b).abs() < 1e-5);
        }
        for (a, b) in second.state_out.flatten().iter().zip(whole.state_out.flatten().iter()) {
            assert!(a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5));
        }
    }
}

#[test]
fn test_sequence_lengths_freeze_finished_rows() {
    let mut rng = StdRng::seed_from_u64(8);
    let config = PolicyConfig::default()
        .with_lstm_layers(4, 5)
        .with_encoder(EncoderConfig::default().with_num_layers(1).with_num_filters(2));
    let policy = StackedLstmPolicy::new(ObservationSpace::new(vec![4, 1, 1]), 2, config, &mut rng).unwrap();

    // 2 sequences of 4 steps, the second only 2 steps long
    let external = frames(8, 4, 1, 1);
    let action_reward = one_hot_action_reward(8, 2);
    let masked = policy
        .forward(
            &PolicyFeed::new(external.view(), action_reward.view(), 2).with_sequence_lengths(vec![4, 2]),
            &mut rng,
        )
        .unwrap();
    let short = policy
        .forward(
            &PolicyFeed::new(external.slice(s![4..6, .., .., ..]).into_dyn(), action_reward.slice(s![4..6, ..]), 1),
            &mut rng,
        )
        .unwrap();

    let masked_state = masked.state_out.flatten();
    let short_state = short.state_out.flatten();
    for (m, s) in masked_state.iter().zip(short_state.iter()) {
        assert!(m.row(1).iter().zip(s.row(0).iter()).all(|(a, b)| (a - b).abs() < 1e-6));
    }
}

#[test]
fn test_aux_registry_contents() {
    let mut rng = StdRng::seed_from_u64(0);
    let ob_space = ObservationSpace::new(vec![10, 10, 3]);

    let plain = StackedLstmPolicy::new(ob_space.clone(), 4, PolicyConfig::default(), &mut rng).unwrap();
    assert!(plain.callbacks().is_empty());

    let aux = StackedLstmPolicy::new(ob_space, 4, PolicyConfig::default().with_aux_estimate(true), &mut rng).unwrap();
    assert_eq!(aux.callbacks().names(), vec![PIXEL_CHANGE]);

    let last = ArrayD::<f32>::zeros(IxDyn(&[2, 10, 10, 3]));
    let state = ArrayD::<f32>::ones(IxDyn(&[2, 10, 10, 3]));
    let target = aux.callbacks().call(PIXEL_CHANGE, state.view(), last.view()).unwrap();
    // 8 x 8 after cropping, pooled by [2, 1]
    assert_eq!(target.shape(), &[2, 4, 8]);
    assert!(target.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    assert!(matches!(
        aux.callbacks().call("value_replay", state.view(), last.view()),
        Err(PolicyError::UnknownCallback(_))
    ));
}

#[test]
fn test_snapshot_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.bin");
    let config = PolicyConfig::default()
        .with_lstm_layers(4, 4)
        .with_encoder(EncoderConfig::default().with_num_layers(1).with_num_filters(2));
    let ob_space = ObservationSpace::new(vec![4, 1, 1]);

    let source = StackedLstmPolicy::new(ob_space.clone(), 2, config.clone(), &mut StdRng::seed_from_u64(1)).unwrap();
    let mut target = StackedLstmPolicy::new(ob_space, 2, config, &mut StdRng::seed_from_u64(2)).unwrap();
    assert_ne!(source.snapshot(), target.snapshot());

    source.snapshot().save(&path).unwrap();
    let loaded = VariableSnapshot::load(&path).unwrap();
    assert_eq!(loaded.len(), source.var_list().len());
    target.restore(&loaded).unwrap();
    assert_eq!(source.snapshot(), target.snapshot());

    // Same inputs, same outputs
    let external = frames(2, 4, 1, 1);
    let action_reward = one_hot_action_reward(2, 2);
    let feed = PolicyFeed::new(external.view(), action_reward.view(), 1);
    let a = source.forward(&feed, &mut StdRng::seed_from_u64(3)).unwrap();
    let b = target.forward(&feed, &mut StdRng::seed_from_u64(3)).unwrap();
    assert_eq!(a.logits, b.logits);
    assert_eq!(a.sample, b.sample);
}

#[test]
fn test_restore_rejects_foreign_snapshot() {
    let ob_space = ObservationSpace::new(vec![4, 1, 1]);
    let small = PolicyConfig::default()
        .with_lstm_layers(4, 4)
        .with_encoder(EncoderConfig::default().with_num_layers(1).with_num_filters(2));
    let wide = small.clone().with_lstm_layers(4, 8);

    let source = StackedLstmPolicy::new(ob_space.clone(), 2, small, &mut StdRng::seed_from_u64(1)).unwrap();
    let mut target = StackedLstmPolicy::new(ob_space, 2, wide, &mut StdRng::seed_from_u64(1)).unwrap();
    let untouched = target.snapshot();
    assert!(target.restore(&source.snapshot()).is_err());
    assert_eq!(target.snapshot(), untouched);
}

#[test]
fn test_config_file_drives_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");
    std::fs::write(
        &path,
        r#"{
            "lstm_layers": [8, 16],
            "lstm_class": "gru",
            "aux_estimate": true,
            "encoder": { "conv_2d_num_layers": 2, "conv_2d_num_filters": 4 }
        }"#,
    )
    .unwrap();

    let config = PolicyConfig::from_json_file(&path).unwrap();
    let policy = StackedLstmPolicy::new(ObservationSpace::new(vec![10, 10, 3]), 4, config, &mut StdRng::seed_from_u64(0))
        .unwrap();
    assert_eq!(policy.core().kinds(), (CellKind::Gru, CellKind::Gru));
    assert_eq!(policy.encoder().num_blocks(), 2);
    assert_eq!(policy.callbacks().len(), 1);
    assert_eq!(policy.state_placeholders().len(), 2);
}

#[test]
fn test_workers_hold_independent_copies() {
    let mut rng = StdRng::seed_from_u64(0);
    let config = PolicyConfig::default()
        .with_lstm_layers(4, 4)
        .with_encoder(EncoderConfig::default().with_num_layers(1).with_num_filters(2));
    let policy = StackedLstmPolicy::new(ObservationSpace::new(vec![4, 1, 1]), 2, config, &mut rng).unwrap();

    let handles: Vec<_> = (0..3)
        .map(|worker| {
            let local = policy.clone();
            std::thread::spawn(move || {
                let external = frames(4, 4, 1, 1);
                let action_reward = one_hot_action_reward(4, 2);
                let mut state = local.zero_state(1);
                let mut rng = StdRng::seed_from_u64(worker);
                for chunk in 0..2 {
                    let rows = s![chunk * 2..chunk * 2 + 2, .., .., ..];
                    let feed = PolicyFeed::new(external.slice(rows).into_dyn(), action_reward.slice(s![chunk * 2..chunk * 2 + 2, ..]), 1)
                        .with_state(&state);
                    let out = local.forward(&feed, &mut rng).unwrap();
                    state = out.state_out;
                }
                state.flatten()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
}
