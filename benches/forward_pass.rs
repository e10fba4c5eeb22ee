use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use rand::SeedableRng;

use navstack::{CellKind, ObservationSpace, PolicyConfig, PolicyFeed, StackedLstmPolicy};

fn make_policy(kind: CellKind) -> StackedLstmPolicy {
    let config = PolicyConfig::default().with_lstm_class(kind);
    let ob_space = ObservationSpace::new(vec![32, 1, 5]).with_internal(vec![6]);
    let mut rng = StdRng::seed_from_u64(0);
    StackedLstmPolicy::new(ob_space, 4, config, &mut rng).unwrap()
}

fn bench_forward(c: &mut Criterion) {
    // 4 sequences of 20 steps
    let rows = 80;
    let external = Array4::from_shape_fn((rows, 32, 1, 5), |(n, h, _, ch)| ((n + h * ch) as f32 * 0.01).sin()).into_dyn();
    let internal = Array2::<f32>::from_elem((rows, 6), 0.5).into_dyn();
    let action_reward = Array2::<f32>::zeros((rows, 5));

    for (label, kind) in [("basic_lstm", CellKind::BasicLstm), ("gru", CellKind::Gru)] {
        let policy = make_policy(kind);
        let mut rng = StdRng::seed_from_u64(1);
        c.bench_function(&format!("forward_{}_4x20", label), |b| {
            b.iter(|| {
                let feed = PolicyFeed::new(external.view(), action_reward.view(), 4).with_internal(internal.view());
                black_box(policy.forward(black_box(&feed), &mut rng).unwrap())
            })
        });
    }
}

fn bench_single_step(c: &mut Criterion) {
    let policy = make_policy(CellKind::BasicLstm);
    let external = Array4::<f32>::zeros((1, 32, 1, 5)).into_dyn();
    let internal = Array2::<f32>::zeros((1, 6)).into_dyn();
    let action_reward = Array2::<f32>::zeros((1, 5));
    let state = policy.zero_state(1);
    let mut rng = StdRng::seed_from_u64(2);

    c.bench_function("forward_single_step", |b| {
        b.iter(|| {
            let feed = PolicyFeed::new(external.view(), action_reward.view(), 1)
                .with_internal(internal.view())
                .with_state(&state);
            black_box(policy.forward(&feed, &mut rng).unwrap())
        })
    });
}

criterion_group!(benches, bench_forward, bench_single_step);
criterion_main!(benches);
