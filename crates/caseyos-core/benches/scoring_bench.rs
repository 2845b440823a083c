//! APS scoring benchmarks.

use caseyos_core::scoring::{breakdown, compute_aps, ActionKind, ScoreInputs};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn inputs() -> ScoreInputs {
    ScoreInputs {
        deal_amount: Some(12_500.0),
        deal_ceiling: 50_000.0,
        icp_score: Some(0.8),
        hours_since_signal: 7.25,
        urgency_tau_hours: 48.0,
        overdue: false,
        action_kind: ActionKind::SendEmail,
        in_target_segment: true,
        strategic_account: false,
        high_intent_source: true,
    }
}

fn bench_compute_aps(c: &mut Criterion) {
    let inputs = inputs();
    c.bench_function("compute_aps", |b| {
        b.iter(|| compute_aps(black_box(&inputs)));
    });
}

fn bench_breakdown(c: &mut Criterion) {
    let inputs = inputs();
    c.bench_function("score_breakdown", |b| {
        b.iter(|| breakdown(black_box(&inputs)));
    });
}

criterion_group!(benches, bench_compute_aps, bench_breakdown);
criterion_main!(benches);
