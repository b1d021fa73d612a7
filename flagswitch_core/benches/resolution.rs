use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use flagswitch_core::{
    environment::Environment,
    eval::{boolean_value, string_value},
    EvaluationContext, RuleDocument,
};

fn criterion_benchmark(c: &mut Criterion) {
    let bytes = std::fs::read("../test-data/flagsmith/environment.json").unwrap();
    let environment = Environment::from_slice(&bytes).unwrap();

    {
        let mut group = c.benchmark_group("new-badge");
        group.throughput(Throughput::Elements(1));
        let matching = EvaluationContext::for_user("pradyun");
        let other = EvaluationContext::for_user("alice");
        group.bench_function("resolve_segment_match", |b| {
            b.iter(|| environment.resolve_state(black_box("new-badge"), black_box(&matching)))
        });
        group.bench_function("resolve_default", |b| {
            b.iter(|| environment.resolve_state(black_box("new-badge"), black_box(&other)))
        });
        group.bench_function("boolean_value", |b| {
            b.iter(|| {
                boolean_value(
                    environment.resolve_state(black_box("new-badge"), black_box(&matching)),
                    black_box(false),
                )
            })
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("cta-color");
        group.throughput(Throughput::Elements(1));
        let context = EvaluationContext::for_user("subject1");
        group.bench_function("string_value", |b| {
            b.iter(|| {
                string_value(
                    environment.resolve_state(black_box("cta-color"), black_box(&context)),
                    black_box("blue"),
                )
            })
        });
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
