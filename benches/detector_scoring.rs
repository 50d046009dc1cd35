//! Benchmark: Platform Detector Scoring
//!
//! Measures weighted-signature scoring over synthetic snapshots.
//! Run: cargo bench --bench detector_scoring

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use autopr::detect::{builtin_signatures, Detector, RepoSnapshot, SignatureSet};

fn synthetic_snapshot(file_count: usize) -> RepoSnapshot {
    RepoSnapshot {
        files: (0..file_count)
            .map(|i| format!("src/module_{}/file_{}.ts", i % 10, i))
            .chain([".replit".to_string(), "package.json".to_string()])
            .collect(),
        folders: (0..10).map(|i| format!("src/module_{}", i)).collect(),
        deps: vec![
            "@lovable/core".into(),
            "react".into(),
            "vite".into(),
            "typescript".into(),
        ],
        commit_messages: vec![
            "chore: lovable init".into(),
            "feat: add widget grid".into(),
            "fix: parser guard".into(),
        ],
        contents: vec![(
            "package.json".into(),
            r#"{"dependencies": {"@lovable/core": "^1"}}"#.into(),
        )],
    }
}

fn bench_detect(c: &mut Criterion) {
    let set = SignatureSet::compile(builtin_signatures()).unwrap();
    let detector = Detector::new();

    let mut group = c.benchmark_group("detector_score");
    for file_count in [100usize, 1000, 5000] {
        let snapshot = synthetic_snapshot(file_count);
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            &snapshot,
            |b, snapshot| {
                b.iter(|| detector.detect(black_box(&set), black_box(snapshot)));
            },
        );
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("signature_compile", |b| {
        b.iter(|| SignatureSet::compile(black_box(builtin_signatures())).unwrap());
    });
}

criterion_group!(benches, bench_detect, bench_compile);
criterion_main!(benches);
