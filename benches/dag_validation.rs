//! Benchmark: DAG Validation
//!
//! Measures StepGraph construction and cycle detection performance.
//! Run: cargo bench --bench dag_validation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use autopr::{StepGraph, WorkflowSpec};

/// Generate a diamond DAG: source -> (middle_0..middle_n) -> sink
fn generate_diamond_yaml(width: usize) -> String {
    let mut yaml = String::from(
        r#"name: diamond
version: 1
triggers: [{on: pr_opened}]
steps:
  - id: source
    action: vcs.fetch_pr
"#,
    );
    for i in 0..width {
        yaml.push_str(&format!(
            r#"  - id: middle_{i}
    action: review.analyze
    with:
      files: ${{{{ steps.source.outputs.files }}}}
"#
        ));
    }
    yaml.push_str(
        r#"  - id: sink
    action: chat.post
    with:
"#,
    );
    for i in 0..width {
        yaml.push_str(&format!(
            "      arm_{i}: ${{{{ steps.middle_{i}.outputs.finding_count }}}}\n"
        ));
    }
    yaml.push_str("      text: done\n");
    yaml
}

fn bench_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_graph_build");
    for width in [4usize, 16, 64] {
        let spec = WorkflowSpec::from_yaml(&generate_diamond_yaml(width)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(width), &spec, |b, spec| {
            b.iter(|| StepGraph::from_spec(black_box(spec)));
        });
    }
    group.finish();
}

fn bench_cycle_detection(c: &mut Criterion) {
    let spec = WorkflowSpec::from_yaml(&generate_diamond_yaml(64)).unwrap();
    let graph = StepGraph::from_spec(&spec);
    c.bench_function("cycle_detection_64", |b| {
        b.iter(|| black_box(&graph).detect_cycles().unwrap());
    });
}

criterion_group!(benches, bench_graph_build, bench_cycle_detection);
criterion_main!(benches);
