//! Benchmark: Workflow Parsing
//!
//! Measures YAML parse + structural validation throughput.
//! Run: cargo bench --bench workflow_parsing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use autopr::WorkflowSpec;

/// Generate a linear workflow (each step references its predecessor)
fn generate_linear_yaml(size: usize) -> String {
    let mut yaml = String::from(
        r#"name: bench
version: 1
triggers: [{on: pr_opened}]
steps:
  - id: step_0
    action: vcs.fetch_pr
"#,
    );
    for i in 1..size {
        yaml.push_str(&format!(
            r#"  - id: step_{i}
    action: review.analyze
    with:
      files: ${{{{ steps.step_{prev}.outputs.files }}}}
"#,
            i = i,
            prev = i - 1
        ));
    }
    yaml
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("workflow_parse");
    for size in [2usize, 10, 50] {
        let yaml = generate_linear_yaml(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &yaml, |b, yaml| {
            b.iter(|| WorkflowSpec::from_yaml(black_box(yaml)).unwrap());
        });
    }
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let spec = WorkflowSpec::from_yaml(&generate_linear_yaml(10)).unwrap();
    c.bench_function("workflow_roundtrip", |b| {
        b.iter(|| {
            let yaml = spec.to_yaml().unwrap();
            WorkflowSpec::from_yaml(black_box(&yaml)).unwrap()
        });
    });
}

criterion_group!(benches, bench_parse, bench_roundtrip);
criterion_main!(benches);
