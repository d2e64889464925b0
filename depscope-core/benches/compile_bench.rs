// Benchmark dependency compilation and the queries built on it at varying corpus sizes.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use depscope_core::analysis::{cumulative_dependencies, version_conflicts};
use depscope_core::compile::{compile, rank_map};
use depscope_core::store::NodeStore;
use depscope_core::types::{LatestVersion, NodeRecord};

const PACKAGES: &[&str] = &[
    "numpy", "torch", "torchvision", "pillow", "opencv-python", "einops", "transformers",
    "diffusers", "scipy", "safetensors", "accelerate", "huggingface-hub", "onnxruntime",
    "requests", "tqdm", "kornia", "timm", "matplotlib", "scikit-image", "omegaconf",
];

const CONSTRAINTS: &[&str] = &["", ">=1.0", "==1.24.0", "==1.26.4", "~=2.1", "[extras]>=0.3"];

/// Synthetic corpus where node `i` declares `deps_per_node` packages chosen by
/// a fixed stride, with a sprinkling of git, pip and commented lines.
fn build_store(node_count: usize, deps_per_node: usize) -> NodeStore {
    NodeStore::from_records((0..node_count).map(|i| {
        let mut deps: Vec<String> = (0..deps_per_node)
            .map(|j| {
                let pkg = PACKAGES[(i * 7 + j * 3) % PACKAGES.len()];
                let constraint = CONSTRAINTS[(i + j) % CONSTRAINTS.len()];
                format!("{pkg}{constraint}")
            })
            .collect();
        match i % 10 {
            0 => deps.push(format!("git+https://github.com/org/pkg-{i}.git")),
            1 => deps.push("--extra-index-url https://download.pytorch.org/whl/cu121".into()),
            2 => deps.push("# xformers".into()),
            _ => {}
        }
        let mut record = NodeRecord::new(format!("node-{i}"));
        record.downloads = ((i * 7919) % 100_000) as u64;
        record.latest_version = Some(LatestVersion {
            version: "1.0.0".into(),
            created_at: None,
            raw_dependencies: deps,
        });
        record
    }))
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for node_count in [500, 5_000, 20_000] {
        let store = build_store(node_count, 8);
        group.bench_with_input(BenchmarkId::new("nodes", node_count), &store, |b, s| {
            b.iter(|| compile(s));
        });
    }

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("queries");
    let store = build_store(5_000, 8);
    let agg = compile(&store);

    group.bench_function("rank_map", |b| b.iter(|| rank_map(&store)));
    group.bench_function("version_conflicts", |b| b.iter(|| version_conflicts(&agg)));

    let ranks = rank_map(&store);
    group.bench_function("cumulative", |b| {
        b.iter(|| cumulative_dependencies(&store, &ranks));
    });

    group.finish();
}

criterion_group!(benches, bench_compile, bench_queries);
criterion_main!(benches);
