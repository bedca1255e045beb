//! Criterion benchmarks for settling and maintenance.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use engram::config::{LayerSpec, ModelConfig, SimParams, Topology};
use engram::network::ExecutionTier;
use engram::Simulation;

/// The four-layer hub topology with `side`x`side` layers.
fn make_sim(side: u32, tier: ExecutionTier) -> Simulation {
    let layers = ["HPC", "ACC", "SC0", "SC1"]
        .iter()
        .map(|id| {
            let kind = if *id == "HPC" { "hpc" } else { "nc" };
            LayerSpec::new(*id, kind, side, side, 0.25)
        })
        .collect();
    let topology = Topology::new(layers)
        .with_bi_tract("HPC", "ACC", "hpc")
        .with_bi_tract("HPC", "SC0", "hpc")
        .with_bi_tract("HPC", "SC1", "hpc")
        .with_bi_tract("ACC", "SC0", "nc")
        .with_bi_tract("ACC", "SC1", "nc");
    let config = ModelConfig::with_topology(topology).with_sim(SimParams::default().with_seed(42));

    let mut sim = Simulation::new(config).expect("valid bench config");
    sim.set_execution_tier(tier);
    sim.present_pattern("CS-US").expect("fresh pattern");
    sim.train().expect("training");
    sim
}

fn units(side: u32) -> u64 {
    4 * (side as u64) * (side as u64)
}

/// Benchmark settle() with varying layer sizes.
fn bench_settle_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("settle_size");

    for side in [4_u32, 8, 16].iter() {
        group.throughput(Throughput::Elements(units(*side)));

        group.bench_with_input(BenchmarkId::new("scalar", side), side, |b, &side| {
            let mut sim = make_sim(side, ExecutionTier::Scalar);
            b.iter(|| {
                sim.settle().expect("settle");
                black_box(sim.network().num_active(0))
            });
        });
    }

    group.finish();
}

/// Benchmark settle() comparing execution tiers at a fixed size.
fn bench_settle_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("settle_tier");
    let side = 16;
    group.throughput(Throughput::Elements(units(side)));

    group.bench_function("scalar_16", |b| {
        let mut sim = make_sim(side, ExecutionTier::Scalar);
        b.iter(|| {
            sim.settle().expect("settle");
            black_box(sim.network().num_active(0))
        });
    });

    #[cfg(feature = "parallel")]
    group.bench_function("parallel_16", |b| {
        let mut sim = make_sim(side, ExecutionTier::Parallel);
        b.iter(|| {
            sim.settle().expect("settle");
            black_box(sim.network().num_active(0))
        });
    });

    group.finish();
}

/// One timestep of receptor trafficking and depotentiation.
fn bench_maintain(c: &mut Criterion) {
    let mut group = c.benchmark_group("maintain");

    for side in [4_u32, 8, 16].iter() {
        let mut sim = make_sim(*side, ExecutionTier::Scalar);
        let connections = sim.network().connections().len() as u64;
        group.throughput(Throughput::Elements(connections));

        group.bench_with_input(BenchmarkId::new("scalar", side), side, |b, _| {
            b.iter(|| {
                sim.maintain().expect("maintain");
                black_box(sim.network().num_potentiated(0))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_settle_sizes, bench_settle_tiers, bench_maintain);
criterion_main!(benches);
