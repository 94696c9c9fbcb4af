//! Allocator churn and lifecycle drain benchmarks.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use cairn_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Position {
    x: f64,
    y: f64,
}

impl Component for Position {}

#[derive(Debug, Default)]
struct Health(u32);

impl Component for Health {
    fn initialize(&mut self, _entity: Handle) -> bool {
        self.0 = 100;
        true
    }
}

// ---------------------------------------------------------------------------
// Benchmark 1: raw allocator churn
// ---------------------------------------------------------------------------

fn bench_allocator_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_churn");
    for &live in &[100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, &live| {
            let mut rng = Pcg64::seed_from_u64(0x5eed);
            let mut allocator = HandleAllocator::<u64>::new();
            let mut handles: Vec<Handle> = (0..live)
                .map(|_| allocator.create_handle(None).expect("fresh allocator has room"))
                .collect();

            b.iter(|| {
                let victim = rng.gen_range(0..handles.len());
                allocator.destroy_handle(handles[victim]);
                handles[victim] = allocator
                    .create_handle(None)
                    .expect("a slot was just freed");
                black_box(allocator.lookup(handles[victim]).ok());
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 2: create + drain throughput with components
// ---------------------------------------------------------------------------

fn bench_drain_with_components(c: &mut Criterion) {
    c.bench_function("drain_1k_creates_two_components", |b| {
        b.iter(|| {
            let mut world = World::new();
            for i in 0..1_000 {
                let e = world.create_entity().expect("allocator has room");
                world.create::<Position>(e).expect("entity is valid").x = i as f64;
                world.create::<Health>(e);
            }
            black_box(world.process_commands());
        });
    });
}

// ---------------------------------------------------------------------------
// Benchmark 3: steady-state churn through the world
// ---------------------------------------------------------------------------

fn bench_world_churn(c: &mut Criterion) {
    let mut rng = Pcg64::seed_from_u64(42);
    let mut world = World::new();
    let mut live: Vec<Handle> = (0..1_000)
        .map(|_| world.create_entity().expect("allocator has room"))
        .collect();
    world.process_commands();

    c.bench_function("world_churn_10pct_per_tick", |b| {
        b.iter(|| {
            for _ in 0..100 {
                let victim = rng.gen_range(0..live.len());
                world.destroy_entity(live[victim]);
                let replacement = world.create_entity().expect("allocator has room");
                world.create::<Position>(replacement);
                live[victim] = replacement;
            }
            black_box(world.process_commands());
        });
    });
}

// ---------------------------------------------------------------------------
// Criterion groups and main
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_allocator_churn,
    bench_drain_with_components,
    bench_world_churn,
);
criterion_main!(benches);
