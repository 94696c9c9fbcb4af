//! Entity churn demo -- random spawns with finite lifetimes, driven by a
//! seeded RNG so every run with the same seed prints the same checksum.
//!
//! Run with:
//!   cargo run --example churn -p cairn-engine -- [ticks] [seed]
//!
//! Set `RUST_LOG=debug` to watch the lifecycle drains.

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tracing::info;

use cairn_engine::prelude::*;

// ---------------------------------------------------------------------------
// Components and systems
// ---------------------------------------------------------------------------

/// Ticks left before the entity expires.
#[derive(Debug, Default)]
struct Lifetime(u32);

impl Component for Lifetime {
    fn initialize(&mut self, _entity: Handle) -> bool {
        // Spawned without a lifetime: refuse to exist.
        self.0 > 0
    }
}

fn expire(world: &mut World) {
    let mut expired = Vec::new();
    for (e, lifetime) in world.pool::<Lifetime>().iter_mut() {
        lifetime.0 = lifetime.0.saturating_sub(1);
        if lifetime.0 == 0 {
            expired.push(e);
        }
    }
    for e in expired {
        world.destroy_entity(e);
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let ticks: u64 = match args.next() {
        Some(raw) => raw.parse().context("ticks must be a non-negative integer")?,
        None => 600,
    };
    let seed: u64 = match args.next() {
        Some(raw) => raw.parse().context("seed must be a non-negative integer")?,
        None => 7,
    };

    let config = TickConfig::from_json_str(r#"{"fixed_dt": 0.016666666666666666, "world": {"cache_size": 64}}"#)
        .context("demo configuration is invalid")?;
    let mut tick_loop = TickLoop::from_config(config).context("failed to build tick loop")?;
    tick_loop.add_system("expire", expire);

    let mut rng = Pcg64::seed_from_u64(seed);
    let mut totals = DrainReport::default();

    for _ in 0..ticks {
        let world = tick_loop.world_mut();
        for _ in 0..rng.gen_range(0..8) {
            let e = world.create_entity().context("handle space exhausted")?;
            // One in ten spawns gets no lifetime and is vetoed on creation.
            let lifetime = if rng.gen_bool(0.1) { 0 } else { rng.gen_range(1..120) };
            if let Some(component) = world.create::<Lifetime>(e) {
                component.0 = lifetime;
            }
        }

        let report = tick_loop.tick();
        totals.batches += report.batches;
        totals.created += report.created;
        totals.vetoed += report.vetoed;
        totals.destroyed += report.destroyed;
        totals.skipped += report.skipped;
    }

    let world = tick_loop.world();
    let snapshot = world.capture_entities();
    info!(
        ticks,
        seed,
        live = world.entity_count(),
        slots = world.entities().handles().total_slots(),
        created = totals.created,
        vetoed = totals.vetoed,
        destroyed = totals.destroyed,
        "churn finished"
    );
    println!("live entities: {}", snapshot.len());
    println!("snapshot checksum: {}", snapshot.checksum);

    let mut world = tick_loop.into_world();
    world.destroy_all_entities();
    info!(live = world.entity_count(), "world cleared");
    Ok(())
}
