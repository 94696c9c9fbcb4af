//! Integration tests: systems, lifecycle events and snapshots across ticks.

use cairn_engine::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Default)]
struct Age(u64);

impl Component for Age {}

#[derive(Debug, Default)]
struct Quarantined;

impl Component for Quarantined {}

const POPULATION_CAP: usize = 6;

fn spawn(world: &mut World) {
    let e = world.create_entity().unwrap();
    world.create::<Age>(e);
    // Every third slot index is quarantined and gets vetoed on creation.
    if e.index() % 3 == 0 {
        world.create::<Quarantined>(e);
    }
}

fn age(world: &mut World) {
    for (_, age) in world.pool::<Age>().iter_mut() {
        age.0 += 1;
    }
}

fn cull(world: &mut World) {
    if world.entity_count() <= POPULATION_CAP {
        return;
    }
    let oldest = world
        .get_pool::<Age>()
        .and_then(|pool| pool.iter().max_by_key(|(e, age)| (age.0, std::cmp::Reverse(*e))))
        .map(|(e, _)| e);
    if let Some(e) = oldest {
        world.destroy_entity(e);
    }
}

fn build_loop() -> TickLoop {
    let mut world = World::new();
    world.subscribe_entity_create(
        |world: &mut World, e: Handle| world.lookup::<Quarantined>(e).is_none(),
        Priority::Front,
    );
    let mut tick_loop = TickLoop::new(world, TickConfig::default());
    tick_loop.add_system("spawn", spawn);
    tick_loop.add_system("age", age);
    tick_loop.add_system("cull", cull);
    tick_loop
}

#[test]
fn identical_runs_produce_identical_snapshots() {
    let mut a = build_loop();
    let mut b = build_loop();
    a.run_ticks(200);
    b.run_ticks(200);

    let snap_a = a.world().capture_entities();
    let snap_b = b.world().capture_entities();
    assert_eq!(snap_a, snap_b);
    assert!(!snap_a.is_empty());
}

#[test]
fn quarantined_entities_never_survive_a_tick() {
    let mut tick_loop = build_loop();
    let mut vetoed = 0;
    for _ in 0..60 {
        vetoed += tick_loop.tick().vetoed;
        let world = tick_loop.world();
        if let Some(pool) = world.get_pool::<Quarantined>() {
            assert!(pool.is_empty());
        }
        assert!(world.entity_count() <= POPULATION_CAP + 1);
    }
    assert!(vetoed > 0);
}

#[test]
fn snapshot_restores_into_a_fresh_loop() {
    let mut source = build_loop();
    source.run_ticks(50);
    let json = source.world().capture_entities().to_json().unwrap();

    let snapshot = EntitySnapshot::from_json(&json).unwrap();
    let mut target = TickLoop::new(World::new(), TickConfig::default());
    let restored = target.world_mut().restore_entities(&snapshot).unwrap();
    let report = target.tick();

    assert_eq!(report.created, restored.len());
    for e in snapshot.handles() {
        assert!(target.world().is_entity_created(e));
    }
}

#[test]
fn destroy_all_after_run_leaves_empty_world() {
    let mut tick_loop = build_loop();
    tick_loop.run_ticks(30);
    let mut world = tick_loop.into_world();
    world.destroy_all_entities();
    assert_eq!(world.entity_count(), 0);
    assert!(world.get_pool::<Age>().unwrap().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn population_stays_bounded(ticks in 1..400u64) {
        let mut tick_loop = build_loop();
        tick_loop.run_ticks(ticks);
        let world = tick_loop.world();
        prop_assert!(world.entity_count() <= POPULATION_CAP + 1);
        prop_assert_eq!(world.entities().pending_command_count(), 0);
        prop_assert_eq!(
            world.get_pool::<Age>().map_or(0, |pool| pool.len()),
            world.entity_count()
        );
    }
}
