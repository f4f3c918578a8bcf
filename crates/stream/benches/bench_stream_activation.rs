use std::hint::black_box;
use std::time::Instant;

use glam::Vec3;
use levelflow_kernel::{Actor, ActorKind, PackageContent, World};
use levelflow_stream::{
    BodyRegistry, CatalogLoader, DistancePolicy, LevelDescriptor, LevelStreamingScheduler, NullNotifier,
    ReferenceSweeper, StreamConfig, StreamingHost, TickBudget,
};

fn make_level(name: &str, actor_count: usize) -> PackageContent {
    let mut actors = Vec::with_capacity(actor_count);
    for i in 0..actor_count {
        let pos = Vec3::new((i % 32) as f32, 0.0, (i / 32) as f32);
        if i % 3 == 0 {
            actors.push(Actor::static_mesh(format!("{name}_mesh{i}"), pos));
        } else {
            actors.push(Actor::new(format!("{name}_actor{i}"), ActorKind::Generic).with_position(pos));
        }
    }
    PackageContent::level(name, actors)
}

fn make_scheduler(level_count: usize, actor_count: usize, spacing: f32) -> (LevelStreamingScheduler, CatalogLoader) {
    let mut loader = CatalogLoader::new().with_latency(1);
    let mut scheduler = LevelStreamingScheduler::new(StreamConfig::default());
    for i in 0..level_count {
        let name = format!("Cell{i}");
        loader.insert(make_level(&name, actor_count));
        let policy = DistancePolicy {
            origin: Vec3::new(i as f32 * spacing, 0.0, 0.0),
            max_distance: spacing,
        };
        // Names are unique, so registration cannot fail.
        let _ = scheduler.add_descriptor(LevelDescriptor::new(name, Box::new(policy)));
    }
    (scheduler, loader)
}

fn bench_activation(actor_count: usize, budget: TickBudget) {
    let (mut scheduler, mut loader) = make_scheduler(1, actor_count, 100.0);
    let mut physics = BodyRegistry::new();
    let mut net = NullNotifier;
    let mut world = World::new("Bench");
    world.begin_play();

    let start = Instant::now();
    let mut ticks = 0;
    while scheduler.descriptors().iter().any(|d| !d.is_visible()) && ticks < 100_000 {
        loader.poll();
        let mut host = StreamingHost::new(&mut loader, &mut physics, &mut net);
        black_box(scheduler.tick(&mut world, &mut host, &[Vec3::ZERO], budget));
        ticks += 1;
    }
    let elapsed = start.elapsed();
    println!(
        "  activate ({actor_count} actors, {budget:?}): {ticks} ticks, max tick {:?}, total {elapsed:?}",
        scheduler.timer().max()
    );
}

fn bench_walk(level_count: usize, actor_count: usize, iterations: usize) {
    let spacing = 100.0;
    let (mut scheduler, mut loader) = make_scheduler(level_count, actor_count, spacing);
    let mut physics = BodyRegistry::new();
    let mut net = NullNotifier;
    let mut world = World::new("Bench");
    world.begin_play();

    let start = Instant::now();
    for i in 0..iterations {
        // Viewer walks back and forth across the row of cells.
        let lap = (level_count as f32) * spacing;
        let t = (i as f32 * 5.0) % (2.0 * lap);
        let x = if t < lap { t } else { 2.0 * lap - t };
        loader.poll();
        let mut host = StreamingHost::new(&mut loader, &mut physics, &mut net);
        black_box(scheduler.tick(&mut world, &mut host, &[Vec3::new(x, 0.0, 0.0)], TickBudget::millis(5)));
        if scheduler.gc_requested() {
            scheduler.collect_garbage(&mut world, &mut ReferenceSweeper, &mut net);
        }
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  walk ({level_count} cells x {actor_count} actors, {iterations} ticks): {per_iter:?}/tick, avg {:?}, max {:?}",
        scheduler.timer().average(),
        scheduler.timer().max()
    );
}

fn main() {
    println!("=== levelflow-stream benchmarks ===\n");

    println!("[activation]");
    bench_activation(1_000, TickBudget::steps(1));
    bench_activation(10_000, TickBudget::millis(2));
    bench_activation(10_000, TickBudget::Unbounded);

    println!("\n[walk]");
    bench_walk(16, 500, 2_000);
    bench_walk(64, 200, 2_000);

    println!("\nDone.");
}
