//! World tick benchmarks.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bomber::core::rng::DeterministicRng;
use bomber::game::grid::{Grid, MapLoadOptions};
use bomber::{Direction, GameConfig, World};

const MAP: &str = include_str!("../maps/simple.map");

fn full_world() -> World {
    let mut rng = DeterministicRng::new(7);
    let grid = Grid::parse(MAP, MapLoadOptions::randomized(&mut rng, 0.6)).expect("bundled map parses");
    let mut world = World::new(grid, GameConfig::default());
    for i in 0..8 {
        world.register(&format!("bot{i}")).expect("free spawn");
    }
    world
}

fn bench_idle_tick(c: &mut Criterion) {
    let mut world = full_world();
    c.bench_function("tick_idle_8_players", |b| {
        b.iter(|| black_box(world.update(Duration::from_millis(33))))
    });
}

fn bench_busy_tick(c: &mut Criterion) {
    c.bench_function("tick_busy_8_players", |b| {
        let mut world = full_world();
        let mut rng = StdRng::seed_from_u64(42);
        let slots: Vec<String> = world.players().map(|p| p.slot.clone()).collect();
        b.iter(|| {
            for slot in &slots {
                let direction = Direction::ALL[rng.gen_range(0..4)];
                world.set_motion(slot, direction, rng.gen_range(1.0..3.0));
                if rng.gen_bool(0.05) {
                    world.place_bomb(slot, Some(Duration::from_millis(500)));
                }
            }
            black_box(world.update(Duration::from_millis(33)))
        })
    });
}

criterion_group!(benches, bench_idle_tick, bench_busy_tick);
criterion_main!(benches);
