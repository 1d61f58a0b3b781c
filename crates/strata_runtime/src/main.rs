//! Strata Runtime
//!
//! Demo host: builds a world, runs the movement and expiry systems for a
//! fixed number of ticks, then tears everything down.

mod demo;
mod settings;

use anyhow::Result;
use std::path::PathBuf;
use strata_core::ecs::World;
use strata_metrics::TickProfiler;
use tracing::{debug, info};

use settings::Settings;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Strata v{}", strata_core::VERSION);
    let path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load(path.as_deref())?;
    let sim = &settings.simulation;

    let mut world = World::with_config(demo::build_registry()?, settings.world.clone());
    demo::log_events(&world);
    let spawned = demo::populate(&mut world, sim)?;
    info!(entities = spawned.len(), ticks = sim.ticks, "world populated");

    let mut profiler = TickProfiler::new();
    for _ in 0..sim.ticks {
        let tick = world.advance_tick();

        profiler.time_phase("pause", || demo::pause_system(&world, tick.raw(), sim.pause_every))?;
        profiler.time_phase("movement", || demo::movement_system(&world, sim.tick_seconds))?;
        profiler.time_phase("spin", || demo::spin_system(&world, sim.tick_seconds))?;
        let expired = profiler.time_phase("expiry", || demo::expiry_system(&world))?;
        let culled = profiler.time_phase("cull", || world.cull());

        for entity in &expired {
            world.delete_entity(*entity)?;
        }
        let dirty = world.take_dirty_entities();
        debug!(
            tick = %tick,
            expired = expired.len(),
            culled,
            dirty = dirty.len(),
            "tick complete"
        );
        profiler.end_tick();
    }

    info!(
        survivors = world.entity_count(),
        components = world.component_count(),
        "simulation finished"
    );

    let survivors: Vec<_> = world.entities().collect();
    for entity in survivors {
        world.delete_entity(entity)?;
    }
    world.cull();

    for (kind, count) in world.counters().iter() {
        info!(counter = kind.name(), count, "lifecycle counter");
    }
    for (phase, total) in profiler.iter() {
        info!(
            phase,
            average = ?profiler.average(phase),
            total = ?total,
            "tick phase"
        );
    }

    info!("Runtime shut down cleanly");
    Ok(())
}
