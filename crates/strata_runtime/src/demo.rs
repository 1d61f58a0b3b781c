//! Demo simulation: moving bodies that expire after a number of ticks.

use crate::settings::SimulationSettings;
use glam::Vec2;
use std::sync::Arc;
use strata_core::ecs::{
    Component, ComponentDescriptor, ComponentEvent, ComponentRegistry, Entity, EventFilter,
    LifecycleContext, RegistrationError, StoreError, SubscriptionId, Transform, World,
};
use tracing::{debug, trace};

/// Network id of [`RigidBody`].
pub const RIGID_BODY_NET_ID: u16 = 1;

/// Linear motion, replicated.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RigidBody {
    pub velocity: Vec2,
}

/// Ticks left before the owning entity is deleted.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Lifetime {
    pub remaining: u32,
}

/// Constant rotation in radians per second.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Spinner {
    pub rate: f32,
}

impl Component for RigidBody {
    fn startup(&mut self, ctx: &LifecycleContext) -> anyhow::Result<()> {
        trace!(entity = %ctx.entity, velocity = ?self.velocity, "body online");
        Ok(())
    }
}

impl Component for Lifetime {
    fn shutdown(&mut self, ctx: &LifecycleContext) -> anyhow::Result<()> {
        debug!(entity = %ctx.entity, tick = %ctx.tick, "lifetime expired");
        Ok(())
    }
}

strata_core::define_component!(Spinner);

pub fn build_registry() -> Result<Arc<ComponentRegistry>, RegistrationError> {
    let mut builder = ComponentRegistry::builder();
    builder.register(
        ComponentDescriptor::of::<RigidBody>("RigidBody")
            .physics_body()
            .net_id(RIGID_BODY_NET_ID),
    )?;
    builder.register_type::<Lifetime>()?;
    builder.register_type::<Spinner>()?;
    Ok(builder.build())
}

/// Spawn `settings.entities` running bodies laid out on a grid.
pub fn populate(world: &mut World, settings: &SimulationSettings) -> Result<Vec<Entity>, StoreError> {
    let mut spawned = Vec::with_capacity(settings.entities);
    for i in 0..settings.entities {
        let entity = world.spawn_entity(format!("body-{i}"))?;
        let column = (i % 8) as f32;
        let row = (i / 8) as f32;
        world.get_mut::<Transform>(entity)?.local_position = Vec2::new(column, row) * 4.0;

        world.add(
            entity,
            RigidBody {
                velocity: Vec2::new(1.0, 0.5) * (1.0 + column),
            },
            false,
        )?;
        world.add(
            entity,
            Lifetime {
                remaining: settings.lifetime_ticks + (i as u32 % 16) * 4,
            },
            false,
        )?;
        if i % 3 == 0 {
            world.add(entity, Spinner { rate: 0.5 + row }, false)?;
        }

        world.initialize_entity(entity)?;
        world.start_entity(entity)?;
        spawned.push(entity);
    }
    Ok(spawned)
}

/// Integrate velocities and flag the moved bodies for replication.
pub fn movement_system(world: &World, dt: f32) -> Result<usize, StoreError> {
    let mut moved = Vec::new();
    for (entity, (mut transform, body)) in world.query_mut::<(Transform, RigidBody)>()? {
        transform.local_position += body.velocity * dt;
        moved.push(entity);
    }

    for entity in &moved {
        if let Some(id) = world.component_id::<RigidBody>(*entity) {
            world.mark_dirty(id)?;
        }
    }
    Ok(moved.len())
}

pub fn spin_system(world: &World, dt: f32) -> Result<usize, StoreError> {
    let mut spun = 0;
    for (_, (mut transform, spinner)) in world.query_mut::<(Transform, Spinner)>()? {
        let angle = transform.local_rotation + spinner.rate * dt;
        transform.local_rotation = angle % std::f32::consts::TAU;
        spun += 1;
    }
    Ok(spun)
}

/// Age every lifetime by one tick; expired ones are queued for removal.
///
/// Returns the entities whose lifetime ran out this tick.
pub fn expiry_system(world: &World) -> Result<Vec<Entity>, StoreError> {
    let mut expired = Vec::new();
    for (entity, mut lifetime) in world.query_mut::<(Lifetime,)>()? {
        lifetime.remaining = lifetime.remaining.saturating_sub(1);
        if lifetime.remaining == 0 && world.remove_deferred::<Lifetime>(entity)? {
            expired.push(entity);
        }
    }
    Ok(expired)
}

/// Pause one residue class of entities per tick and resume the rest.
pub fn pause_system(world: &World, tick: u64, every: usize) -> Result<usize, StoreError> {
    if every == 0 {
        return Ok(0);
    }
    let entities: Vec<Entity> = world.entities().collect();
    let phase = (tick % every as u64) as u32;
    let mut paused = 0;
    for entity in entities {
        let pause = entity.index() % every as u32 == phase;
        world.set_paused(entity, pause)?;
        paused += usize::from(pause);
    }
    Ok(paused)
}

/// Log every lifecycle event at `trace!`.
pub fn log_events(world: &World) -> SubscriptionId {
    world.subscribe(EventFilter::ALL, |world: &World, event: &ComponentEvent| {
        trace!(
            kind = ?event.kind,
            entity = %event.entity,
            component = world.registry().name_of(event.index),
            "component event"
        );
    })
}
