//! Builtin components every entity carries.
//!
//! [`MetaData`] and [`Transform`] are attached by
//! [`World::spawn_entity`](crate::ecs::World::spawn_entity) and leave only
//! with the entity itself.

use crate::ecs::{Component, Entity};
use crate::time::SimulationTick;
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Where an entity is in its own lifecycle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityLifeStage {
    #[default]
    PreInit,
    Initializing,
    Initialized,
    Terminating,
    Deleted,
}

/// Per-entity bookkeeping. Index [`CompIdx::METADATA`](crate::ecs::CompIdx::METADATA).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    pub name: String,
    pub entity_stage: EntityLifeStage,
    /// Paused entities are skipped by queries unless explicitly included.
    pub paused: bool,
    /// Last tick any networked component on this entity was marked dirty.
    pub last_modified: SimulationTick,
}

impl MetaData {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True once the entity has finished initializing, including while it is
    /// being torn down.
    pub fn is_initialized(&self) -> bool {
        matches!(
            self.entity_stage,
            EntityLifeStage::Initialized | EntityLifeStage::Terminating
        )
    }
}

impl Component for MetaData {}

/// Local placement. Index [`CompIdx::TRANSFORM`](crate::ecs::CompIdx::TRANSFORM).
///
/// Parent links are stored but never resolved here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub local_position: Vec2,
    pub local_rotation: f32,
    pub parent: Option<Entity>,
}

impl Transform {
    pub fn at(position: Vec2) -> Self {
        Self {
            local_position: position,
            ..Default::default()
        }
    }
}

impl Component for Transform {}
