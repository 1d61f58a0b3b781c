//! Entity handle with generational index
//!
//! Entities are lightweight handles (8 bytes). They own no storage of their
//! own; everything an entity "has" is a component attached to it in the
//! [`World`](crate::ecs::World). The generation counter prevents
//! use-after-free bugs when an index is recycled.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity handle (generation-indexed for safety)
///
/// Format: [32-bit index | 32-bit generation]
/// - Index: Position in the entity allocator (0 is reserved for [`Entity::INVALID`])
/// - Generation: Incremented on entity destruction (prevents use-after-free)
///
/// Example:
/// ```ignore
/// let entity = world.spawn_entity("crate")?;
/// world.delete_entity(entity)?;
/// // entity handle is now invalid (generation mismatch)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// Reserved sentinel. Never returned by the allocator.
    pub const INVALID: Entity = Entity {
        index: 0,
        generation: 0,
    };

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// False only for [`Entity::INVALID`]. Says nothing about whether the
    /// entity is still alive; ask the world for that.
    pub fn is_valid(&self) -> bool {
        self.index != 0
    }

    /// Serialize to 64-bit integer (for networking/save files)
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    /// Deserialize from 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Hands out entity ids and tracks which are alive.
///
/// Freed indices go onto a LIFO free list and come back with a bumped
/// generation, so handles to the old occupant stop matching.
pub(crate) struct EntityAllocator {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: Vec<u32>,
    live: usize,
}

impl EntityAllocator {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut generations = Vec::with_capacity(capacity + 1);
        let mut alive = Vec::with_capacity(capacity + 1);
        // Slot 0 backs Entity::INVALID and is never handed out.
        generations.push(0);
        alive.push(false);
        Self {
            generations,
            alive,
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn allocate(&mut self) -> Entity {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = index as usize;
            self.alive[slot] = true;
            return Entity::new(index, self.generations[slot]);
        }

        let index = self.generations.len() as u32;
        self.generations.push(0);
        self.alive.push(true);
        Entity::new(index, 0)
    }

    /// Release an entity. Returns false if it was not alive.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index as usize;
        self.alive[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free.push(entity.index);
        self.live -= 1;
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        if !entity.is_valid() {
            return false;
        }
        let slot = entity.index as usize;
        slot < self.alive.len() && self.alive[slot] && self.generations[slot] == entity.generation
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(slot, _)| Entity::new(slot as u32, self.generations[slot]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_roundtrip() {
        let entity = Entity::new(12345, 67890);
        assert_eq!(Entity::from_bits(entity.to_bits()), entity);
    }

    #[test]
    fn allocator_never_hands_out_invalid() {
        let mut allocator = EntityAllocator::with_capacity(4);
        let first = allocator.allocate();
        assert!(first.is_valid());
        assert_ne!(first, Entity::INVALID);
        assert!(!allocator.is_alive(Entity::INVALID));
    }

    #[test]
    fn freed_index_comes_back_with_new_generation() {
        let mut allocator = EntityAllocator::with_capacity(4);
        let a = allocator.allocate();
        assert!(allocator.free(a));
        assert!(!allocator.free(a));

        let b = allocator.allocate();
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(!allocator.is_alive(a));
        assert!(allocator.is_alive(b));
        assert_eq!(allocator.len(), 1);
        assert_eq!(allocator.iter().collect::<Vec<_>>(), vec![b]);
    }
}
