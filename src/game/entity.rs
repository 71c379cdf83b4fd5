//! Entity identifiers and tracking categories

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util::vec2::Vec2;

/// Opaque, stable entity identifier assigned by the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Entity reference handed to the core: identity plus current position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityRef {
    pub id: EntityId,
    pub position: Vec2,
}

impl EntityRef {
    pub fn new(id: EntityId, position: Vec2) -> Self {
        Self { id, position }
    }
}

/// What an entity is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Wall,
    Ship,
    Bullet,
    Explosion,
    SpaceDebris,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Wall,
        EntityKind::Ship,
        EntityKind::Bullet,
        EntityKind::Explosion,
        EntityKind::SpaceDebris,
    ];
}

/// Which continuous force an entity emits or feels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ForceKind {
    Gravity,
    Magnetism,
    ForceField,
}

impl ForceKind {
    pub const ALL: [ForceKind; 3] = [ForceKind::Gravity, ForceKind::Magnetism, ForceKind::ForceField];
}

/// Classification axis plus value; each key has its own member set and grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CategoryKey {
    Kind(EntityKind),
    Force(ForceKind),
}

impl From<EntityKind> for CategoryKey {
    fn from(kind: EntityKind) -> Self {
        CategoryKey::Kind(kind)
    }
}

impl From<ForceKind> for CategoryKey {
    fn from(force: ForceKind) -> Self {
        CategoryKey::Force(force)
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryKey::Kind(kind) => write!(f, "kind:{:?}", kind),
            CategoryKey::Force(force) => write!(f, "force:{:?}", force),
        }
    }
}
