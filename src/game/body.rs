//! Dynamics state that force contributions are written into

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::game::constants::forces::DEFAULT_BODY_MASS;
use crate::game::entity::EntityId;
use crate::game::spatial::FastMap;
use crate::util::vec2::Vec2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BodyError {
    #[error("body mass must be finite and positive, got {0}")]
    InvalidMass(f32),
}

/// Anything that can receive per-tick force contributions
pub trait ForceSink {
    /// Add a force to an entity's accumulator
    ///
    /// Returns false when the entity has no physics state; the force is dropped.
    fn add_force(&mut self, entity: EntityId, force: Vec2) -> bool;
}

/// Physics state of one force receiver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidBody {
    pub mass: f32,
    pub velocity: Vec2,
    /// Sum of forces added since the last integrate/clear
    pub accumulated_force: Vec2,
}

impl RigidBody {
    pub fn new(mass: f32) -> Self {
        Self {
            mass,
            velocity: Vec2::ZERO,
            accumulated_force: Vec2::ZERO,
        }
    }
}

impl Default for RigidBody {
    fn default() -> Self {
        Self::new(DEFAULT_BODY_MASS)
    }
}

/// Rigid bodies keyed by entity
#[derive(Debug, Default)]
pub struct PhysicsBodies {
    bodies: FastMap<EntityId, RigidBody>,
}

impl PhysicsBodies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give an entity physics state; replaces any existing body
    pub fn insert(&mut self, entity: EntityId, mass: f32) -> Result<(), BodyError> {
        if !mass.is_finite() || mass <= 0.0 {
            warn!(%entity, mass, "Rejecting body with invalid mass");
            return Err(BodyError::InvalidMass(mass));
        }
        self.bodies.insert(entity, RigidBody::new(mass));
        Ok(())
    }

    pub fn remove(&mut self, entity: EntityId) -> Option<RigidBody> {
        self.bodies.remove(&entity)
    }

    pub fn get(&self, entity: EntityId) -> Option<&RigidBody> {
        self.bodies.get(&entity)
    }

    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut RigidBody> {
        self.bodies.get_mut(&entity)
    }

    /// Total force accumulated on an entity this tick
    pub fn accumulated(&self, entity: EntityId) -> Option<Vec2> {
        self.bodies.get(&entity).map(|body| body.accumulated_force)
    }

    /// Zero every accumulator without touching velocities
    pub fn clear_forces(&mut self) {
        for body in self.bodies.values_mut() {
            body.accumulated_force = Vec2::ZERO;
        }
    }

    /// Turn accumulated forces into velocity change (a = F / m) and clear them
    pub fn integrate(&mut self, dt: f32) {
        for body in self.bodies.values_mut() {
            body.velocity += body.accumulated_force * (dt / body.mass);
            body.accumulated_force = Vec2::ZERO;
        }
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl ForceSink for PhysicsBodies {
    fn add_force(&mut self, entity: EntityId, force: Vec2) -> bool {
        match self.bodies.get_mut(&entity) {
            Some(body) => {
                body.accumulated_force += force;
                true
            }
            None => false,
        }
    }
}
