//! Force role registry
//!
//! Tracks which entities emit and/or feel each force category. Every role is
//! mirrored into the spatial index under `CategoryKey::Force`, so the force
//! pass reuses the same grid queries as everything else.

use thiserror::Error;
use tracing::warn;

use crate::game::entity::{CategoryKey, EntityId, EntityRef, ForceKind};
use crate::game::force::{DescriptorError, ForceDescriptor};
use crate::game::spatial::{FastMap, IndexError, SpatialIndex};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("rejected {force:?} descriptor for entity {entity}: {source}")]
    InvalidDescriptor {
        entity: EntityId,
        force: ForceKind,
        #[source]
        source: DescriptorError,
    },
    #[error("entity {entity} has no {force:?} role")]
    NoRole { entity: EntityId, force: ForceKind },
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Role flags resolved for one entity and force category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoleFlags {
    pub applier: bool,
    pub receiver: bool,
}

/// Force descriptors per force category
#[derive(Debug, Default)]
pub struct ForceRegistry {
    roles: FastMap<ForceKind, FastMap<EntityId, ForceDescriptor>>,
}

impl ForceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a force role to an entity and index it under the force category
    ///
    /// Invalid descriptors and duplicate roles are logged and leave everything unchanged.
    pub fn register_role(
        &mut self,
        index: &mut SpatialIndex,
        entity: EntityRef,
        force: ForceKind,
        descriptor: ForceDescriptor,
    ) -> Result<(), RegistryError> {
        if let Err(source) = descriptor.validate() {
            warn!(entity = %entity.id, ?force, error = %source, "Rejecting force descriptor");
            return Err(RegistryError::InvalidDescriptor { entity: entity.id, force, source });
        }

        index.register(entity, CategoryKey::Force(force))?;
        self.roles.entry(force).or_default().insert(entity.id, descriptor);
        Ok(())
    }

    /// Detach a force role and drop the entity from the force category's grid
    pub fn unregister_role(
        &mut self,
        index: &mut SpatialIndex,
        entity: EntityId,
        force: ForceKind,
    ) -> Result<ForceDescriptor, RegistryError> {
        let descriptor = self
            .roles
            .get_mut(&force)
            .and_then(|by_entity| by_entity.remove(&entity))
            .ok_or(RegistryError::NoRole { entity, force })?;

        if let Err(e) = index.unregister(entity, CategoryKey::Force(force)) {
            // Role existed without a grid entry; the role is still gone
            warn!(%entity, ?force, error = %e, "Force role had no spatial entry");
        }
        Ok(descriptor)
    }

    /// Detach every force role of an entity
    ///
    /// Returns the number of roles removed.
    pub fn unregister_all(&mut self, index: &mut SpatialIndex, entity: EntityId) -> usize {
        let mut removed = 0;
        for force in ForceKind::ALL {
            if self.unregister_role(index, entity, force).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    pub fn descriptor(&self, entity: EntityId, force: ForceKind) -> Option<&ForceDescriptor> {
        self.roles.get(&force).and_then(|by_entity| by_entity.get(&entity))
    }

    /// Role of an entity in a force category
    ///
    /// A missing descriptor is logged and resolves to neither applier nor receiver.
    pub fn role(&self, entity: EntityId, force: ForceKind) -> RoleFlags {
        match self.descriptor(entity, force) {
            Some(descriptor) => RoleFlags {
                applier: descriptor.is_applier,
                receiver: descriptor.is_receiver,
            },
            None => {
                warn!(%entity, ?force, "No force descriptor for entity, treating as inert");
                RoleFlags::default()
            }
        }
    }

    /// Appliers of a force category, in unspecified order
    pub fn appliers(&self, force: ForceKind) -> impl Iterator<Item = (EntityId, &ForceDescriptor)> + '_ {
        self.roles
            .get(&force)
            .into_iter()
            .flat_map(|by_entity| by_entity.iter())
            .filter(|(_, d)| d.is_applier)
            .map(|(&id, d)| (id, d))
    }

    /// Receivers of a force category, in unspecified order
    pub fn receivers(&self, force: ForceKind) -> impl Iterator<Item = (EntityId, &ForceDescriptor)> + '_ {
        self.roles
            .get(&force)
            .into_iter()
            .flat_map(|by_entity| by_entity.iter())
            .filter(|(_, d)| d.is_receiver)
            .map(|(&id, d)| (id, d))
    }

    /// Number of entities holding any role in a force category
    pub fn len(&self, force: ForceKind) -> usize {
        self.roles.get(&force).map_or(0, |by_entity| by_entity.len())
    }

    pub fn is_empty(&self, force: ForceKind) -> bool {
        self.len(force) == 0
    }
}
