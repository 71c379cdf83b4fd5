//! Movement threshold filter in front of the spatial index
//!
//! Entities jitter by sub-unit amounts every frame; only displacements past the
//! threshold are worth a cell recomputation.

use crate::game::constants::tracking::MOVEMENT_THRESHOLD;
use crate::game::entity::EntityId;
use crate::game::spatial::FastMap;
use crate::util::vec2::Vec2;

#[derive(Debug)]
pub struct PositionTracker {
    threshold: f32,
    last_reported: FastMap<EntityId, Vec2>,
}

impl PositionTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.max(0.0),
            last_reported: FastMap::default(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Remember the position an entity was registered or last moved at
    pub fn reset(&mut self, entity: EntityId, position: Vec2) {
        self.last_reported.insert(entity, position);
    }

    /// Observe a position; true when it moved past the threshold since the last report
    ///
    /// The first observation of an entity only records it.
    pub fn observe(&mut self, entity: EntityId, position: Vec2) -> bool {
        match self.last_reported.get_mut(&entity) {
            Some(last) => {
                if last.distance_sq_to(position) > self.threshold * self.threshold {
                    *last = position;
                    true
                } else {
                    false
                }
            }
            None => {
                self.last_reported.insert(entity, position);
                false
            }
        }
    }

    pub fn forget(&mut self, entity: EntityId) {
        self.last_reported.remove(&entity);
    }

    pub fn len(&self) -> usize {
        self.last_reported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_reported.is_empty()
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new(MOVEMENT_THRESHOLD)
    }
}
