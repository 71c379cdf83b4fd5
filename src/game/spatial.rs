//! Per-category spatial hash index
//!
//! Each category owns a member map (entity -> last reported position and cell)
//! and a uniform grid (cell -> members). Registration, movement and removal are
//! incremental; empty cells are dropped so the grid only covers occupied space.
//!
//! Queries are exact: the grid only narrows the candidate set, every result is
//! checked against the true Euclidean distance.

use hashbrown::{HashMap, HashSet};
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, warn};

use crate::game::constants::spatial::{
    CATEGORY_GRID_INITIAL_CAPACITY, CATEGORY_MEMBERS_INITIAL_CAPACITY, DEFAULT_CELL_SIZE,
    DEFAULT_CLOSEST_SEARCH_RADIUS,
};
use crate::game::entity::{CategoryKey, EntityId, EntityRef};
use crate::util::vec2::Vec2;

/// Grid cell key - (x, y) cell coordinates
pub type CellKey = (i32, i32);

pub(crate) type FastMap<K, V> = HashMap<K, V, FxBuildHasher>;
pub(crate) type FastSet<K> = HashSet<K, FxBuildHasher>;

/// Categories a single entity is tracked under (usually one kind plus a force role or two)
type Memberships = SmallVec<[CategoryKey; 4]>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("cell size must be finite and positive, got {0}")]
    InvalidCellSize(f32),
    #[error("entity {entity} is already tracked under {category}")]
    AlreadyRegistered { entity: EntityId, category: CategoryKey },
    #[error("entity {entity} is not tracked under {category}")]
    NotRegistered { entity: EntityId, category: CategoryKey },
    #[error("entity {entity} reported a non-finite position")]
    InvalidPosition { entity: EntityId },
}

/// Where a member was at its last register/move call
#[derive(Debug, Clone, Copy)]
struct Tracked {
    position: Vec2,
    cell: CellKey,
}

/// Member set and grid for one category
#[derive(Debug, Default)]
struct CategoryGrid {
    members: FastMap<EntityId, Tracked>,
    cells: FastMap<CellKey, FastSet<EntityId>>,
}

impl CategoryGrid {
    fn new() -> Self {
        Self {
            members: FastMap::with_capacity_and_hasher(CATEGORY_MEMBERS_INITIAL_CAPACITY, FxBuildHasher),
            cells: FastMap::with_capacity_and_hasher(CATEGORY_GRID_INITIAL_CAPACITY, FxBuildHasher),
        }
    }

    fn insert_into_cell(&mut self, cell: CellKey, entity: EntityId) {
        self.cells.entry(cell).or_default().insert(entity);
    }

    /// Remove from a cell, dropping the cell once it is empty
    fn remove_from_cell(&mut self, cell: CellKey, entity: EntityId) {
        if let Some(occupants) = self.cells.get_mut(&cell) {
            occupants.remove(&entity);
            if occupants.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }
}

/// Statistics about one category's grid
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGridStats {
    pub members: usize,
    pub non_empty_cells: usize,
    pub max_per_cell: usize,
}

/// Spatial index over every tracked category
#[derive(Debug)]
pub struct SpatialIndex {
    /// Cell size in world units (should approximate the typical query radius)
    cell_size: f32,
    /// Radius of the bounded first pass in `find_closest`
    closest_search_radius: f32,
    categories: FastMap<CategoryKey, CategoryGrid>,
    /// Reverse map so a single move can update every category an entity is in
    memberships: FastMap<EntityId, Memberships>,
}

impl SpatialIndex {
    /// Create an index with the given cell size
    pub fn new(cell_size: f32) -> Result<Self, IndexError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(IndexError::InvalidCellSize(cell_size));
        }

        Ok(Self {
            cell_size,
            closest_search_radius: DEFAULT_CLOSEST_SEARCH_RADIUS,
            categories: FastMap::default(),
            memberships: FastMap::default(),
        })
    }

    /// Override the bounded search radius used by `find_closest`
    ///
    /// Non-finite or non-positive values are ignored with a warning.
    pub fn with_closest_search_radius(mut self, radius: f32) -> Self {
        if radius.is_finite() && radius > 0.0 {
            self.closest_search_radius = radius;
        } else {
            warn!(radius, "Ignoring invalid closest search radius");
        }
        self
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn closest_search_radius(&self) -> f32 {
        self.closest_search_radius
    }

    /// Convert world position to cell key: floor(position / cell_size)
    #[inline]
    pub fn position_to_cell(&self, position: Vec2) -> CellKey {
        (
            (position.x / self.cell_size).floor() as i32,
            (position.y / self.cell_size).floor() as i32,
        )
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Track an entity under a category at its current position
    ///
    /// Registering twice under the same category is a logged no-op.
    pub fn register(&mut self, entity: EntityRef, category: CategoryKey) -> Result<(), IndexError> {
        if !entity.position.is_finite() {
            warn!(entity = %entity.id, %category, "Refusing to register entity with non-finite position");
            return Err(IndexError::InvalidPosition { entity: entity.id });
        }

        // One position per entity: joining another category keeps the recorded one
        let position = match self.position_of(entity.id) {
            Some(stored) if stored != entity.position => {
                warn!(
                    entity = %entity.id,
                    %category,
                    reported = ?entity.position,
                    ?stored,
                    "Registration position differs from tracked position, keeping tracked"
                );
                stored
            }
            _ => entity.position,
        };

        let cell = self.position_to_cell(position);
        let grid = self.categories.entry(category).or_insert_with(CategoryGrid::new);

        if grid.members.contains_key(&entity.id) {
            warn!(entity = %entity.id, %category, "Entity already registered under category, ignoring");
            return Err(IndexError::AlreadyRegistered { entity: entity.id, category });
        }

        grid.members.insert(entity.id, Tracked { position, cell });
        grid.insert_into_cell(cell, entity.id);
        self.memberships.entry(entity.id).or_default().push(category);
        Ok(())
    }

    /// Stop tracking an entity under a category
    ///
    /// Returns the last recorded position.
    pub fn unregister(&mut self, entity: EntityId, category: CategoryKey) -> Result<Vec2, IndexError> {
        let tracked = self
            .categories
            .get_mut(&category)
            .and_then(|grid| {
                let tracked = grid.members.remove(&entity)?;
                grid.remove_from_cell(tracked.cell, entity);
                Some(tracked)
            })
            .ok_or(IndexError::NotRegistered { entity, category })?;

        if let Some(list) = self.memberships.get_mut(&entity) {
            list.retain(|c| *c != category);
            if list.is_empty() {
                self.memberships.remove(&entity);
            }
        }

        Ok(tracked.position)
    }

    /// Stop tracking an entity under every category
    ///
    /// Returns the number of categories it was removed from.
    pub fn unregister_all(&mut self, entity: EntityId) -> usize {
        let Some(categories) = self.memberships.remove(&entity) else {
            return 0;
        };

        for category in &categories {
            if let Some(grid) = self.categories.get_mut(category) {
                if let Some(tracked) = grid.members.remove(&entity) {
                    grid.remove_from_cell(tracked.cell, entity);
                }
            }
        }

        categories.len()
    }

    /// Record a new position for an entity under one category
    ///
    /// Returns true if the entity changed cell.
    pub fn update_position(
        &mut self,
        entity: EntityId,
        category: CategoryKey,
        position: Vec2,
    ) -> Result<bool, IndexError> {
        if !position.is_finite() {
            warn!(%entity, %category, "Ignoring non-finite position update");
            return Err(IndexError::InvalidPosition { entity });
        }

        let new_cell = self.position_to_cell(position);
        let grid = self
            .categories
            .get_mut(&category)
            .ok_or(IndexError::NotRegistered { entity, category })?;
        let tracked = grid
            .members
            .get_mut(&entity)
            .ok_or(IndexError::NotRegistered { entity, category })?;

        let old_cell = tracked.cell;
        tracked.position = position;
        if old_cell == new_cell {
            return Ok(false);
        }

        tracked.cell = new_cell;
        grid.remove_from_cell(old_cell, entity);
        grid.insert_into_cell(new_cell, entity);
        Ok(true)
    }

    /// Record a new position for an entity under every category it is tracked in
    ///
    /// Returns the number of categories in which the entity changed cell.
    pub fn update_entity(&mut self, entity: EntityId, position: Vec2) -> usize {
        let Some(categories) = self.memberships.get(&entity).cloned() else {
            debug!(%entity, "Position update for untracked entity");
            return 0;
        };

        let mut moved = 0;
        for category in categories {
            match self.update_position(entity, category, position) {
                Ok(true) => moved += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%entity, %category, error = %e, "Position update failed");
                }
            }
        }
        moved
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn contains(&self, entity: EntityId, category: CategoryKey) -> bool {
        self.categories
            .get(&category)
            .is_some_and(|grid| grid.members.contains_key(&entity))
    }

    /// Categories an entity is currently tracked under
    pub fn categories_of(&self, entity: EntityId) -> &[CategoryKey] {
        self.memberships.get(&entity).map(|list| list.as_slice()).unwrap_or(&[])
    }

    /// Last recorded position of an entity under a category
    pub fn position_in(&self, entity: EntityId, category: CategoryKey) -> Option<Vec2> {
        self.categories
            .get(&category)
            .and_then(|grid| grid.members.get(&entity))
            .map(|tracked| tracked.position)
    }

    /// Last recorded position of an entity in any category
    pub fn position_of(&self, entity: EntityId) -> Option<Vec2> {
        let category = *self.memberships.get(&entity)?.first()?;
        self.position_in(entity, category)
    }

    /// Number of entities tracked under a category
    pub fn len(&self, category: CategoryKey) -> usize {
        self.categories.get(&category).map_or(0, |grid| grid.members.len())
    }

    pub fn is_empty(&self, category: CategoryKey) -> bool {
        self.len(category) == 0
    }

    /// Number of non-empty cells in a category's grid
    pub fn cell_count(&self, category: CategoryKey) -> usize {
        self.categories.get(&category).map_or(0, |grid| grid.cells.len())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Visit every member of a category within `radius` of `center`
    ///
    /// The callback receives the id, recorded position and squared distance.
    /// Broad phase walks the cells overlapping the query's bounding box (or the
    /// occupied cells, whichever is fewer); narrow phase keeps `distance <= radius`.
    pub fn for_each_nearby<F>(&self, category: CategoryKey, center: Vec2, radius: f32, mut visit: F)
    where
        F: FnMut(EntityId, Vec2, f32),
    {
        if !radius.is_finite() || radius < 0.0 || !center.is_finite() {
            warn!(%category, radius, "Ignoring nearby query with invalid center or radius");
            return;
        }
        let Some(grid) = self.categories.get(&category) else {
            return;
        };

        let (min_x, min_y) = self.position_to_cell(Vec2::new(center.x - radius, center.y - radius));
        let (max_x, max_y) = self.position_to_cell(Vec2::new(center.x + radius, center.y + radius));
        let radius_sq = radius * radius;

        let mut narrow = |occupants: &FastSet<EntityId>| {
            for &id in occupants {
                if let Some(tracked) = grid.members.get(&id) {
                    let distance_sq = tracked.position.distance_sq_to(center);
                    if distance_sq <= radius_sq {
                        visit(id, tracked.position, distance_sq);
                    }
                }
            }
        };

        // Saturated edges can make the box wider than i64 can count; treat that as "huge"
        let span = (i64::from(max_x) - i64::from(min_x) + 1).checked_mul(i64::from(max_y) - i64::from(min_y) + 1);
        if span.map_or(true, |cells| cells > grid.cells.len() as i64) {
            // Query box covers more cells than are occupied: scan occupied cells instead
            for (&(cx, cy), occupants) in &grid.cells {
                if cx >= min_x && cx <= max_x && cy >= min_y && cy <= max_y {
                    narrow(occupants);
                }
            }
        } else {
            for cx in min_x..=max_x {
                for cy in min_y..=max_y {
                    if let Some(occupants) = grid.cells.get(&(cx, cy)) {
                        narrow(occupants);
                    }
                }
            }
        }
    }

    /// Every member of a category within `radius` of `center`
    ///
    /// Each entity appears at most once; order is unspecified.
    pub fn query_nearby(&self, category: CategoryKey, center: Vec2, radius: f32) -> Vec<EntityId> {
        let mut found = Vec::new();
        self.query_nearby_into(category, center, radius, &mut found);
        found
    }

    /// Same as `query_nearby`, writing into a reusable buffer (cleared first)
    pub fn query_nearby_into(&self, category: CategoryKey, center: Vec2, radius: f32, buf: &mut Vec<EntityId>) {
        buf.clear();
        self.for_each_nearby(category, center, radius, |id, _, _| buf.push(id));
    }

    /// Every member of a category
    pub fn query_all(&self, category: CategoryKey) -> Vec<EntityId> {
        self.categories
            .get(&category)
            .map(|grid| grid.members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Closest member of a category to `position`
    ///
    /// Searches within the configured closest-search radius first and only falls
    /// back to scanning the whole category when nothing is that close.
    /// Equal distances resolve to the smaller id.
    pub fn find_closest(&self, category: CategoryKey, position: Vec2) -> Option<EntityId> {
        fn consider(best: &mut Option<(f32, EntityId)>, id: EntityId, distance_sq: f32) {
            let closer = match *best {
                None => true,
                Some((best_sq, best_id)) => distance_sq < best_sq || (distance_sq == best_sq && id < best_id),
            };
            if closer {
                *best = Some((distance_sq, id));
            }
        }

        let mut best: Option<(f32, EntityId)> = None;
        self.for_each_nearby(category, position, self.closest_search_radius, |id, _, d| {
            consider(&mut best, id, d)
        });

        if best.is_none() && position.is_finite() {
            let grid = self.categories.get(&category)?;
            for (&id, tracked) in &grid.members {
                consider(&mut best, id, tracked.position.distance_sq_to(position));
            }
        }

        best.map(|(_, id)| id)
    }

    /// Member of a category whose bearing from `position` deviates least from `direction`
    ///
    /// Members sitting exactly on `position` have no bearing and are skipped.
    pub fn find_at_closest_angle(&self, category: CategoryKey, position: Vec2, direction: Vec2) -> Option<EntityId> {
        let (direction, length) = direction.normalize_with_length();
        if length == 0.0 || !direction.is_finite() {
            warn!(%category, "Ignoring closest-angle query with zero direction");
            return None;
        }

        let grid = self.categories.get(&category)?;
        let mut best: Option<(f32, EntityId)> = None;
        for (&id, tracked) in &grid.members {
            let (to_entity, distance) = (tracked.position - position).normalize_with_length();
            if distance == 0.0 {
                continue;
            }
            let angle = direction.angle_between(to_entity);
            let better = match best {
                None => true,
                Some((best_angle, best_id)) => angle < best_angle || (angle == best_angle && id < best_id),
            };
            if better {
                best = Some((angle, id));
            }
        }

        best.map(|(_, id)| id)
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Get statistics about one category's grid
    pub fn stats(&self, category: CategoryKey) -> SpatialGridStats {
        match self.categories.get(&category) {
            Some(grid) => SpatialGridStats {
                members: grid.members.len(),
                non_empty_cells: grid.cells.len(),
                max_per_cell: grid.cells.values().map(|c| c.len()).max().unwrap_or(0),
            },
            None => SpatialGridStats {
                members: 0,
                non_empty_cells: 0,
                max_per_cell: 0,
            },
        }
    }

    /// Occupied cells of a category with their member counts, sorted by cell
    pub fn occupancy(&self, category: CategoryKey) -> Vec<(CellKey, usize)> {
        let mut cells: Vec<(CellKey, usize)> = self
            .categories
            .get(&category)
            .map(|grid| grid.cells.iter().map(|(&key, occupants)| (key, occupants.len())).collect())
            .unwrap_or_default();
        cells.sort_unstable();
        cells
    }

    /// Every category that has ever been registered into
    pub fn tracked_categories(&self) -> impl Iterator<Item = CategoryKey> + '_ {
        self.categories.keys().copied()
    }

    /// Check member/grid agreement for every category
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.categories.values().all(|grid| {
            let occupants: usize = grid.cells.values().map(|c| c.len()).sum();
            let no_empty = grid.cells.values().all(|c| !c.is_empty());
            let placed = grid.members.iter().all(|(id, tracked)| {
                tracked.cell == self.position_to_cell(tracked.position)
                    && grid.cells.get(&tracked.cell).is_some_and(|c| c.contains(id))
            });
            occupants == grid.members.len() && no_empty && placed
        })
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            closest_search_radius: DEFAULT_CLOSEST_SEARCH_RADIUS,
            categories: FastMap::default(),
            memberships: FastMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{EntityKind, ForceKind};

    const SHIP: CategoryKey = CategoryKey::Kind(EntityKind::Ship);
    const BULLET: CategoryKey = CategoryKey::Kind(EntityKind::Bullet);
    const GRAVITY: CategoryKey = CategoryKey::Force(ForceKind::Gravity);

    fn entity(id: u64, x: f32, y: f32) -> EntityRef {
        EntityRef::new(EntityId(id), Vec2::new(x, y))
    }

    fn sorted(mut ids: Vec<EntityId>) -> Vec<EntityId> {
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_new_rejects_bad_cell_size() {
        assert_eq!(SpatialIndex::new(0.0).unwrap_err(), IndexError::InvalidCellSize(0.0));
        assert!(SpatialIndex::new(-5.0).is_err());
        assert!(SpatialIndex::new(f32::NAN).is_err());
        assert!(SpatialIndex::new(10.0).is_ok());
    }

    #[test]
    fn test_position_to_cell_floors_negative_coordinates() {
        let index = SpatialIndex::new(10.0).unwrap();
        assert_eq!(index.position_to_cell(Vec2::new(0.0, 0.0)), (0, 0));
        assert_eq!(index.position_to_cell(Vec2::new(9.99, 10.0)), (0, 1));
        assert_eq!(index.position_to_cell(Vec2::new(-0.1, -10.0)), (-1, -1));
        assert_eq!(index.position_to_cell(Vec2::new(-10.1, 25.0)), (-2, 2));
    }

    #[test]
    fn test_query_scenario_radius_boundaries() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 0.0, 0.0), SHIP).unwrap();

        let hits = index.query_nearby(SHIP, Vec2::new(5.0, 5.0), 8.0);
        assert_eq!(hits, vec![EntityId(1)]);

        let misses = index.query_nearby(SHIP, Vec2::new(5.0, 5.0), 2.0);
        assert!(misses.is_empty());
    }

    #[test]
    fn test_register_twice_is_noop() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 3.0, 3.0), SHIP).unwrap();

        let err = index.register(entity(1, 50.0, 50.0), SHIP).unwrap_err();
        assert_eq!(err, IndexError::AlreadyRegistered { entity: EntityId(1), category: SHIP });

        // Original position kept, still exactly one cell
        assert_eq!(index.position_in(EntityId(1), SHIP), Some(Vec2::new(3.0, 3.0)));
        assert_eq!(index.cell_count(SHIP), 1);
        assert_eq!(index.categories_of(EntityId(1)), &[SHIP]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_register_rejects_non_finite_position() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        let err = index.register(entity(1, f32::NAN, 0.0), SHIP).unwrap_err();
        assert_eq!(err, IndexError::InvalidPosition { entity: EntityId(1) });
        assert!(index.is_empty(SHIP));
    }

    #[test]
    fn test_query_contains_self_for_any_radius() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        let positions = [(0.0, 0.0), (9.999, -0.001), (-37.5, 12.25), (100.0, 100.0)];
        for (i, &(x, y)) in positions.iter().enumerate() {
            index.register(entity(i as u64, x, y), SHIP).unwrap();
        }

        for (i, &(x, y)) in positions.iter().enumerate() {
            for radius in [0.0, 0.5, 10.0, 1000.0] {
                let hits = index.query_nearby(SHIP, Vec2::new(x, y), radius);
                assert!(hits.contains(&EntityId(i as u64)), "radius {} missed entity {}", radius, i);
            }
        }
    }

    #[test]
    fn test_query_is_exact_and_independent_of_cell_size() {
        let points: Vec<(u64, Vec2)> = (0..200)
            .map(|i| {
                let angle = i as f32 * 0.37;
                let r = (i % 17) as f32 * 3.1;
                (i as u64, Vec2::new(angle.cos() * r, angle.sin() * r))
            })
            .collect();
        let center = Vec2::new(4.0, -3.0);
        let radius = 21.5;

        let expected: Vec<EntityId> = sorted(
            points
                .iter()
                .filter(|(_, p)| p.distance_to(center) <= radius)
                .map(|(id, _)| EntityId(*id))
                .collect(),
        );

        for cell_size in [0.5, 3.0, 10.0, 64.0, 1000.0] {
            let mut index = SpatialIndex::new(cell_size).unwrap();
            for (id, p) in &points {
                index.register(EntityRef::new(EntityId(*id), *p), SHIP).unwrap();
            }
            let found = sorted(index.query_nearby(SHIP, center, radius));
            assert_eq!(found, expected, "cell size {}", cell_size);
        }
    }

    #[test]
    fn test_update_position_crossing_cells() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 5.0, 5.0), SHIP).unwrap();

        let moved = index.update_position(EntityId(1), SHIP, Vec2::new(35.0, 5.0)).unwrap();
        assert!(moved);

        // Found at new position
        assert_eq!(index.query_nearby(SHIP, Vec2::new(35.0, 5.0), 1.0), vec![EntityId(1)]);
        // Query covering only the old cell misses it
        assert!(index.query_nearby(SHIP, Vec2::new(5.0, 5.0), 4.0).is_empty());
        assert_eq!(index.occupancy(SHIP), vec![((3, 0), 1)]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_update_position_same_cell_refreshes_position() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 1.0, 1.0), SHIP).unwrap();

        let moved = index.update_position(EntityId(1), SHIP, Vec2::new(8.0, 8.0)).unwrap();
        assert!(!moved);
        assert_eq!(index.position_in(EntityId(1), SHIP), Some(Vec2::new(8.0, 8.0)));
        // Narrow phase uses the refreshed position
        assert!(index.query_nearby(SHIP, Vec2::new(1.0, 1.0), 2.0).is_empty());
    }

    #[test]
    fn test_update_position_unknown_entity() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        let err = index.update_position(EntityId(9), SHIP, Vec2::ZERO).unwrap_err();
        assert_eq!(err, IndexError::NotRegistered { entity: EntityId(9), category: SHIP });
    }

    #[test]
    fn test_update_entity_moves_all_categories() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 0.0, 0.0), SHIP).unwrap();
        index.register(entity(1, 0.0, 0.0), GRAVITY).unwrap();

        let moved = index.update_entity(EntityId(1), Vec2::new(-25.0, 40.0));
        assert_eq!(moved, 2);
        assert_eq!(index.position_in(EntityId(1), SHIP), Some(Vec2::new(-25.0, 40.0)));
        assert_eq!(index.position_in(EntityId(1), GRAVITY), Some(Vec2::new(-25.0, 40.0)));
        assert_eq!(index.update_entity(EntityId(2), Vec2::ZERO), 0);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_unregister_deletes_empty_cells() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 5.0, 5.0), SHIP).unwrap();
        index.register(entity(2, 6.0, 6.0), SHIP).unwrap();
        index.register(entity(3, 55.0, 5.0), SHIP).unwrap();
        assert_eq!(index.cell_count(SHIP), 2);

        assert_eq!(index.unregister(EntityId(3), SHIP).unwrap(), Vec2::new(55.0, 5.0));
        assert_eq!(index.cell_count(SHIP), 1);

        index.unregister(EntityId(1), SHIP).unwrap();
        assert_eq!(index.cell_count(SHIP), 1);
        index.unregister(EntityId(2), SHIP).unwrap();
        assert_eq!(index.cell_count(SHIP), 0);

        assert!(index.query_all(SHIP).is_empty());
        assert!(index.query_nearby(SHIP, Vec2::new(5.0, 5.0), 100.0).is_empty());
        assert!(index.categories_of(EntityId(1)).is_empty());
        assert!(index.is_consistent());
    }

    #[test]
    fn test_unregister_missing_is_error() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 0.0, 0.0), SHIP).unwrap();
        assert!(index.unregister(EntityId(1), BULLET).is_err());
        assert!(index.unregister(EntityId(2), SHIP).is_err());
        assert_eq!(index.len(SHIP), 1);
    }

    #[test]
    fn test_unregister_all() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 0.0, 0.0), SHIP).unwrap();
        index.register(entity(1, 0.0, 0.0), GRAVITY).unwrap();
        index.register(entity(2, 0.0, 0.0), SHIP).unwrap();

        assert_eq!(index.unregister_all(EntityId(1)), 2);
        assert_eq!(index.query_all(SHIP), vec![EntityId(2)]);
        assert!(index.is_empty(GRAVITY));
        assert_eq!(index.cell_count(GRAVITY), 0);
        assert_eq!(index.unregister_all(EntityId(1)), 0);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_categories_are_independent() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 0.0, 0.0), SHIP).unwrap();
        index.register(entity(2, 1.0, 0.0), BULLET).unwrap();

        assert_eq!(index.query_nearby(SHIP, Vec2::ZERO, 5.0), vec![EntityId(1)]);
        assert_eq!(index.query_nearby(BULLET, Vec2::ZERO, 5.0), vec![EntityId(2)]);
        assert!(index.query_nearby(GRAVITY, Vec2::ZERO, 5.0).is_empty());
    }

    #[test]
    fn test_invalid_radius_returns_empty() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 0.0, 0.0), SHIP).unwrap();
        assert!(index.query_nearby(SHIP, Vec2::ZERO, -1.0).is_empty());
        assert!(index.query_nearby(SHIP, Vec2::ZERO, f32::NAN).is_empty());
        assert!(index.query_nearby(SHIP, Vec2::new(f32::INFINITY, 0.0), 1.0).is_empty());
    }

    #[test]
    fn test_query_nearby_into_reuses_buffer() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 0.0, 0.0), SHIP).unwrap();
        let mut buf = vec![EntityId(99), EntityId(98)];
        index.query_nearby_into(SHIP, Vec2::ZERO, 1.0, &mut buf);
        assert_eq!(buf, vec![EntityId(1)]);
    }

    #[test]
    fn test_find_closest_within_search_radius() {
        let mut index = SpatialIndex::new(10.0).unwrap().with_closest_search_radius(50.0);
        index.register(entity(1, 10.0, 0.0), SHIP).unwrap();
        index.register(entity(2, 4.0, 3.0), SHIP).unwrap();
        index.register(entity(3, -30.0, 0.0), SHIP).unwrap();

        assert_eq!(index.find_closest(SHIP, Vec2::ZERO), Some(EntityId(2)));
    }

    #[test]
    fn test_find_closest_falls_back_to_full_scan() {
        let mut index = SpatialIndex::new(10.0).unwrap().with_closest_search_radius(5.0);
        index.register(entity(1, 500.0, 0.0), SHIP).unwrap();
        index.register(entity(2, 0.0, -300.0), SHIP).unwrap();

        assert_eq!(index.find_closest(SHIP, Vec2::ZERO), Some(EntityId(2)));
        assert_eq!(index.find_closest(BULLET, Vec2::ZERO), None);
    }

    #[test]
    fn test_find_closest_tie_prefers_smaller_id() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(7, 3.0, 0.0), SHIP).unwrap();
        index.register(entity(4, -3.0, 0.0), SHIP).unwrap();
        assert_eq!(index.find_closest(SHIP, Vec2::ZERO), Some(EntityId(4)));
    }

    #[test]
    fn test_find_at_closest_angle() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 10.0, 10.0), SHIP).unwrap();
        index.register(entity(2, 50.0, 1.0), SHIP).unwrap();
        index.register(entity(3, 0.0, 0.0), SHIP).unwrap(); // on the origin, skipped

        assert_eq!(index.find_at_closest_angle(SHIP, Vec2::ZERO, Vec2::RIGHT), Some(EntityId(2)));
        assert_eq!(index.find_at_closest_angle(SHIP, Vec2::ZERO, Vec2::UP), Some(EntityId(1)));
        assert_eq!(index.find_at_closest_angle(SHIP, Vec2::ZERO, Vec2::ZERO), None);
    }

    #[test]
    fn test_stats_and_occupancy() {
        let mut index = SpatialIndex::new(64.0).unwrap();
        for i in 0..3 {
            index.register(entity(i, 100.0, 100.0), SHIP).unwrap();
        }
        index.register(entity(10, 500.0, 500.0), SHIP).unwrap();

        let stats = index.stats(SHIP);
        assert_eq!(stats.members, 4);
        assert_eq!(stats.non_empty_cells, 2);
        assert_eq!(stats.max_per_cell, 3);
        assert_eq!(index.occupancy(SHIP), vec![((1, 1), 3), ((7, 7), 1)]);
        assert_eq!(index.stats(BULLET).members, 0);
    }

    #[test]
    fn test_churn_keeps_index_consistent() {
        let mut index = SpatialIndex::new(7.0).unwrap();
        for tick in 0..50u64 {
            // Spawn a few
            for k in 0..4 {
                let id = tick * 4 + k;
                let p = Vec2::new((id as f32 * 13.7) % 90.0 - 45.0, (id as f32 * 7.3) % 60.0 - 30.0);
                index.register(EntityRef::new(EntityId(id), p), SHIP).unwrap();
            }
            // Move everyone
            for id in index.query_all(SHIP) {
                let p = index.position_in(id, SHIP).unwrap();
                index.update_position(id, SHIP, p + Vec2::new(1.3, -0.9)).unwrap();
            }
            // Despawn the oldest
            if tick >= 5 {
                for k in 0..3 {
                    let _ = index.unregister(EntityId((tick - 5) * 4 + k), SHIP);
                }
            }
            assert!(index.is_consistent(), "inconsistent at tick {}", tick);
        }
    }

    #[test]
    fn test_huge_radius_scans_occupied_cells() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 0.0, 0.0), SHIP).unwrap();
        index.register(entity(2, 3.0e10, -3.0e10), SHIP).unwrap();
        index.register(entity(3, -2.5e10, 1.0), SHIP).unwrap();

        let mut found = index.query_nearby(SHIP, Vec2::ZERO, 1.0e12);
        found.sort_unstable();
        assert_eq!(found, vec![EntityId(1), EntityId(2), EntityId(3)]);

        assert_eq!(index.query_nearby(SHIP, Vec2::new(3.0e10, -3.0e10), 1.0), vec![EntityId(2)]);
        assert_eq!(index.find_closest(SHIP, Vec2::new(-2.4e10, 0.0)), Some(EntityId(3)));
    }

    #[test]
    fn test_second_category_keeps_tracked_position() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.register(entity(1, 2.0, 2.0), SHIP).unwrap();
        index.register(entity(1, 80.0, 80.0), GRAVITY).unwrap();

        assert_eq!(index.position_in(EntityId(1), GRAVITY), Some(Vec2::new(2.0, 2.0)));
        assert_eq!(index.query_nearby(GRAVITY, Vec2::new(2.0, 2.0), 0.5), vec![EntityId(1)]);
        assert!(index.query_nearby(GRAVITY, Vec2::new(80.0, 80.0), 5.0).is_empty());
        assert!(index.is_consistent());
    }
}
