/// Spatial index tuning
pub mod spatial {
    /// Default grid cell size in world units
    /// Should approximate the typical query radius
    pub const DEFAULT_CELL_SIZE: f32 = 10.0;
    /// Default radius for the bounded first pass of closest-entity lookups
    pub const DEFAULT_CLOSEST_SEARCH_RADIUS: f32 = 50.0;
    /// Initial capacity for a category's cell map (number of expected non-empty cells)
    pub const CATEGORY_GRID_INITIAL_CAPACITY: usize = 64;
    /// Initial capacity for a category's member map
    pub const CATEGORY_MEMBERS_INITIAL_CAPACITY: usize = 128;
}

/// Position tracking
pub mod tracking {
    /// Displacement (world units) below which a move is not reported to the index
    pub const MOVEMENT_THRESHOLD: f32 = 0.05;
}

/// Force evaluation
pub mod forces {
    /// Default fraction of the mean applier range under which appliers join one clump
    pub const DEFAULT_CLUMP_THRESHOLD_FACTOR: f32 = 0.5;
    /// Source count at which per-source contributions move onto the rayon pool
    pub const PARALLEL_SOURCE_THRESHOLD: usize = 64;
    /// Mass assigned to bodies created without an explicit mass
    pub const DEFAULT_BODY_MASS: f32 = 1.0;
}

/// Composition-time registration queue
pub mod pending {
    /// Maximum registrations buffered before the context exists
    pub const MAX_PENDING_REGISTRATIONS: usize = 4096;
}
