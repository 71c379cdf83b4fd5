use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::constants::{forces, pending, spatial, tracking};
use crate::game::systems::forces::{EvaluationMode, ForceSettings};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("cell_size must be finite and > 0, got {0}")]
    InvalidCellSize(f32),
    #[error("closest_search_radius must be finite and > 0, got {0}")]
    InvalidClosestSearchRadius(f32),
    #[error("movement_threshold must be finite and >= 0, got {0}")]
    InvalidMovementThreshold(f32),
    #[error("clump_threshold_factor must be in (0, 1], got {0}")]
    InvalidClumpThresholdFactor(f32),
    #[error("max_pending_registrations must be at least 1")]
    NoPendingCapacity,
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Spatial grid cell size in world units
    pub cell_size: f32,
    /// Radius of the bounded first pass in closest-entity lookups
    pub closest_search_radius: f32,
    /// Displacement below which a move is not reported to the index
    pub movement_threshold: f32,
    /// Per-applier (direct) or per-clump (clustered) force evaluation
    pub evaluation_mode: EvaluationMode,
    /// Fraction of the mean applier range under which appliers clump
    pub clump_threshold_factor: f32,
    /// Registrations that may be queued before the context is built
    pub max_pending_registrations: usize,
    /// Keep applied force vectors in tick reports for debug overlays
    pub record_force_vectors: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cell_size: spatial::DEFAULT_CELL_SIZE,
            closest_search_radius: spatial::DEFAULT_CLOSEST_SEARCH_RADIUS,
            movement_threshold: tracking::MOVEMENT_THRESHOLD,
            evaluation_mode: EvaluationMode::Direct,
            clump_threshold_factor: forces::DEFAULT_CLUMP_THRESHOLD_FACTOR,
            max_pending_registrations: pending::MAX_PENDING_REGISTRATIONS,
            record_force_vectors: false,
        }
    }
}

impl SimulationConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load config from an arbitrary key lookup; bad values keep the default
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup("SPATIAL_CELL_SIZE") {
            match value.parse::<f32>() {
                Ok(parsed) if parsed.is_finite() && parsed > 0.0 => config.cell_size = parsed,
                Ok(_) => tracing::warn!("SPATIAL_CELL_SIZE must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid SPATIAL_CELL_SIZE '{}', using default", value),
            }
        }

        if let Some(value) = lookup("CLOSEST_SEARCH_RADIUS") {
            match value.parse::<f32>() {
                Ok(parsed) if parsed.is_finite() && parsed > 0.0 => config.closest_search_radius = parsed,
                Ok(_) => tracing::warn!("CLOSEST_SEARCH_RADIUS must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid CLOSEST_SEARCH_RADIUS '{}', using default", value),
            }
        }

        if let Some(value) = lookup("MOVEMENT_THRESHOLD") {
            match value.parse::<f32>() {
                Ok(parsed) if parsed.is_finite() && parsed >= 0.0 => config.movement_threshold = parsed,
                Ok(_) => tracing::warn!("MOVEMENT_THRESHOLD must be >= 0, using default"),
                Err(_) => tracing::warn!("Invalid MOVEMENT_THRESHOLD '{}', using default", value),
            }
        }

        if let Some(value) = lookup("FORCE_CLUMPING") {
            match parse_flag(&value) {
                Some(true) => config.evaluation_mode = EvaluationMode::Clustered,
                Some(false) => config.evaluation_mode = EvaluationMode::Direct,
                None => tracing::warn!("Invalid FORCE_CLUMPING '{}', using default", value),
            }
        }

        if let Some(value) = lookup("CLUMP_THRESHOLD_FACTOR") {
            match value.parse::<f32>() {
                Ok(parsed) if parsed > 0.0 && parsed <= 1.0 => config.clump_threshold_factor = parsed,
                Ok(_) => tracing::warn!("CLUMP_THRESHOLD_FACTOR must be in (0, 1], using default"),
                Err(_) => tracing::warn!("Invalid CLUMP_THRESHOLD_FACTOR '{}', using default", value),
            }
        }

        if let Some(value) = lookup("MAX_PENDING_REGISTRATIONS") {
            match value.parse::<usize>() {
                Ok(parsed) if parsed > 0 => config.max_pending_registrations = parsed,
                Ok(_) => tracing::warn!("MAX_PENDING_REGISTRATIONS must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid MAX_PENDING_REGISTRATIONS '{}', using default", value),
            }
        }

        if let Some(value) = lookup("RECORD_FORCE_VECTORS") {
            match parse_flag(&value) {
                Some(flag) => config.record_force_vectors = flag,
                None => tracing::warn!("Invalid RECORD_FORCE_VECTORS '{}', using default", value),
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(ConfigError::InvalidCellSize(self.cell_size));
        }
        if !self.closest_search_radius.is_finite() || self.closest_search_radius <= 0.0 {
            return Err(ConfigError::InvalidClosestSearchRadius(self.closest_search_radius));
        }
        if !self.movement_threshold.is_finite() || self.movement_threshold < 0.0 {
            return Err(ConfigError::InvalidMovementThreshold(self.movement_threshold));
        }
        if !(self.clump_threshold_factor > 0.0 && self.clump_threshold_factor <= 1.0) {
            return Err(ConfigError::InvalidClumpThresholdFactor(self.clump_threshold_factor));
        }
        if self.max_pending_registrations == 0 {
            return Err(ConfigError::NoPendingCapacity);
        }
        Ok(())
    }

    /// Settings handed to the force pass each physics tick
    pub fn force_settings(&self) -> ForceSettings {
        ForceSettings {
            mode: self.evaluation_mode,
            clump_threshold_factor: self.clump_threshold_factor,
            record_force_vectors: self.record_force_vectors,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
