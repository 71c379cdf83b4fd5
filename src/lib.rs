//! Skirmish Core
//!
//! Spatial tracking and force simulation for a real-time multi-entity combat sim.
//!
//! # Features
//!
//! - `parallel_forces` - Compute per-source force contributions on the rayon pool
//!   when a category has many sources (enabled by default)

pub mod config;
pub mod game;
pub mod util;

pub use config::{ConfigError, SimulationConfig};
pub use game::context::{SimulationBuilder, SimulationContext};
