pub mod body;
pub mod constants;
pub mod context;
pub mod entity;
pub mod force;
pub mod registry;
pub mod spatial;
pub mod systems;
pub mod team;
pub mod tracker;
