pub mod cells;
pub mod configuration;
pub mod lattice;
pub mod registry;
pub mod species;
pub mod types;
