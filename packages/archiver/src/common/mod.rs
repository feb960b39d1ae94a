// Common types and utilities shared across domains

pub mod entity_ids;
pub mod id;
pub mod utils;

pub use entity_ids::*;
