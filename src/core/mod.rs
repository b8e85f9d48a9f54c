//! Core primitives.
//!
//! Grid geometry and the seeded RNG shared by the map loader and the world.

pub mod geometry;
pub mod rng;

// Re-export core types
pub use geometry::{Direction, Rect, TilePos};
pub use rng::DeterministicRng;
