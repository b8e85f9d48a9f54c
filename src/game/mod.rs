//! Game Logic Module
//!
//! Everything the world tick touches. No I/O happens here.
//!
//! ## Module Structure
//!
//! - `grid`: Map text parsing, tile kinds, spawn slots
//! - `player`: Player state and spawn colors
//! - `movement`: Swept movement, hard stops, corner sliding
//! - `device`: Bomb state machine and blast rays
//! - `world`: Entity registry and the per-tick update
//! - `events`: Game events for logging

pub mod grid;
pub mod player;
pub mod movement;
pub mod device;
pub mod world;
pub mod events;

// Re-export key types
pub use grid::{Grid, MapError, MapLoadOptions, SlotId, TileKind};
pub use player::{Player, Color};
pub use device::{Device, DeviceState, ItemId};
pub use world::{GameConfig, JoinError, TickResult, World};
pub use events::{GameEvent, GameEventData};
