//! # Bomber Arena Server
//!
//! Authoritative server for a tile-based multiplayer bomber arena.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BOMBER SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── geometry.rs - Directions, tile positions, rectangles    │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  game/           - World simulation (no I/O)                 │
//! │  ├── grid.rs     - Map text loader                           │
//! │  ├── player.rs   - Player state and slot colors              │
//! │  ├── movement.rs - Swept movement and corner sliding         │
//! │  ├── device.rs   - Bomb state machine and blast rays         │
//! │  ├── world.rs    - Entity registry and per-tick update       │
//! │  └── events.rs   - Game events                               │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── codec.rs    - Streaming MessagePack decoder             │
//! │  ├── protocol.rs - Commands and replies                      │
//! │  ├── session.rs  - Per-connection command handling          │
//! │  └── server.rs   - TCP/WebSocket server and world task       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! The world is owned by one task. Commands are applied in arrival order
//! between ticks, and every map in the world is a `BTreeMap`, so a given
//! command sequence and seed always produce the same arena.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::geometry::{Direction, Rect, TilePos};
pub use core::rng::DeterministicRng;
pub use game::{GameConfig, Grid, World};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default world tick rate (Hz)
pub const TICK_RATE: u32 = 30;
