//! Game Events
//!
//! Events generated during simulation, drained once per tick for logging.

use serde::{Serialize, Deserialize};

use crate::core::geometry::TilePos;
use crate::game::device::ItemId;
use crate::game::grid::SlotId;

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEventData {
    /// Player took a spawn slot
    PlayerJoined {
        slot: SlotId,
        name: String,
        resumed: bool,
    },

    /// Player released its slot
    PlayerLeft {
        slot: SlotId,
        name: String,
        score: u32,
    },

    /// Device placed
    BombPlaced {
        device: ItemId,
        owner: SlotId,
        position: TilePos,
    },

    /// Device entered its exploding stage
    BombExploded {
        device: ItemId,
        position: TilePos,
        walls_marked: u32,
    },

    /// A blast scheduled another device to go off
    ChainIgnitionScheduled {
        source: ItemId,
        target: ItemId,
    },

    /// A scheduled ignition fired
    ChainIgnited {
        device: ItemId,
    },

    /// Wall removed by a blast
    WallDestroyed {
        position: TilePos,
        owner: SlotId,
    },

    /// Device hid and credited its owner
    BombSpent {
        device: ItemId,
        owner: SlotId,
        points: u32,
    },
}

/// A game event stamped with its tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when event occurred
    pub tick: u64,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u64, data: GameEventData) -> Self {
        Self { tick, data }
    }

    /// Slot of the player this event concerns, if any.
    pub fn slot(&self) -> Option<&SlotId> {
        match &self.data {
            GameEventData::PlayerJoined { slot, .. }
            | GameEventData::PlayerLeft { slot, .. } => Some(slot),
            GameEventData::BombPlaced { owner, .. }
            | GameEventData::WallDestroyed { owner, .. }
            | GameEventData::BombSpent { owner, .. } => Some(owner),
            _ => None,
        }
    }

    /// Create player joined event.
    pub fn player_joined(tick: u64, slot: SlotId, name: String, resumed: bool) -> Self {
        Self::new(tick, GameEventData::PlayerJoined { slot, name, resumed })
    }

    /// Create player left event.
    pub fn player_left(tick: u64, slot: SlotId, name: String, score: u32) -> Self {
        Self::new(tick, GameEventData::PlayerLeft { slot, name, score })
    }

    /// Create bomb placed event.
    pub fn bomb_placed(tick: u64, device: ItemId, owner: SlotId, position: TilePos) -> Self {
        Self::new(tick, GameEventData::BombPlaced { device, owner, position })
    }

    /// Create bomb exploded event.
    pub fn bomb_exploded(tick: u64, device: ItemId, position: TilePos, walls_marked: u32) -> Self {
        Self::new(tick, GameEventData::BombExploded { device, position, walls_marked })
    }

    /// Create chain ignition scheduled event.
    pub fn chain_scheduled(tick: u64, source: ItemId, target: ItemId) -> Self {
        Self::new(tick, GameEventData::ChainIgnitionScheduled { source, target })
    }

    /// Create chain ignited event.
    pub fn chain_ignited(tick: u64, device: ItemId) -> Self {
        Self::new(tick, GameEventData::ChainIgnited { device })
    }

    /// Create wall destroyed event.
    pub fn wall_destroyed(tick: u64, position: TilePos, owner: SlotId) -> Self {
        Self::new(tick, GameEventData::WallDestroyed { position, owner })
    }

    /// Create bomb spent event.
    pub fn bomb_spent(tick: u64, device: ItemId, owner: SlotId, points: u32) -> Self {
        Self::new(tick, GameEventData::BombSpent { device, owner, points })
    }
}
