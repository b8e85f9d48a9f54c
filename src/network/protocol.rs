//! Protocol Messages
//!
//! Wire format for client-server communication. Every frame is a single
//! MessagePack value.
//!
//! Clients send a map whose `type` key names the command:
//!
//! ```text
//! {"type": "move", "direction": "d", "distance": 2}
//! ```
//!
//! The server replies with a two-element array `[TAG, payload]`, payload
//! structs encoded as maps.

use serde::{Serialize, Deserialize};

use crate::core::geometry::Direction;
use crate::game::device::{Device, DeviceState, ItemId};
use crate::game::player::{Color, Player};
use crate::network::codec::CodecError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Commands sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Join the arena under a username.
    Connect { username: String },

    /// Replace pending motion with `distance` tiles toward `direction`.
    Move {
        direction: Direction,
        #[serde(default = "default_distance")]
        distance: f64,
    },

    /// Place a device at the player's tile. `fuse_time` is in seconds.
    Bomb {
        #[serde(default)]
        fuse_time: Option<f64>,
    },

    /// Ask for the caller's own state.
    Whoami,

    /// Ask for the rendered map.
    Map,

    /// Ask for every live device.
    WhatBombs,
}

fn default_distance() -> f64 {
    1.0
}

impl ClientCommand {
    /// Command name as sent on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Connect { .. } => "connect",
            ClientCommand::Move { .. } => "move",
            ClientCommand::Bomb { .. } => "bomb",
            ClientCommand::Whoami => "whoami",
            ClientCommand::Map => "map",
            ClientCommand::WhatBombs => "what_bombs",
        }
    }

    /// Encode as a MessagePack map (what a client sends).
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Join acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinAck {
    /// Slot assigned.
    pub slot: String,
    /// Username.
    pub name: String,
    /// Avatar color.
    pub color: Color,
    /// Continuous position `[x, y]`.
    pub position: [f64; 2],
    /// Tile `[x, y]`.
    pub tile: [i32; 2],
    /// Score carried over from earlier sessions.
    pub score: u32,
    /// True if this username had played before.
    pub resumed: bool,
}

/// Full state of one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Slot held.
    pub slot: String,
    /// Username.
    pub name: String,
    /// Avatar color.
    pub color: Color,
    /// Continuous position `[x, y]`.
    pub position: [f64; 2],
    /// Tile `[x, y]`.
    pub tile: [i32; 2],
    /// Heading.
    pub direction: Direction,
    /// Tiles still to travel.
    pub remaining: f64,
    /// Devices allowed at once.
    pub bomb_capacity: u32,
    /// Blast reach in tiles.
    pub explosion_radius: u32,
    /// Score.
    pub score: u32,
}

impl PlayerInfo {
    /// Snapshot a player.
    pub fn from_player(player: &Player, tile: f64) -> Self {
        Self {
            slot: player.slot.clone(),
            name: player.name.clone(),
            color: player.color,
            position: [player.x, player.y],
            tile: player.tile_position(tile).to_array(),
            direction: player.direction,
            remaining: player.remaining / tile,
            bomb_capacity: player.bomb_capacity,
            explosion_radius: player.explosion_radius,
            score: player.score,
        }
    }
}

impl JoinAck {
    /// Acknowledge a join for `player`.
    pub fn from_player(player: &Player, tile: f64, resumed: bool) -> Self {
        Self {
            slot: player.slot.clone(),
            name: player.name.clone(),
            color: player.color,
            position: [player.x, player.y],
            tile: player.tile_position(tile).to_array(),
            score: player.score,
            resumed,
        }
    }
}

/// One live device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombReport {
    /// Device id.
    pub id: ItemId,
    /// Tile `[x, y]`.
    pub position: [i32; 2],
    /// Seconds left in the current state.
    pub timer: f64,
    /// Lifecycle stage.
    pub state: DeviceState,
    /// Owner's slot.
    pub owner: String,
}

impl BombReport {
    /// Snapshot a device.
    pub fn from_device(id: ItemId, device: &Device) -> Self {
        Self {
            id,
            position: device.position.to_array(),
            timer: device.timer().as_secs_f64(),
            state: device.state(),
            owner: device.owner.clone(),
        }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Join accepted.
    Ok(JoinAck),
    /// Command accepted; payload names the command.
    Ack(String),
    /// Command rejected.
    Err(String),
    /// Caller's state.
    WhoAmI(PlayerInfo),
    /// Rendered map rows.
    Map(Vec<String>),
    /// Live devices.
    WhatBombs(Vec<BombReport>),
}

impl ServerMessage {
    /// Wire tag.
    pub fn tag(&self) -> &'static str {
        match self {
            ServerMessage::Ok(_) => "OK",
            ServerMessage::Ack(_) => "ACK",
            ServerMessage::Err(_) => "ERR",
            ServerMessage::WhoAmI(_) => "WHOAMI",
            ServerMessage::Map(_) => "MAP",
            ServerMessage::WhatBombs(_) => "WHAT_BOMBS",
        }
    }

    /// Encode as `[TAG, payload]`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let tag = self.tag();
        let bytes = match self {
            ServerMessage::Ok(ack) => rmp_serde::to_vec_named(&(tag, ack))?,
            ServerMessage::Ack(name) => rmp_serde::to_vec_named(&(tag, name))?,
            ServerMessage::Err(message) => rmp_serde::to_vec_named(&(tag, message))?,
            ServerMessage::WhoAmI(info) => rmp_serde::to_vec_named(&(tag, info))?,
            ServerMessage::Map(rows) => rmp_serde::to_vec_named(&(tag, rows))?,
            ServerMessage::WhatBombs(bombs) => rmp_serde::to_vec_named(&(tag, bombs))?,
        };
        Ok(bytes)
    }

    /// Decode a `[TAG, payload]` frame.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        let (tag, payload): (String, serde_json::Value) = rmp_serde::from_slice(data)?;
        let message = match tag.as_str() {
            "OK" => ServerMessage::Ok(serde_json::from_value(payload)?),
            "ACK" => ServerMessage::Ack(serde_json::from_value(payload)?),
            "ERR" => ServerMessage::Err(serde_json::from_value(payload)?),
            "WHOAMI" => ServerMessage::WhoAmI(serde_json::from_value(payload)?),
            "MAP" => ServerMessage::Map(serde_json::from_value(payload)?),
            "WHAT_BOMBS" => ServerMessage::WhatBombs(serde_json::from_value(payload)?),
            other => return Err(CodecError::Malformed(format!("unknown reply tag {other:?}"))),
        };
        Ok(message)
    }
}
