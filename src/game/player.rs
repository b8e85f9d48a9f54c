//! Player State
//!
//! A connected avatar: continuous position, pending motion, bomb capacity,
//! and score.

use serde::{Serialize, Deserialize};

use crate::core::geometry::{Direction, Rect, TilePos};
use crate::game::grid::SlotId;

/// RGB color.
pub type Color = [u8; 3];

/// Color for slots without an assigned one.
pub const NEUTRAL_COLOR: Color = [0x80, 0x80, 0x80];

/// Avatar color for a spawn slot.
pub fn slot_color(slot: &str) -> Color {
    match slot {
        "1" => [0x80, 0x00, 0x00],
        "2" => [0x00, 0x00, 0xFF],
        "3" => [0xFF, 0xFF, 0xFF],
        "4" => [0xFF, 0x66, 0x00],
        "5" => [0x00, 0x80, 0x00],
        "6" => [0x55, 0x22, 0x00],
        "7" => [0x80, 0x00, 0x80],
        "8" => [0xFF, 0xFF, 0x00],
        _ => NEUTRAL_COLOR,
    }
}

/// Per-player tunables copied from the game config at join.
#[derive(Clone, Copy, Debug)]
pub struct PlayerStats {
    /// Movement speed in map units per second.
    pub speed: f64,
    /// Max simultaneously ticking devices.
    pub bomb_capacity: u32,
    /// Blast reach in tiles.
    pub explosion_radius: u32,
}

/// A connected player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    /// Spawn slot this player occupies.
    pub slot: SlotId,
    /// Account name.
    pub name: String,
    /// Avatar color.
    pub color: Color,
    /// Left edge in map units.
    pub x: f64,
    /// Top edge in map units.
    pub y: f64,
    /// Current heading.
    pub direction: Direction,
    /// Distance still to travel, in map units.
    pub remaining: f64,
    /// Movement speed in map units per second.
    pub speed: f64,
    /// Max simultaneously ticking devices.
    pub bomb_capacity: u32,
    /// Blast reach in tiles.
    pub explosion_radius: u32,
    /// Walls destroyed by this player's devices.
    pub score: u32,
}

impl Player {
    /// Create a player standing on its spawn cell.
    pub fn new(
        slot: SlotId,
        name: String,
        spawn: TilePos,
        tile: f64,
        stats: PlayerStats,
        score: u32,
    ) -> Self {
        let color = slot_color(&slot);
        Self {
            slot,
            name,
            color,
            x: spawn.x as f64 * tile,
            y: spawn.y as f64 * tile,
            direction: Direction::default(),
            remaining: 0.0,
            speed: stats.speed,
            bomb_capacity: stats.bomb_capacity,
            explosion_radius: stats.explosion_radius,
            score,
        }
    }

    /// Cell containing the top-left corner.
    #[inline]
    pub fn tile_position(&self, tile: f64) -> TilePos {
        TilePos::new((self.x / tile).floor() as i32, (self.y / tile).floor() as i32)
    }

    /// Tile-sized bounding box.
    #[inline]
    pub fn rect(&self, tile: f64) -> Rect {
        Rect::new(self.x, self.y, tile, tile)
    }

    /// Replace any pending motion with `tiles` tiles toward `direction`.
    pub fn set_motion(&mut self, direction: Direction, tiles: f64, tile: f64) {
        self.direction = direction;
        self.remaining = (tiles * tile).max(0.0);
    }

    /// True while motion is pending.
    pub fn is_moving(&self) -> bool {
        self.remaining > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> PlayerStats {
        PlayerStats { speed: 40.0, bomb_capacity: 1, explosion_radius: 1 }
    }

    #[test]
    fn test_spawn_position() {
        let p = Player::new("1".into(), "alice".into(), TilePos::new(2, 3), 10.0, stats(), 0);
        assert_eq!(p.x, 20.0);
        assert_eq!(p.y, 30.0);
        assert_eq!(p.tile_position(10.0), TilePos::new(2, 3));
        assert_eq!(p.color, [0x80, 0x00, 0x00]);
        assert!(!p.is_moving());
    }

    #[test]
    fn test_tile_position_floors() {
        let mut p = Player::new("2".into(), "bob".into(), TilePos::new(0, 0), 10.0, stats(), 0);
        p.x = 59.9;
        p.y = 0.1;
        assert_eq!(p.tile_position(10.0), TilePos::new(5, 0));
    }

    #[test]
    fn test_set_motion_replaces_pending() {
        let mut p = Player::new("3".into(), "carol".into(), TilePos::new(0, 0), 10.0, stats(), 0);
        p.set_motion(Direction::Right, 3.0, 10.0);
        assert_eq!(p.remaining, 30.0);
        p.set_motion(Direction::Down, 0.5, 10.0);
        assert_eq!(p.direction, Direction::Down);
        assert_eq!(p.remaining, 5.0);
    }

    #[test]
    fn test_unknown_slot_is_neutral() {
        assert_eq!(slot_color("z"), NEUTRAL_COLOR);
        assert_eq!(slot_color("2"), [0x00, 0x00, 0xFF]);
    }
}
