//! Explosive Devices
//!
//! A device ticks down its fuse, explodes (casting a blast ray in each
//! cardinal direction), burns for a while, then hides. Transitions are
//! guarded so a device only ever moves forward through its lifecycle.
//!
//! ```text
//! Ticking --fuse--> Exploding --window--> Burning --window--> Hiding
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::core::geometry::{Direction, Rect, TilePos};
use crate::game::grid::SlotId;
use crate::game::player::Color;

/// Registry key for devices and blast trails.
pub type ItemId = u32;

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Lifecycle stage of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Fuse burning down.
    Ticking,
    /// Rays cast, trails live.
    Exploding,
    /// Trails still live, no new ray work.
    Burning,
    /// Spent; purged at the end of the tick.
    Hiding,
}

impl DeviceState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: DeviceState) -> bool {
        matches!(
            (self, next),
            (DeviceState::Ticking, DeviceState::Exploding)
                | (DeviceState::Exploding, DeviceState::Burning)
                | (DeviceState::Burning, DeviceState::Hiding)
        )
    }

    /// Stage that follows when the current timer runs out.
    pub fn successor(self) -> Option<DeviceState> {
        match self {
            DeviceState::Ticking => Some(DeviceState::Exploding),
            DeviceState::Exploding => Some(DeviceState::Burning),
            DeviceState::Burning => Some(DeviceState::Hiding),
            DeviceState::Hiding => None,
        }
    }

    /// True while the blast is live (trails can ignite other devices).
    pub fn is_blasting(self) -> bool {
        matches!(self, DeviceState::Exploding | DeviceState::Burning)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Ticking => "ticking",
            DeviceState::Exploding => "exploding",
            DeviceState::Burning => "burning",
            DeviceState::Hiding => "hiding",
        };
        f.write_str(name)
    }
}

/// Duration of the post-fuse stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlastTimings {
    /// Time spent exploding.
    pub explode: Duration,
    /// Time spent burning.
    pub burn: Duration,
}

impl BlastTimings {
    fn window(&self, state: DeviceState) -> Duration {
        match state {
            DeviceState::Exploding => self.explode,
            DeviceState::Burning => self.burn,
            DeviceState::Ticking | DeviceState::Hiding => Duration::ZERO,
        }
    }
}

// =============================================================================
// DEVICE
// =============================================================================

/// A placed bomb.
#[derive(Clone, Debug)]
pub struct Device {
    /// Slot of the player who placed it.
    pub owner: SlotId,
    /// Account name of the owner, for crediting after disconnect.
    pub owner_name: String,
    /// Cell the device sits on.
    pub position: TilePos,
    /// Blast reach in tiles.
    pub explosion_radius: u32,
    /// Owner's color, inherited by trails.
    pub color: Color,
    /// Destructible walls the blast rays stopped on.
    pub walls_to_destroy: Vec<TilePos>,
    /// Trail items spawned on explosion.
    pub trails: Vec<ItemId>,
    state: DeviceState,
    timer: Duration,
    ignited: BTreeSet<ItemId>,
}

impl Device {
    /// Create a ticking device.
    pub fn new(
        owner: SlotId,
        owner_name: String,
        position: TilePos,
        fuse: Duration,
        explosion_radius: u32,
        color: Color,
    ) -> Self {
        Self {
            owner,
            owner_name,
            position,
            explosion_radius,
            color,
            walls_to_destroy: Vec::new(),
            trails: Vec::new(),
            state: DeviceState::Ticking,
            timer: fuse,
            ignited: BTreeSet::new(),
        }
    }

    /// Current lifecycle stage.
    #[inline]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Time left in the current stage.
    #[inline]
    pub fn timer(&self) -> Duration {
        self.timer
    }

    /// True until the device hides.
    #[inline]
    pub fn is_visible(&self) -> bool {
        self.state != DeviceState::Hiding
    }

    /// Bounding box in map units.
    pub fn rect(&self, tile: f64) -> Rect {
        self.position.rect(tile)
    }

    /// Guarded transition. Illegal requests are ignored and return false.
    pub fn transition_to(&mut self, next: DeviceState, timings: &BlastTimings) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.timer = timings.window(next);
        true
    }

    /// Skip the rest of the fuse. No effect unless ticking.
    pub fn ignite(&mut self, timings: &BlastTimings) -> bool {
        self.state == DeviceState::Ticking && self.transition_to(DeviceState::Exploding, timings)
    }

    /// Count down by `dt`; returns the stage entered, at most one per call.
    pub fn advance(&mut self, dt: Duration, timings: &BlastTimings) -> Option<DeviceState> {
        let next = self.state.successor()?;
        self.timer = self.timer.saturating_sub(dt);
        if !self.timer.is_zero() {
            return None;
        }
        self.transition_to(next, timings).then_some(next)
    }

    /// Remember that this blast has scheduled `device`. Returns false if it
    /// already had.
    pub fn mark_ignited(&mut self, device: ItemId) -> bool {
        self.ignited.insert(device)
    }
}

// =============================================================================
// BLAST TRAILS
// =============================================================================

/// Visible blast segment from a device to where its ray stopped.
#[derive(Clone, Debug, PartialEq)]
pub struct BlastTrail {
    /// Device that produced this trail.
    pub source: ItemId,
    /// Covered area in map units.
    pub rect: Rect,
    /// Owner's color.
    pub color: Color,
    /// Set when the source device hides.
    pub hidden: bool,
}

/// What a ray finds in a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellContents {
    /// Off the grid.
    OutOfBounds,
    /// Nothing in the way.
    Open,
    /// A wall already destroyed this tick.
    HiddenWall,
    /// A standing wall.
    Wall { destructible: bool },
}

/// Result of casting one blast ray.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ray {
    /// Heading.
    pub direction: Direction,
    /// Last cell the blast reaches (the origin if blocked immediately).
    pub terminal: TilePos,
    /// Destructible wall the ray stopped on.
    pub destroys: Option<TilePos>,
}

impl Ray {
    /// Trail rectangle from origin to terminal, inclusive.
    pub fn trail_rect(&self, origin: TilePos, tile: f64) -> Rect {
        origin.rect(tile).union(&self.terminal.rect(tile))
    }
}

/// Walk up to `radius` cells from `origin`. Stops before leaving the grid
/// and on (inclusive) the first wall, hidden or not.
pub fn cast_ray(
    origin: TilePos,
    direction: Direction,
    radius: u32,
    mut inspect: impl FnMut(TilePos) -> CellContents,
) -> Ray {
    let mut ray = Ray { direction, terminal: origin, destroys: None };
    for distance in 1..=radius as i32 {
        let cell = origin.step(direction, distance);
        match inspect(cell) {
            CellContents::OutOfBounds => break,
            CellContents::Open => ray.terminal = cell,
            CellContents::HiddenWall => {
                ray.terminal = cell;
                break;
            }
            CellContents::Wall { destructible } => {
                ray.terminal = cell;
                if destructible {
                    ray.destroys = Some(cell);
                }
                break;
            }
        }
    }
    ray
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> BlastTimings {
        BlastTimings {
            explode: Duration::from_millis(200),
            burn: Duration::from_millis(1500),
        }
    }

    fn device(fuse_ms: u64) -> Device {
        Device::new(
            "1".into(),
            "alice".into(),
            TilePos::new(3, 3),
            Duration::from_millis(fuse_ms),
            1,
            [0x80, 0, 0],
        )
    }

    #[test]
    fn test_transition_table() {
        use DeviceState::*;
        assert!(Ticking.can_transition_to(Exploding));
        assert!(Exploding.can_transition_to(Burning));
        assert!(Burning.can_transition_to(Hiding));
        assert!(!Ticking.can_transition_to(Burning));
        assert!(!Hiding.can_transition_to(Ticking));
        assert!(!Burning.can_transition_to(Exploding));
    }

    #[test]
    fn test_illegal_transition_ignored() {
        let mut d = device(5000);
        assert!(!d.transition_to(DeviceState::Hiding, &timings()));
        assert_eq!(d.state(), DeviceState::Ticking);
    }

    #[test]
    fn test_fuse_fires_exactly_on_time() {
        let mut d = device(5000);
        let step = Duration::from_millis(100);
        for _ in 0..49 {
            assert_eq!(d.advance(step, &timings()), None);
        }
        assert_eq!(d.advance(step, &timings()), Some(DeviceState::Exploding));
        assert_eq!(d.timer(), Duration::from_millis(200));
    }

    #[test]
    fn test_one_stage_per_tick() {
        let mut d = device(100);
        let huge = Duration::from_secs(10);
        assert_eq!(d.advance(huge, &timings()), Some(DeviceState::Exploding));
        assert_eq!(d.advance(huge, &timings()), Some(DeviceState::Burning));
        assert_eq!(d.advance(huge, &timings()), Some(DeviceState::Hiding));
        assert_eq!(d.advance(huge, &timings()), None);
        assert!(!d.is_visible());
    }

    #[test]
    fn test_ignite_only_when_ticking() {
        let mut d = device(5000);
        assert!(d.ignite(&timings()));
        assert_eq!(d.state(), DeviceState::Exploding);
        assert!(!d.ignite(&timings()));
        assert_eq!(d.state(), DeviceState::Exploding);
    }

    #[test]
    fn test_mark_ignited_once() {
        let mut d = device(5000);
        assert!(d.mark_ignited(7));
        assert!(!d.mark_ignited(7));
    }

    #[test]
    fn test_ray_stops_on_destructible_wall() {
        let origin = TilePos::new(3, 3);
        let ray = cast_ray(origin, Direction::Right, 3, |cell| {
            if cell == TilePos::new(4, 3) {
                CellContents::Wall { destructible: true }
            } else {
                CellContents::Open
            }
        });
        assert_eq!(ray.terminal, TilePos::new(4, 3));
        assert_eq!(ray.destroys, Some(TilePos::new(4, 3)));
        assert_eq!(ray.trail_rect(origin, 10.0), Rect::new(30.0, 30.0, 20.0, 10.0));
    }

    #[test]
    fn test_ray_stops_before_edge() {
        let ray = cast_ray(TilePos::new(0, 0), Direction::Up, 2, |cell| {
            if cell.y < 0 { CellContents::OutOfBounds } else { CellContents::Open }
        });
        assert_eq!(ray.terminal, TilePos::new(0, 0));
        assert_eq!(ray.destroys, None);
    }

    #[test]
    fn test_ray_indestructible_blocks_without_destroying() {
        let ray = cast_ray(TilePos::new(3, 3), Direction::Down, 2, |cell| {
            if cell.y == 5 { CellContents::Wall { destructible: false } } else { CellContents::Open }
        });
        assert_eq!(ray.terminal, TilePos::new(3, 5));
        assert_eq!(ray.destroys, None);
    }

    #[test]
    fn test_ray_stops_on_hidden_wall() {
        let ray = cast_ray(TilePos::new(3, 3), Direction::Left, 3, |cell| {
            if cell.x == 2 { CellContents::HiddenWall } else { CellContents::Open }
        });
        assert_eq!(ray.terminal, TilePos::new(2, 3));
        assert_eq!(ray.destroys, None);
    }
}
