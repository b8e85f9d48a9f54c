//! Movement and Collision
//!
//! Advances one player's pending motion by a single tick. The motion is
//! swept against static obstacles: an obstacle squarely in the path stops
//! the player flush against it, while a player clipping a corner is eased
//! onto the nearest lane and keeps going.

use crate::core::geometry::{Direction, Rect, TilePos};
use crate::game::player::Player;

/// Something a player cannot walk through.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Obstacle {
    /// Cell the obstacle occupies.
    pub tile: TilePos,
    /// Bounding box in map units.
    pub rect: Rect,
}

impl Obstacle {
    /// Tile-sized obstacle at a cell.
    pub fn at(tile: TilePos, size: f64) -> Self {
        Self { tile, rect: tile.rect(size) }
    }
}

/// Playable extent in map units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Arena {
    /// Tile edge length.
    pub tile: f64,
    /// Total width.
    pub width: f64,
    /// Total height.
    pub height: f64,
}

impl Arena {
    /// Arena covering a `columns` x `rows` grid.
    pub fn new(columns: usize, rows: usize, tile: f64) -> Self {
        Self {
            tile,
            width: columns as f64 * tile,
            height: rows as f64 * tile,
        }
    }

    /// Largest legal left edge.
    #[inline]
    pub fn max_x(&self) -> f64 {
        (self.width - self.tile).max(0.0)
    }

    /// Largest legal top edge.
    #[inline]
    pub fn max_y(&self) -> f64 {
        (self.height - self.tile).max(0.0)
    }
}

/// What happened to a player this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// No motion pending.
    Idle,
    /// Moved freely (possibly clamped at the arena edge).
    Moved,
    /// Stopped against an obstacle.
    Blocked,
    /// Eased around a corner.
    Slid,
}

/// Advance `player` by `dt` seconds of motion.
pub fn advance(player: &mut Player, dt: f64, arena: &Arena, obstacles: &[Obstacle]) -> MoveOutcome {
    if player.remaining <= 0.0 || dt <= 0.0 {
        return MoveOutcome::Idle;
    }

    let tile = arena.tile;
    let step = (dt * player.speed).min(player.remaining);
    player.remaining -= step;

    let (dx, dy) = player.direction.delta();
    let mut x = player.x + dx * step;
    let mut y = player.y + dy * step;

    if x < 0.0 || x > arena.max_x() || y < 0.0 || y > arena.max_y() {
        x = x.clamp(0.0, arena.max_x());
        y = y.clamp(0.0, arena.max_y());
        player.remaining = 0.0;
    }

    let current = player.rect(tile);
    let target = Rect::new(x, y, tile, tile);
    let swept = current.union(&target);

    let colliding: Vec<&Obstacle> = obstacles
        .iter()
        .filter(|o| o.rect.intersects(&swept) && !o.rect.intersects(&current))
        .collect();

    if colliding.is_empty() {
        player.x = x;
        player.y = y;
        return MoveOutcome::Moved;
    }

    let ahead = next_tile(player, tile);
    let in_path = colliding.iter().any(|o| o.tile == ahead);
    if in_path || misalignment(player, tile) == 0.0 {
        let (fx, fy) = flush_against(player.direction, &colliding, x, y, tile);
        player.x = fx;
        player.y = fy;
        player.remaining = 0.0;
        return MoveOutcome::Blocked;
    }

    slide(player, step, arena, obstacles);
    MoveOutcome::Slid
}

/// Cell the player enters next along its heading, using the rounded lane
/// on the perpendicular axis.
fn next_tile(player: &Player, tile: f64) -> TilePos {
    let along = |p: f64, positive: bool| -> i32 {
        if positive {
            (p / tile).ceil() as i32 + 1
        } else {
            (p / tile).floor() as i32 - 1
        }
    };
    let lane = |p: f64| (p / tile).round() as i32;

    match player.direction {
        Direction::Left | Direction::Right => {
            TilePos::new(along(player.x, player.direction.is_positive()), lane(player.y))
        }
        Direction::Up | Direction::Down => {
            TilePos::new(lane(player.x), along(player.y, player.direction.is_positive()))
        }
    }
}

/// Signed offset from the nearest lane on the axis perpendicular to travel.
fn misalignment(player: &Player, tile: f64) -> f64 {
    let p = if player.direction.is_horizontal() { player.y } else { player.x };
    (p / tile).round() * tile - p
}

/// Position flush against the nearest collider in the direction of travel.
fn flush_against(direction: Direction, colliding: &[&Obstacle], x: f64, y: f64, tile: f64) -> (f64, f64) {
    let nearest_max = |edge: fn(&Rect) -> f64| {
        colliding.iter().map(|o| edge(&o.rect)).fold(f64::NEG_INFINITY, f64::max)
    };
    let nearest_min = |edge: fn(&Rect) -> f64| {
        colliding.iter().map(|o| edge(&o.rect)).fold(f64::INFINITY, f64::min)
    };

    match direction {
        Direction::Up => (x, nearest_max(Rect::bottom)),
        Direction::Left => (nearest_max(Rect::right), y),
        Direction::Down => (x, nearest_min(|r| r.top) - tile),
        Direction::Right => (nearest_min(|r| r.left) - tile, y),
    }
}

/// Spend this tick's distance easing onto the nearest lane, then carry any
/// leftover along the heading when that opens no new overlap.
fn slide(player: &mut Player, step: f64, arena: &Arena, obstacles: &[Obstacle]) {
    let tile = arena.tile;
    let offset = misalignment(player, tile);
    let shift = offset.abs().min(step).copysign(offset);
    if player.direction.is_horizontal() {
        player.y += shift;
    } else {
        player.x += shift;
    }

    let leftover = step - shift.abs();
    if leftover <= 0.0 {
        return;
    }

    let (dx, dy) = player.direction.delta();
    let x = (player.x + dx * leftover).clamp(0.0, arena.max_x());
    let y = (player.y + dy * leftover).clamp(0.0, arena.max_y());
    let here = player.rect(tile);
    let there = Rect::new(x, y, tile, tile);
    let opens_overlap = obstacles
        .iter()
        .any(|o| o.rect.intersects(&there) && !o.rect.intersects(&here));
    if !opens_overlap {
        player.x = x;
        player.y = y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::PlayerStats;
    use proptest::prelude::*;

    const TILE: f64 = 10.0;

    fn player_at(x: f64, y: f64) -> Player {
        let stats = PlayerStats { speed: 40.0, bomb_capacity: 1, explosion_radius: 1 };
        let mut p = Player::new("1".into(), "alice".into(), TilePos::new(0, 0), TILE, stats, 0);
        p.x = x;
        p.y = y;
        p
    }

    fn arena() -> Arena {
        Arena::new(10, 10, TILE)
    }

    #[test]
    fn test_idle_without_motion() {
        let mut p = player_at(50.0, 50.0);
        assert_eq!(advance(&mut p, 0.1, &arena(), &[]), MoveOutcome::Idle);
        assert_eq!((p.x, p.y), (50.0, 50.0));
    }

    #[test]
    fn test_move_one_tile_open_field() {
        let mut p = player_at(50.0, 50.0);
        p.set_motion(Direction::Right, 1.0, TILE);
        assert_eq!(advance(&mut p, 1.0, &arena(), &[]), MoveOutcome::Moved);
        assert_eq!(p.tile_position(TILE), TilePos::new(6, 5));
        assert_eq!(p.remaining, 0.0);
    }

    #[test]
    fn test_partial_step_keeps_remaining() {
        let mut p = player_at(50.0, 50.0);
        p.set_motion(Direction::Up, 1.0, TILE);
        advance(&mut p, 0.1, &arena(), &[]);
        assert!((p.y - 46.0).abs() < 1e-9);
        assert!((p.remaining - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamped_at_edge() {
        let mut p = player_at(5.0, 0.0);
        p.set_motion(Direction::Left, 3.0, TILE);
        advance(&mut p, 1.0, &arena(), &[]);
        assert_eq!(p.x, 0.0);
        assert_eq!(p.remaining, 0.0);
    }

    #[test]
    fn test_blocked_flush_right() {
        let mut p = player_at(10.0, 10.0);
        p.set_motion(Direction::Right, 5.0, TILE);
        let walls = [Obstacle::at(TilePos::new(3, 1), TILE)];
        assert_eq!(advance(&mut p, 1.0, &arena(), &walls), MoveOutcome::Blocked);
        assert_eq!(p.x, 20.0);
        assert_eq!(p.y, 10.0);
        assert_eq!(p.remaining, 0.0);
    }

    #[test]
    fn test_blocked_flush_up_picks_nearest() {
        let mut p = player_at(30.0, 60.0);
        p.set_motion(Direction::Up, 5.0, TILE);
        let walls = [
            Obstacle::at(TilePos::new(3, 2), TILE),
            Obstacle::at(TilePos::new(3, 4), TILE),
        ];
        advance(&mut p, 1.0, &arena(), &walls);
        assert_eq!(p.y, 50.0);
        assert_eq!(p.x, 30.0);
    }

    #[test]
    fn test_blocked_flush_left_and_down() {
        let mut p = player_at(60.0, 30.0);
        p.set_motion(Direction::Left, 5.0, TILE);
        advance(&mut p, 1.0, &arena(), &[Obstacle::at(TilePos::new(3, 3), TILE)]);
        assert_eq!(p.x, 40.0);

        let mut p = player_at(30.0, 10.0);
        p.set_motion(Direction::Down, 5.0, TILE);
        advance(&mut p, 1.0, &arena(), &[Obstacle::at(TilePos::new(3, 4), TILE)]);
        assert_eq!(p.y, 30.0);
    }

    #[test]
    fn test_corner_slide_onto_lane() {
        // Lane row 1 is open, the wall only clips the lower edge.
        let mut p = player_at(10.0, 12.0);
        p.set_motion(Direction::Right, 3.0, TILE);
        let walls = [Obstacle::at(TilePos::new(2, 2), TILE)];
        assert_eq!(advance(&mut p, 0.1, &arena(), &walls), MoveOutcome::Slid);
        assert!((p.y - 10.0).abs() < 1e-9);
        assert!((p.x - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_in_path_wall_stops_misaligned_player() {
        // Rounded lane is row 1 and the wall sits right on it.
        let mut p = player_at(10.0, 12.0);
        p.set_motion(Direction::Right, 3.0, TILE);
        let walls = [Obstacle::at(TilePos::new(2, 1), TILE)];
        assert_eq!(advance(&mut p, 0.1, &arena(), &walls), MoveOutcome::Blocked);
        assert_eq!(p.x, 10.0);
        assert_eq!(p.remaining, 0.0);
    }

    #[test]
    fn test_touching_obstacle_is_ignored() {
        // Already overlapping obstacles never block (e.g. a device under the player).
        let mut p = player_at(50.0, 50.0);
        p.set_motion(Direction::Right, 1.0, TILE);
        let under = [Obstacle::at(TilePos::new(5, 5), TILE)];
        assert_eq!(advance(&mut p, 1.0, &arena(), &under), MoveOutcome::Moved);
        assert_eq!(p.x, 60.0);
    }

    proptest! {
        #[test]
        fn prop_position_stays_in_bounds(
            col in 0i32..10,
            row in 0i32..10,
            dir in 0usize..4,
            tiles in 0.0f64..12.0,
            dt in 0.0f64..2.0,
            walls in proptest::collection::vec((0i32..10, 0i32..10), 0..20),
        ) {
            let mut p = player_at(col as f64 * TILE, row as f64 * TILE);
            p.set_motion(Direction::ALL[dir], tiles, TILE);
            let obstacles: Vec<Obstacle> = walls
                .into_iter()
                .filter(|&(x, y)| (x, y) != (col, row))
                .map(|(x, y)| Obstacle::at(TilePos::new(x, y), TILE))
                .collect();
            let arena = arena();
            for _ in 0..8 {
                advance(&mut p, dt, &arena, &obstacles);
                prop_assert!(p.x >= 0.0 && p.x <= arena.max_x());
                prop_assert!(p.y >= 0.0 && p.y <= arena.max_y());
                prop_assert!(p.remaining >= 0.0);
            }
        }
    }
}
