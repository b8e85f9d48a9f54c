//! Grid Geometry
//!
//! Tile coordinates, cardinal directions, and axis-aligned rectangles
//! in continuous map units.

use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// DIRECTION
// =============================================================================

/// Cardinal movement direction, encoded on the wire as a WASD key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub enum Direction {
    /// North (`w`), decreasing y.
    #[default]
    #[serde(rename = "w")]
    Up,
    /// West (`a`), decreasing x.
    #[serde(rename = "a")]
    Left,
    /// South (`s`), increasing y.
    #[serde(rename = "s")]
    Down,
    /// East (`d`), increasing x.
    #[serde(rename = "d")]
    Right,
}

impl Direction {
    /// All four directions in ray-casting order.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Left,
        Direction::Down,
        Direction::Right,
    ];

    /// WASD key for this direction.
    pub fn key(self) -> char {
        match self {
            Direction::Up => 'w',
            Direction::Left => 'a',
            Direction::Down => 's',
            Direction::Right => 'd',
        }
    }

    /// Integer tile step `(dx, dy)`.
    #[inline]
    pub fn tile_delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Left => (-1, 0),
            Direction::Down => (0, 1),
            Direction::Right => (1, 0),
        }
    }

    /// Unit vector `(dx, dy)` in continuous units.
    #[inline]
    pub fn delta(self) -> (f64, f64) {
        let (dx, dy) = self.tile_delta();
        (dx as f64, dy as f64)
    }

    /// True for left/right.
    #[inline]
    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }

    /// True for right/down (increasing coordinate).
    #[inline]
    pub fn is_positive(self) -> bool {
        matches!(self, Direction::Right | Direction::Down)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// =============================================================================
// TILE POSITION
// =============================================================================

/// Integer grid cell. Ordered row-major so BTreeMap iteration is stable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TilePos {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl TilePos {
    /// Create a tile position.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Cell `distance` steps away in `direction`.
    #[inline]
    pub fn step(self, direction: Direction, distance: i32) -> Self {
        let (dx, dy) = direction.tile_delta();
        Self::new(self.x + dx * distance, self.y + dy * distance)
    }

    /// Tile-sized bounding box of this cell.
    #[inline]
    pub fn rect(self, tile: f64) -> Rect {
        Rect::new(self.x as f64 * tile, self.y as f64 * tile, tile, tile)
    }

    /// As `[x, y]` for wire payloads.
    pub fn to_array(self) -> [i32; 2] {
        [self.x, self.y]
    }
}

impl Ord for TilePos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.y.cmp(&other.y).then(self.x.cmp(&other.x))
    }
}

impl PartialOrd for TilePos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// =============================================================================
// RECT
// =============================================================================

/// Axis-aligned rectangle in continuous map units (y grows downward).
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub left: f64,
    /// Top edge.
    pub top: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Rect {
    /// Create a rectangle from its top-left corner and size.
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    /// Right edge (exclusive).
    #[inline]
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    /// Bottom edge (exclusive).
    #[inline]
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// True when the interiors overlap. Rectangles sharing only an edge
    /// do not intersect.
    #[inline]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.left < other.right()
            && other.left < self.right()
            && self.top < other.bottom()
            && other.top < self.bottom()
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rect) -> Rect {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(left, top, right - left, bottom - top)
    }

    /// Every tile cell this rectangle covers.
    pub fn covered_tiles(&self, tile: f64) -> Vec<TilePos> {
        let x0 = (self.left / tile).floor() as i32;
        let y0 = (self.top / tile).floor() as i32;
        let x1 = (self.right() / tile).ceil() as i32;
        let y1 = (self.bottom() / tile).ceil() as i32;
        let mut tiles = Vec::new();
        for y in y0..y1 {
            for x in x0..x1 {
                tiles.push(TilePos::new(x, y));
            }
        }
        tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_keys() {
        let keys: String = Direction::ALL.iter().map(|d| d.key()).collect();
        assert_eq!(keys, "wasd");
        assert_eq!(Direction::Right.to_string(), "d");
    }

    #[test]
    fn test_direction_wire_names() {
        let json = serde_json::to_string(&Direction::Right).unwrap();
        assert_eq!(json, "\"d\"");
        let parsed: Direction = serde_json::from_str("\"w\"").unwrap();
        assert_eq!(parsed, Direction::Up);
        assert!(serde_json::from_str::<Direction>("\"q\"").is_err());
    }

    #[test]
    fn test_tile_step() {
        let origin = TilePos::new(3, 3);
        assert_eq!(origin.step(Direction::Right, 2), TilePos::new(5, 3));
        assert_eq!(origin.step(Direction::Up, 1), TilePos::new(3, 2));
    }

    #[test]
    fn test_tile_ordering_is_row_major() {
        let a = TilePos::new(9, 0);
        let b = TilePos::new(0, 1);
        assert!(a < b);
    }

    #[test]
    fn test_edge_contact_is_not_intersection() {
        let a = TilePos::new(4, 3).rect(10.0);
        let b = TilePos::new(5, 3).rect(10.0);
        assert!(!a.intersects(&b));

        let nudged = Rect::new(49.5, 30.0, 10.0, 10.0);
        assert!(nudged.intersects(&b));
        assert!(nudged.intersects(&a));
    }

    #[test]
    fn test_union_and_cover() {
        let a = TilePos::new(3, 3).rect(10.0);
        let b = TilePos::new(5, 3).rect(10.0);
        let u = a.union(&b);
        assert_eq!(u, Rect::new(30.0, 30.0, 30.0, 10.0));
        assert_eq!(
            u.covered_tiles(10.0),
            vec![TilePos::new(3, 3), TilePos::new(4, 3), TilePos::new(5, 3)]
        );
    }
}
