//! Arena Grid
//!
//! Parses the textual map format into a fixed tile grid plus named spawn
//! slots. Each cell is two characters: an attribute followed by a glyph.
//!
//! | Glyph | Meaning                                                   |
//! |-------|-----------------------------------------------------------|
//! | `' '` | ground, randomly turned into a destructible wall           |
//! | `W`   | destructible wall                                         |
//! | `M`   | indestructible wall                                       |
//! | `S`   | spawn slot named by the attribute character (ground tile) |

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::debug;

use crate::core::geometry::TilePos;
use crate::core::rng::DeterministicRng;

/// Name of a spawn slot (the attribute character of an `S` cell).
pub type SlotId = String;

// =============================================================================
// ERRORS
// =============================================================================

/// Map parsing errors. Any of these is fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("map is empty")]
    EmptyMap,

    #[error("line {line} has an odd number of characters")]
    OddLineLength { line: usize },

    #[error("line {line} is {found} cells wide, expected {expected}")]
    RaggedLine { line: usize, expected: usize, found: usize },

    #[error("unknown glyph {glyph:?} at line {line}, column {column}")]
    UnknownGlyph { line: usize, column: usize, glyph: char },

    #[error("spawn slot {0:?} is defined more than once")]
    DuplicateSpawn(SlotId),
}

// =============================================================================
// TILES
// =============================================================================

/// Static content of one grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileKind {
    /// Walkable floor.
    Ground,
    /// Wall a blast can remove.
    DestructibleWall,
    /// Wall nothing removes.
    IndestructibleWall,
}

impl TileKind {
    /// True for either wall kind.
    #[inline]
    pub fn is_wall(self) -> bool {
        !matches!(self, TileKind::Ground)
    }

    /// True if blasts remove this tile.
    #[inline]
    pub fn is_destructible(self) -> bool {
        matches!(self, TileKind::DestructibleWall)
    }

    /// Map-file glyph for this tile.
    pub fn glyph(self) -> char {
        match self {
            TileKind::Ground => ' ',
            TileKind::DestructibleWall => 'W',
            TileKind::IndestructibleWall => 'M',
        }
    }
}

// =============================================================================
// LOAD OPTIONS
// =============================================================================

/// Controls random wall placement on empty cells.
pub struct MapLoadOptions<'a> {
    /// Chance an empty cell becomes a destructible wall.
    pub wall_probability: f64,
    /// RNG used for the draw. `None` leaves every empty cell as ground.
    pub rng: Option<&'a mut DeterministicRng>,
}

impl<'a> MapLoadOptions<'a> {
    /// Randomize empty cells with the given probability.
    pub fn randomized(rng: &'a mut DeterministicRng, wall_probability: f64) -> Self {
        Self { wall_probability, rng: Some(rng) }
    }

    /// Keep the map exactly as written.
    pub fn exact() -> Self {
        Self { wall_probability: 0.0, rng: None }
    }
}

// =============================================================================
// GRID
// =============================================================================

/// Immutable tile grid loaded from a map file.
#[derive(Clone)]
pub struct Grid {
    width: usize,
    height: usize,
    tiles: Vec<TileKind>,
    spawns: BTreeMap<SlotId, TilePos>,
}

impl Grid {
    /// Parse map text.
    ///
    /// Trailing blank lines are ignored. Every remaining line must be the
    /// same even length.
    pub fn parse(text: &str, mut options: MapLoadOptions<'_>) -> Result<Self, MapError> {
        let mut lines: Vec<&str> = text
            .lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        if lines.is_empty() {
            return Err(MapError::EmptyMap);
        }

        let mut width = None;
        let mut tiles = Vec::new();
        let mut spawns = BTreeMap::new();

        for (row, line) in lines.iter().enumerate() {
            let chars: Vec<char> = line.chars().collect();
            if chars.len() % 2 != 0 {
                return Err(MapError::OddLineLength { line: row + 1 });
            }
            let cells = chars.len() / 2;
            match width {
                None => width = Some(cells),
                Some(expected) if expected != cells => {
                    return Err(MapError::RaggedLine {
                        line: row + 1,
                        expected,
                        found: cells,
                    });
                }
                Some(_) => {}
            }

            for (col, pair) in chars.chunks(2).enumerate() {
                let (attr, glyph) = (pair[0], pair[1]);
                let kind = match glyph {
                    ' ' => {
                        let walled = match options.rng.as_deref_mut() {
                            Some(rng) => rng.next_bool(options.wall_probability),
                            None => false,
                        };
                        if walled { TileKind::DestructibleWall } else { TileKind::Ground }
                    }
                    'W' => TileKind::DestructibleWall,
                    'M' => TileKind::IndestructibleWall,
                    'S' => {
                        let slot = attr.to_string();
                        let pos = TilePos::new(col as i32, row as i32);
                        if spawns.insert(slot.clone(), pos).is_some() {
                            return Err(MapError::DuplicateSpawn(slot));
                        }
                        TileKind::Ground
                    }
                    other => {
                        return Err(MapError::UnknownGlyph {
                            line: row + 1,
                            column: col * 2 + 2,
                            glyph: other,
                        });
                    }
                };
                tiles.push(kind);
            }
        }

        let width = width.unwrap_or(0);
        let height = lines.len();
        debug!(width, height, spawns = spawns.len(), "Map parsed");

        Ok(Self { width, height, tiles, spawns })
    }

    /// Width in tiles.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in tiles.
    pub fn height(&self) -> usize {
        self.height
    }

    /// True if the cell lies on the grid.
    #[inline]
    pub fn in_bounds(&self, pos: TilePos) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as usize) < self.width && (pos.y as usize) < self.height
    }

    /// Tile at a cell, `None` when off the grid.
    pub fn tile(&self, pos: TilePos) -> Option<TileKind> {
        if !self.in_bounds(pos) {
            return None;
        }
        self.tiles.get(pos.y as usize * self.width + pos.x as usize).copied()
    }

    /// Spawn cell for a slot.
    pub fn spawn(&self, slot: &str) -> Option<TilePos> {
        self.spawns.get(slot).copied()
    }

    /// All spawn slots in name order.
    pub fn spawns(&self) -> &BTreeMap<SlotId, TilePos> {
        &self.spawns
    }

    /// Every wall cell in row-major order.
    pub fn walls(&self) -> impl Iterator<Item = (TilePos, TileKind)> + '_ {
        self.tiles.iter().enumerate().filter_map(move |(i, kind)| {
            kind.is_wall()
                .then(|| (TilePos::new((i % self.width) as i32, (i / self.width) as i32), *kind))
        })
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("spawns", &self.spawns)
            .finish()
    }
}
