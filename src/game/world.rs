//! Authoritative World
//!
//! Owns every entity in the arena and advances them once per tick:
//!
//! 1. Advance the clock
//! 2. Move players (sweep against walls and visible devices)
//! 3. Advance devices (explode, scan for chain victims, hide and score)
//! 4. Fire chain ignitions that have come due
//! 5. Purge hidden walls and items
//!
//! All collections are ordered maps so iteration, and therefore the
//! outcome of a tick, never depends on hashing.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::geometry::{Direction, Rect, TilePos};
use crate::game::device::{cast_ray, BlastTimings, BlastTrail, CellContents, Device, DeviceState, ItemId};
use crate::game::events::GameEvent;
use crate::game::grid::{Grid, SlotId, TileKind};
use crate::game::movement::{self, Arena, Obstacle};
use crate::game::player::{Player, PlayerStats};

// =============================================================================
// CONFIG
// =============================================================================

/// Gameplay tunables.
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Tile edge length in map units.
    pub tile_size: f64,
    /// Chance an empty map cell becomes a destructible wall at load.
    pub wall_probability: f64,
    /// Player speed in map units per second.
    pub player_speed: f64,
    /// Default device fuse.
    pub fuse: Duration,
    /// Time a device spends exploding.
    pub explode_window: Duration,
    /// Time a device spends burning.
    pub burn_window: Duration,
    /// Delay between a blast touching a device and that device igniting.
    pub chain_delay: Duration,
    /// Devices a player may have ticking at once.
    pub bomb_capacity: u32,
    /// Blast reach in tiles.
    pub explosion_radius: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tile_size: 10.0,
            wall_probability: 0.6,
            player_speed: 40.0,
            fuse: Duration::from_secs(5),
            explode_window: Duration::from_millis(200),
            burn_window: Duration::from_millis(1500),
            chain_delay: Duration::from_millis(100),
            bomb_capacity: 1,
            explosion_radius: 1,
        }
    }
}

impl GameConfig {
    /// Post-fuse stage durations.
    pub fn blast_timings(&self) -> BlastTimings {
        BlastTimings {
            explode: self.explode_window,
            burn: self.burn_window,
        }
    }

    /// Stats handed to newly joined players.
    pub fn player_stats(&self) -> PlayerStats {
        PlayerStats {
            speed: self.player_speed,
            bomb_capacity: self.bomb_capacity,
            explosion_radius: self.explosion_radius,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Why a join was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// Every spawn slot is held.
    #[error("no free spawn slot")]
    NoFreeSpawn,

    /// Username already has a live session.
    #[error("user {0:?} is already connected")]
    AlreadyConnected(String),

    /// Blank username.
    #[error("username must not be empty")]
    InvalidUsername,
}

// =============================================================================
// REGISTRY TYPES
// =============================================================================

/// A wall cell. Hidden walls are gone for collision and rendering and are
/// purged at the end of the tick that hid them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wall {
    /// Wall kind.
    pub kind: TileKind,
    /// Destroyed this tick.
    pub hidden: bool,
}

/// Transient arena item.
#[derive(Clone, Debug)]
pub enum Item {
    /// Placed bomb.
    Device(Device),
    /// Blast trail left by an explosion.
    Trail(BlastTrail),
}

impl Item {
    /// True once the item should be purged.
    pub fn is_hidden(&self) -> bool {
        match self {
            Item::Device(device) => !device.is_visible(),
            Item::Trail(trail) => trail.hidden,
        }
    }
}

/// Persistent per-username record, kept across disconnects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Slot last held by this user.
    pub slot: SlotId,
    /// Score banked at last disconnect.
    pub score: u32,
}

/// Outcome of a successful join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Slot now held.
    pub slot: SlotId,
    /// True if the user had an account already.
    pub resumed: bool,
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Tick number just completed
    pub tick: u64,
    /// Events generated this tick
    pub events: Vec<GameEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledIgnition {
    fire_at: Duration,
    seq: u64,
    device: ItemId,
}

// =============================================================================
// WORLD
// =============================================================================

/// The arena and everything in it.
pub struct World {
    config: GameConfig,
    grid: Grid,
    arena: Arena,
    walls: BTreeMap<TilePos, Wall>,
    items: BTreeMap<ItemId, Item>,
    next_item_id: ItemId,
    players: BTreeMap<SlotId, Player>,
    /// Free slots, popped from the back (smallest name on top).
    free_slots: Vec<SlotId>,
    accounts: BTreeMap<String, Account>,
    ignitions: BinaryHeap<Reverse<ScheduledIgnition>>,
    ignition_seq: u64,
    clock: Duration,
    tick: u64,
    events: Vec<GameEvent>,
}

impl World {
    /// Build a world from a parsed grid.
    pub fn new(grid: Grid, config: GameConfig) -> Self {
        let walls = grid
            .walls()
            .map(|(pos, kind)| (pos, Wall { kind, hidden: false }))
            .collect();
        let mut free_slots: Vec<SlotId> = grid.spawns().keys().cloned().collect();
        free_slots.reverse();
        let arena = Arena::new(grid.width(), grid.height(), config.tile_size);

        info!(
            width = grid.width(),
            height = grid.height(),
            slots = free_slots.len(),
            "World created"
        );

        Self {
            config,
            grid,
            arena,
            walls,
            items: BTreeMap::new(),
            next_item_id: 0,
            players: BTreeMap::new(),
            free_slots,
            accounts: BTreeMap::new(),
            ignitions: BinaryHeap::new(),
            ignition_seq: 0,
            clock: Duration::ZERO,
            tick: 0,
            events: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Gameplay config.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Static grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Time simulated so far.
    pub fn clock(&self) -> Duration {
        self.clock
    }

    /// Ticks simulated so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Player in a slot.
    pub fn player(&self, slot: &str) -> Option<&Player> {
        self.players.get(slot)
    }

    /// All connected players in slot order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Wall at a cell, if any is registered.
    pub fn wall(&self, pos: TilePos) -> Option<&Wall> {
        self.walls.get(&pos)
    }

    /// Persistent account for a username.
    pub fn account(&self, username: &str) -> Option<&Account> {
        self.accounts.get(username)
    }

    /// Device by id.
    pub fn device(&self, id: ItemId) -> Option<&Device> {
        match self.items.get(&id) {
            Some(Item::Device(device)) => Some(device),
            _ => None,
        }
    }

    /// Visible devices in id order.
    pub fn devices(&self) -> impl Iterator<Item = (ItemId, &Device)> {
        self.items.iter().filter_map(|(id, item)| match item {
            Item::Device(device) if device.is_visible() => Some((*id, device)),
            _ => None,
        })
    }

    /// Visible blast trails in id order.
    pub fn trails(&self) -> impl Iterator<Item = (ItemId, &BlastTrail)> {
        self.items.iter().filter_map(|(id, item)| match item {
            Item::Trail(trail) if !trail.hidden => Some((*id, trail)),
            _ => None,
        })
    }

    /// Number of free spawn slots.
    pub fn free_slot_count(&self) -> usize {
        self.free_slots.len()
    }

    // -------------------------------------------------------------------------
    // Join / leave
    // -------------------------------------------------------------------------

    /// Bind a username to a spawn slot.
    ///
    /// A returning user gets their previous slot back when it is still free,
    /// otherwise the next free one. Score is kept either way.
    pub fn register(&mut self, username: &str) -> Result<Registration, JoinError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(JoinError::InvalidUsername);
        }
        if self.players.values().any(|p| p.name == username) {
            return Err(JoinError::AlreadyConnected(username.to_string()));
        }

        let previous = self.accounts.get(username).cloned();
        let reclaimed = previous.as_ref().and_then(|account| {
            let idx = self.free_slots.iter().position(|s| *s == account.slot)?;
            Some(self.free_slots.remove(idx))
        });
        let slot = match reclaimed {
            Some(slot) => slot,
            None => self.free_slots.pop().ok_or(JoinError::NoFreeSpawn)?,
        };

        let score = previous.as_ref().map_or(0, |a| a.score);
        self.accounts.insert(
            username.to_string(),
            Account { slot: slot.clone(), score },
        );

        let spawn = self.grid.spawn(&slot).unwrap_or_default();
        let player = Player::new(
            slot.clone(),
            username.to_string(),
            spawn,
            self.config.tile_size,
            self.config.player_stats(),
            score,
        );
        self.players.insert(slot.clone(), player);

        let resumed = previous.is_some();
        info!(%slot, username, resumed, score, "Player joined");
        self.events.push(GameEvent::player_joined(self.tick, slot.clone(), username.to_string(), resumed));

        Ok(Registration { slot, resumed })
    }

    /// Remove a player, bank their score, and free the slot.
    pub fn unregister(&mut self, slot: &str) -> bool {
        let Some(player) = self.players.remove(slot) else {
            return false;
        };

        if let Some(account) = self.accounts.get_mut(&player.name) {
            account.score = player.score;
        }
        self.free_slots.push(player.slot.clone());

        info!(slot, username = %player.name, score = player.score, "Player left");
        self.events.push(GameEvent::player_left(self.tick, player.slot, player.name, player.score));
        true
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Replace a player's pending motion.
    pub fn set_motion(&mut self, slot: &str, direction: Direction, tiles: f64) -> bool {
        let tile = self.config.tile_size;
        match self.players.get_mut(slot) {
            Some(player) => {
                player.set_motion(direction, tiles, tile);
                true
            }
            None => false,
        }
    }

    /// Place a device under a player. Returns `None` if the player is at
    /// capacity or a device already sits on that cell.
    pub fn place_bomb(&mut self, slot: &str, fuse: Option<Duration>) -> Option<ItemId> {
        let tile = self.config.tile_size;
        let player = self.players.get(slot)?;
        let position = player.tile_position(tile);

        let ticking = self
            .devices()
            .filter(|(_, d)| d.owner == slot && d.state() == DeviceState::Ticking)
            .count() as u32;
        if ticking >= player.bomb_capacity {
            debug!(slot, ticking, "Bomb rejected: at capacity");
            return None;
        }
        if self.devices().any(|(_, d)| d.position == position) {
            debug!(slot, %position, "Bomb rejected: cell occupied");
            return None;
        }

        let device = Device::new(
            player.slot.clone(),
            player.name.clone(),
            position,
            fuse.unwrap_or(self.config.fuse),
            player.explosion_radius,
            player.color,
        );
        let id = self.insert_item(Item::Device(device));
        self.events.push(GameEvent::bomb_placed(self.tick, id, slot.to_string(), position));
        Some(id)
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Advance the world by `dt`.
    pub fn update(&mut self, dt: Duration) -> TickResult {
        self.tick += 1;
        self.clock += dt;

        self.update_players(dt);

        let device_ids: Vec<ItemId> = self.devices().map(|(id, _)| id).collect();
        for id in device_ids {
            self.update_device(id, dt);
        }

        self.fire_due_ignitions();
        self.purge_hidden();

        TickResult {
            tick: self.tick,
            events: std::mem::take(&mut self.events),
        }
    }

    fn update_players(&mut self, dt: Duration) {
        let tile = self.config.tile_size;
        let obstacles: Vec<Obstacle> = self
            .walls
            .iter()
            .filter(|(_, wall)| !wall.hidden)
            .map(|(pos, _)| Obstacle::at(*pos, tile))
            .chain(self.devices().map(|(_, d)| Obstacle::at(d.position, tile)))
            .collect();

        let dt = dt.as_secs_f64();
        for player in self.players.values_mut().filter(|p| p.is_moving()) {
            let _outcome = movement::advance(player, dt, &self.arena, &obstacles);
            #[cfg(feature = "debug-tracing")]
            tracing::trace!(slot = %player.slot, x = player.x, y = player.y, outcome = ?_outcome, "Player moved");
        }
    }

    fn update_device(&mut self, id: ItemId, dt: Duration) {
        let timings = self.config.blast_timings();
        let entered = match self.items.get_mut(&id) {
            Some(Item::Device(device)) => device.advance(dt, &timings),
            _ => return,
        };

        match entered {
            Some(DeviceState::Exploding) => self.explode(id),
            Some(DeviceState::Hiding) => self.finish(id),
            _ => {}
        }

        if self.device(id).is_some_and(|d| d.state().is_blasting()) {
            self.scan_chain(id);
        }
    }

    /// Cast rays, record walls to destroy, and spawn trails.
    fn explode(&mut self, id: ItemId) {
        let Some(device) = self.device(id) else {
            return;
        };
        let (origin, radius, color) = (device.position, device.explosion_radius, device.color);
        let tile = self.config.tile_size;

        let rays: Vec<_> = Direction::ALL
            .iter()
            .map(|&dir| cast_ray(origin, dir, radius, |cell| self.cell_contents(cell)))
            .collect();

        let walls: Vec<TilePos> = rays.iter().filter_map(|ray| ray.destroys).collect();
        let trails: Vec<ItemId> = rays
            .iter()
            .map(|ray| {
                self.insert_item(Item::Trail(BlastTrail {
                    source: id,
                    rect: ray.trail_rect(origin, tile),
                    color,
                    hidden: false,
                }))
            })
            .collect();

        let marked = walls.len() as u32;
        if let Some(Item::Device(device)) = self.items.get_mut(&id) {
            device.walls_to_destroy = walls;
            device.trails = trails;
        }

        debug!(device = id, %origin, walls = marked, "Bomb exploded");
        self.events.push(GameEvent::bomb_exploded(self.tick, id, origin, marked));
    }

    fn cell_contents(&self, cell: TilePos) -> CellContents {
        if !self.grid.in_bounds(cell) {
            return CellContents::OutOfBounds;
        }
        match self.walls.get(&cell) {
            None => CellContents::Open,
            Some(wall) if wall.hidden => CellContents::HiddenWall,
            Some(wall) => CellContents::Wall { destructible: wall.kind.is_destructible() },
        }
    }

    /// Schedule ignition of every ticking device a live trail touches.
    fn scan_chain(&mut self, id: ItemId) {
        let tile = self.config.tile_size;
        let trail_rects: Vec<Rect> = self
            .trails()
            .filter(|(_, t)| t.source == id)
            .map(|(_, t)| t.rect)
            .collect();

        let victims: Vec<ItemId> = self
            .devices()
            .filter(|(other, d)| *other != id && d.state() == DeviceState::Ticking)
            .filter(|(_, d)| {
                let rect = d.rect(tile);
                trail_rects.iter().any(|t| t.intersects(&rect))
            })
            .map(|(other, _)| other)
            .collect();

        for victim in victims {
            let fresh = match self.items.get_mut(&id) {
                Some(Item::Device(device)) => device.mark_ignited(victim),
                _ => false,
            };
            if !fresh {
                continue;
            }
            let fire_at = self.clock + self.config.chain_delay;
            self.ignition_seq += 1;
            self.ignitions.push(Reverse(ScheduledIgnition {
                fire_at,
                seq: self.ignition_seq,
                device: victim,
            }));
            debug!(source = id, target = victim, ?fire_at, "Chain ignition scheduled");
            self.events.push(GameEvent::chain_scheduled(self.tick, id, victim));
        }
    }

    fn fire_due_ignitions(&mut self) {
        let timings = self.config.blast_timings();
        while let Some(Reverse(next)) = self.ignitions.peek().copied() {
            if next.fire_at > self.clock {
                break;
            }
            self.ignitions.pop();

            let ignited = match self.items.get_mut(&next.device) {
                Some(Item::Device(device)) => device.ignite(&timings),
                _ => false,
            };
            if ignited {
                self.events.push(GameEvent::chain_ignited(self.tick, next.device));
                self.explode(next.device);
            }
        }
    }

    /// Hide trails and recorded walls, then credit the owner.
    fn finish(&mut self, id: ItemId) {
        let Some(device) = self.device(id) else {
            return;
        };
        let owner = device.owner.clone();
        let owner_name = device.owner_name.clone();
        let trails = device.trails.clone();
        let targets = device.walls_to_destroy.clone();

        for trail_id in trails {
            if let Some(Item::Trail(trail)) = self.items.get_mut(&trail_id) {
                trail.hidden = true;
            }
        }

        let mut points = 0;
        for pos in targets {
            if let Some(wall) = self.walls.get_mut(&pos) {
                if !wall.hidden && wall.kind.is_destructible() {
                    wall.hidden = true;
                    points += 1;
                    self.events.push(GameEvent::wall_destroyed(self.tick, pos, owner.clone()));
                }
            }
        }

        self.credit(&owner, &owner_name, points);
        self.events.push(GameEvent::bomb_spent(self.tick, id, owner, points));
    }

    fn credit(&mut self, slot: &str, username: &str, points: u32) {
        if points == 0 {
            return;
        }
        match self.players.get_mut(slot) {
            Some(player) if player.name == username => player.score += points,
            _ => {
                if let Some(account) = self.accounts.get_mut(username) {
                    account.score += points;
                }
            }
        }
    }

    fn purge_hidden(&mut self) {
        self.items.retain(|_, item| !item.is_hidden());
        // Purged rather than kept flagged: later rays pass the cell as open ground.
        self.walls.retain(|_, wall| !wall.hidden);
    }

    fn insert_item(&mut self, item: Item) -> ItemId {
        let id = self.next_item_id;
        self.next_item_id = self.next_item_id.wrapping_add(1);
        self.items.insert(id, item);
        id
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Render the arena as one string per row.
    ///
    /// Layers, lowest first: ground, blast trail `*`, wall glyph, device `B`,
    /// then the first character of each player's slot.
    pub fn render_rows(&self) -> Vec<String> {
        let (w, h) = (self.grid.width(), self.grid.height());
        let mut cells = vec![vec![' '; w]; h];
        let mut put = |pos: TilePos, glyph: char| {
            if self.grid.in_bounds(pos) {
                cells[pos.y as usize][pos.x as usize] = glyph;
            }
        };

        let tile = self.config.tile_size;
        for (_, trail) in self.trails() {
            for pos in trail.rect.covered_tiles(tile) {
                put(pos, '*');
            }
        }
        for (pos, wall) in &self.walls {
            if !wall.hidden {
                put(*pos, wall.kind.glyph());
            }
        }
        for (_, device) in self.devices() {
            put(device.position, 'B');
        }
        for player in self.players.values() {
            let glyph = player.slot.chars().next().unwrap_or('?');
            put(player.tile_position(tile), glyph);
        }

        cells.into_iter().map(|row| row.into_iter().collect()).collect()
    }
}
