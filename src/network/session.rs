//! Connection Sessions
//!
//! A session tracks one connection's join state and turns its decoded
//! commands into world mutations and replies. Sessions live inside the
//! world task, so every command runs with exclusive access to the world.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::grid::SlotId;
use crate::game::world::{JoinError, World};
use crate::network::protocol::{BombReport, ClientCommand, JoinAck, PlayerInfo, ServerMessage};

/// Connection identifier.
pub type ConnectionId = Uuid;

/// Session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no player yet.
    Pending,
    /// Bound to a player slot.
    Connected { slot: SlotId },
}

/// Protocol errors, reported to the client as `ERR`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame did not decode into a known command.
    #[error("invalid command: {0}")]
    Decode(String),

    /// Command needs a joined player.
    #[error("not connected")]
    NotConnected,

    /// `connect` sent twice.
    #[error("already connected")]
    AlreadyConnected,

    /// Field present but unusable.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Join refused.
    #[error("join refused: {0}")]
    Join(#[from] JoinError),

    /// Device placement refused.
    #[error("cannot place bomb")]
    BombLimit,
}

/// One connection's protocol state.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    /// Create a pending session.
    pub fn new(id: ConnectionId) -> Self {
        Self { id, state: SessionState::Pending }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Bound slot, if joined.
    pub fn slot(&self) -> Option<&str> {
        match &self.state {
            SessionState::Connected { slot } => Some(slot),
            SessionState::Pending => None,
        }
    }

    /// Handle one decoded frame. Errors become `ERR` replies; the session
    /// stays usable either way.
    pub fn handle_value(&mut self, world: &mut World, value: serde_json::Value) -> ServerMessage {
        let command = match serde_json::from_value::<ClientCommand>(value) {
            Ok(command) => command,
            Err(e) => {
                let e = ProtocolError::Decode(e.to_string());
                debug!(connection = %self.id, error = %e, "Undecodable command");
                return ServerMessage::Err(e.to_string());
            }
        };

        let name = command.name();
        match self.dispatch(world, command) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(connection = %self.id, command = name, error = %e, "Command rejected");
                ServerMessage::Err(e.to_string())
            }
        }
    }

    /// Execute a typed command.
    pub fn dispatch(&mut self, world: &mut World, command: ClientCommand) -> Result<ServerMessage, ProtocolError> {
        let slot = self.slot().map(str::to_string);
        match (slot, command) {
            (None, ClientCommand::Connect { username }) => self.connect(world, &username),
            (None, _) => Err(ProtocolError::NotConnected),
            (Some(_), ClientCommand::Connect { .. }) => Err(ProtocolError::AlreadyConnected),
            (Some(slot), command) => execute(world, &slot, command),
        }
    }

    fn connect(&mut self, world: &mut World, username: &str) -> Result<ServerMessage, ProtocolError> {
        let registration = world.register(username)?;
        let tile = world.config().tile_size;
        let player = world
            .player(&registration.slot)
            .ok_or(ProtocolError::NotConnected)?;
        let ack = JoinAck::from_player(player, tile, registration.resumed);

        info!(connection = %self.id, slot = %registration.slot, username, "Session joined");
        self.state = SessionState::Connected { slot: registration.slot };
        Ok(ServerMessage::Ok(ack))
    }

    /// Release the player, if any.
    pub fn close(&mut self, world: &mut World) -> bool {
        match std::mem::replace(&mut self.state, SessionState::Pending) {
            SessionState::Connected { slot } => world.unregister(&slot),
            SessionState::Pending => false,
        }
    }
}

fn execute(world: &mut World, slot: &str, command: ClientCommand) -> Result<ServerMessage, ProtocolError> {
    let tile = world.config().tile_size;
    match command {
        ClientCommand::Move { direction, distance } => {
            if !distance.is_finite() || distance < 0.0 {
                return Err(ProtocolError::InvalidField {
                    field: "distance",
                    reason: format!("{distance} is not a non-negative number"),
                });
            }
            if !world.set_motion(slot, direction, distance) {
                return Err(ProtocolError::NotConnected);
            }
            Ok(ServerMessage::Ack("move".into()))
        }
        ClientCommand::Bomb { fuse_time } => {
            let fuse = match fuse_time {
                None => None,
                Some(secs) if secs > 0.0 => match Duration::try_from_secs_f64(secs) {
                    Ok(fuse) => Some(fuse),
                    Err(e) => {
                        return Err(ProtocolError::InvalidField {
                            field: "fuse_time",
                            reason: format!("{secs}: {e}"),
                        });
                    }
                },
                Some(secs) => {
                    return Err(ProtocolError::InvalidField {
                        field: "fuse_time",
                        reason: format!("{secs} is not a positive number of seconds"),
                    });
                }
            };
            world
                .place_bomb(slot, fuse)
                .map(|_| ServerMessage::Ack("bomb".into()))
                .ok_or(ProtocolError::BombLimit)
        }
        ClientCommand::Whoami => world
            .player(slot)
            .map(|player| ServerMessage::WhoAmI(PlayerInfo::from_player(player, tile)))
            .ok_or(ProtocolError::NotConnected),
        ClientCommand::Map => Ok(ServerMessage::Map(world.render_rows())),
        ClientCommand::WhatBombs => Ok(ServerMessage::WhatBombs(
            world
                .devices()
                .map(|(id, device)| BombReport::from_device(id, device))
                .collect(),
        )),
        ClientCommand::Connect { .. } => Err(ProtocolError::AlreadyConnected),
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

struct SessionEntry {
    session: Session,
    addr: SocketAddr,
    sender: mpsc::Sender<ServerMessage>,
}

/// All open sessions, owned by the world task.
#[derive(Default)]
pub struct SessionManager {
    sessions: BTreeMap<ConnectionId, SessionEntry>,
}

impl SessionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection.
    pub fn open(&mut self, id: ConnectionId, addr: SocketAddr, sender: mpsc::Sender<ServerMessage>) {
        debug!(connection = %id, %addr, "Session opened");
        self.sessions.insert(id, SessionEntry { session: Session::new(id), addr, sender });
    }

    /// Run a decoded frame through its session and queue the reply.
    pub fn dispatch(&mut self, id: ConnectionId, world: &mut World, value: serde_json::Value) {
        let Some(entry) = self.sessions.get_mut(&id) else {
            warn!(connection = %id, "Frame for unknown session");
            return;
        };
        let reply = entry.session.handle_value(world, value);
        Self::deliver(entry, reply);
    }

    /// Queue a reply on a connection.
    pub fn reply(&mut self, id: ConnectionId, message: ServerMessage) {
        if let Some(entry) = self.sessions.get(&id) {
            Self::deliver(entry, message);
        }
    }

    /// Drop a connection and release its player.
    pub fn close(&mut self, id: ConnectionId, world: &mut World) -> bool {
        match self.sessions.remove(&id) {
            Some(mut entry) => {
                entry.session.close(world);
                debug!(connection = %id, addr = %entry.addr, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Tell every connection `reason` as a final `ERR`, then drop them all.
    pub fn close_all(&mut self, world: &mut World, reason: &str) {
        let ids: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.reply(id, ServerMessage::Err(reason.to_string()));
            self.close(id, world);
        }
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no sessions are open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn deliver(entry: &SessionEntry, message: ServerMessage) {
        // The world task never waits on a slow client.
        if let Err(e) = entry.sender.try_send(message) {
            warn!(connection = %entry.session.id(), addr = %entry.addr, error = %e, "Reply dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::TilePos;
    use crate::game::device::DeviceState;
    use crate::game::grid::{Grid, MapLoadOptions};
    use crate::game::world::GameConfig;
    use serde_json::json;

    fn world() -> World {
        let mut rows = vec!["                ".to_string(); 8];
        rows[0] = "1S            2S".to_string();
        let grid = Grid::parse(&rows.join("\n"), MapLoadOptions::exact()).unwrap();
        World::new(grid, GameConfig::default())
    }

    fn joined(world: &mut World, name: &str) -> Session {
        let mut session = Session::new(Uuid::new_v4());
        let reply = session.handle_value(world, json!({"type": "connect", "username": name}));
        assert!(matches!(reply, ServerMessage::Ok(_)), "{reply:?}");
        session
    }

    #[test]
    fn test_connect_acknowledges_identity() {
        let mut world = world();
        let mut session = Session::new(Uuid::new_v4());
        let reply = session.handle_value(&mut world, json!({"type": "connect", "username": "alice"}));
        let ServerMessage::Ok(ack) = reply else {
            panic!("expected OK, got {reply:?}");
        };
        assert_eq!(ack.slot, "1");
        assert_eq!(ack.name, "alice");
        assert_eq!(ack.tile, [0, 0]);
        assert_eq!(ack.score, 0);
        assert_eq!(ack.color, [0x80, 0x00, 0x00]);
        assert_eq!(session.slot(), Some("1"));
    }

    #[test]
    fn test_commands_require_join() {
        let mut world = world();
        let mut session = Session::new(Uuid::new_v4());
        let reply = session.handle_value(&mut world, json!({"type": "whoami"}));
        assert_eq!(reply, ServerMessage::Err("not connected".into()));
        assert_eq!(session.state(), &SessionState::Pending);
    }

    #[test]
    fn test_bad_command_keeps_session_usable() {
        let mut world = world();
        let mut session = joined(&mut world, "alice");

        let reply = session.handle_value(&mut world, json!({"type": "bogus"}));
        assert!(matches!(reply, ServerMessage::Err(_)));

        let reply = session.handle_value(&mut world, json!({"type": "whoami"}));
        let ServerMessage::WhoAmI(info) = reply else {
            panic!("expected WHOAMI, got {reply:?}");
        };
        assert_eq!(info.name, "alice");
    }

    #[test]
    fn test_second_connect_rejected() {
        let mut world = world();
        let mut session = joined(&mut world, "alice");
        let reply = session.handle_value(&mut world, json!({"type": "connect", "username": "bob"}));
        assert_eq!(reply, ServerMessage::Err("already connected".into()));
        assert_eq!(world.free_slot_count(), 1);
    }

    #[test]
    fn test_join_refusals_are_errors() {
        let mut world = world();
        let _a = joined(&mut world, "alice");
        let mut dup = Session::new(Uuid::new_v4());
        let reply = dup.handle_value(&mut world, json!({"type": "connect", "username": "alice"}));
        assert!(matches!(reply, ServerMessage::Err(ref m) if m.contains("already connected")));

        let _b = joined(&mut world, "bob");
        let mut late = Session::new(Uuid::new_v4());
        let reply = late.handle_value(&mut world, json!({"type": "connect", "username": "carol"}));
        assert!(matches!(reply, ServerMessage::Err(ref m) if m.contains("no free spawn")));
    }

    #[test]
    fn test_move_validates_distance() {
        let mut world = world();
        let mut session = joined(&mut world, "alice");

        let reply = session.handle_value(&mut world, json!({"type": "move", "direction": "d", "distance": -1}));
        assert!(matches!(reply, ServerMessage::Err(ref m) if m.contains("distance")));

        let reply = session.handle_value(&mut world, json!({"type": "move", "direction": "d"}));
        assert_eq!(reply, ServerMessage::Ack("move".into()));
        assert_eq!(world.player("1").unwrap().remaining, 10.0);
    }

    #[test]
    fn test_bomb_and_what_bombs() {
        let mut world = world();
        let mut session = joined(&mut world, "alice");

        let reply = session.handle_value(&mut world, json!({"type": "bomb", "fuse_time": 2.5}));
        assert_eq!(reply, ServerMessage::Ack("bomb".into()));

        let reply = session.handle_value(&mut world, json!({"type": "bomb"}));
        assert_eq!(reply, ServerMessage::Err("cannot place bomb".into()));

        let reply = session.handle_value(&mut world, json!({"type": "what_bombs"}));
        let ServerMessage::WhatBombs(bombs) = reply else {
            panic!("expected WHAT_BOMBS, got {reply:?}");
        };
        assert_eq!(bombs.len(), 1);
        assert_eq!(bombs[0].position, [0, 0]);
        assert_eq!(bombs[0].state, DeviceState::Ticking);
        assert!((bombs[0].timer - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_unrepresentable_fuse_rejected() {
        let mut world = world();
        let mut session = joined(&mut world, "alice");

        for fuse in [json!(1e300), json!(-2.0), json!(0)] {
            let reply = session.handle_value(&mut world, json!({"type": "bomb", "fuse_time": fuse}));
            assert!(matches!(reply, ServerMessage::Err(ref m) if m.contains("fuse_time")), "{reply:?}");
        }
        assert_eq!(world.devices().count(), 0);

        let reply = session.handle_value(&mut world, json!({"type": "whoami"}));
        assert!(matches!(reply, ServerMessage::WhoAmI(ref info) if info.name == "alice"));
    }

    #[test]
    fn test_map_reply() {
        let mut world = world();
        let mut session = joined(&mut world, "alice");
        let reply = session.handle_value(&mut world, json!({"type": "map"}));
        let ServerMessage::Map(rows) = reply else {
            panic!("expected MAP, got {reply:?}");
        };
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0], "1       ");
    }

    #[test]
    fn test_close_releases_slot() {
        let mut world = world();
        let mut session = joined(&mut world, "alice");
        assert!(session.close(&mut world));
        assert!(world.player("1").is_none());
        assert!(!session.close(&mut world));

        let again = joined(&mut world, "alice");
        assert_eq!(again.slot(), Some("1"));
        assert_eq!(world.player("1").unwrap().tile_position(10.0), TilePos::new(0, 0));
    }

    #[tokio::test]
    async fn test_manager_routes_replies() {
        let mut world = world();
        let mut manager = SessionManager::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = Uuid::new_v4();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        manager.open(id, addr, tx);
        manager.dispatch(id, &mut world, json!({"type": "connect", "username": "alice"}));
        assert!(matches!(rx.recv().await, Some(ServerMessage::Ok(_))));

        manager.reply(id, ServerMessage::Err("malformed frame".into()));
        assert_eq!(rx.recv().await, Some(ServerMessage::Err("malformed frame".into())));

        assert!(manager.close(id, &mut world));
        assert!(manager.is_empty());
        assert!(world.player("1").is_none());
    }

    #[tokio::test]
    async fn test_close_all_says_goodbye() {
        let mut world = world();
        let mut manager = SessionManager::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = Uuid::new_v4();
        manager.open(id, "127.0.0.1:9001".parse().unwrap(), tx);
        manager.dispatch(id, &mut world, json!({"type": "connect", "username": "alice"}));
        assert!(matches!(rx.recv().await, Some(ServerMessage::Ok(_))));

        manager.close_all(&mut world, "server shutting down");
        assert_eq!(rx.recv().await, Some(ServerMessage::Err("server shutting down".into())));
        assert_eq!(rx.recv().await, None);
        assert!(manager.is_empty());
        assert_eq!(world.account("alice").unwrap().slot, "1");
        assert!(world.player("1").is_none());
    }
}
