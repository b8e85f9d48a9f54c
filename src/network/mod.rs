//! Network Layer
//!
//! TCP (and optional WebSocket) transport for the arena.
//! All world mutation happens in the world task; this layer only moves bytes.

pub mod codec;
pub mod protocol;
pub mod session;
pub mod server;

pub use codec::{CodecError, FrameDecoder};
pub use protocol::{BombReport, ClientCommand, JoinAck, PlayerInfo, ServerMessage};
pub use session::{ConnectionId, ProtocolError, Session, SessionManager, SessionState};
pub use server::{load_world, GameServer, GameServerError, ServerConfig};
