// Real-time transport for Parley: Engine.IO / Socket.IO over WebSocket or
// HTTP long-polling, driven by a background connection task.

pub mod connection;
pub mod error;
pub mod packet;
pub mod transport;

pub use connection::{
    spawn_connection, ConnectionConfig, DisconnectReason, ReconnectPolicy, SocketCommand,
    SocketNotification,
};
pub use error::NetError;
pub use packet::{EnginePacket, OpenHandshake, PacketError, SocketPacket};
