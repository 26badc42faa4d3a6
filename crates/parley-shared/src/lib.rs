// Types shared by every Parley crate: ids, REST and socket schemas, token
// claims and timestamp helpers.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod rest;
pub mod time;
pub mod token;
pub mod types;

pub use error::{ProtocolError, TokenError};
pub use token::{AccessToken, TokenClaims};
pub use types::{ChannelId, LocalId, MessageId, TransportKind, UserId};
