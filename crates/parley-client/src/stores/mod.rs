pub mod channel;
pub mod chat;

pub use channel::{ChannelStore, HistoryPage};
pub use chat::{ChatStore, SystemNotice};
