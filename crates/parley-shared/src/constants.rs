/// Application name
pub const APP_NAME: &str = "Parley";

/// Default REST / socket origin for local development
pub const DEFAULT_API_BASE: &str = "http://localhost:8080";

/// Key under which the bearer token is persisted
pub const TOKEN_STORAGE_KEY: &str = "access_token";

/// Authentication provider sent with login credentials
pub const LOGIN_PROVIDER: &str = "db";

/// Display name used when no identity is known
pub const GUEST_DISPLAY_NAME: &str = "Guest";

/// Room every connection joins by default
pub const DEFAULT_ROOM: &str = "general";

/// Socket.IO endpoint path
pub const SOCKET_IO_PATH: &str = "/socket.io/";

/// Engine.IO protocol revision spoken by the client
pub const ENGINE_IO_VERSION: u8 = 4;

/// Number of messages fetched when a channel is opened
pub const RECENT_MESSAGES_LIMIT: u32 = 50;

/// Default page size for history requests
pub const HISTORY_PAGE_SIZE: u32 = 20;

/// Largest page the server accepts for history / recent requests
pub const MAX_PAGE_SIZE: u32 = 100;

/// Number of system notices kept in memory
pub const MAX_SYSTEM_NOTICES: usize = 50;

/// Member limit applied to new channels when none is given
pub const DEFAULT_MAX_MEMBERS: u32 = 100;

// Inbound socket events
pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_DISCONNECT: &str = "disconnect";
pub const EVENT_CONNECT_ERROR: &str = "connect_error";
pub const EVENT_NEW_MESSAGE: &str = "new_message";
pub const EVENT_MESSAGE_DELETED: &str = "message_deleted";
pub const EVENT_USER_JOINED: &str = "user_joined";
pub const EVENT_USER_LEFT: &str = "user_left";
pub const EVENT_ONLINE_USERS: &str = "online_users";
pub const EVENT_USER_TYPING: &str = "user_typing";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_STATUS: &str = "status";

// Outbound socket events
pub const EVENT_SEND_MESSAGE: &str = "send_message";
pub const EVENT_DELETE_MESSAGE: &str = "delete_message";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_JOIN_ROOM: &str = "join_room";
pub const EVENT_LEAVE_ROOM: &str = "leave_room";
pub const EVENT_JOIN_CHANNEL: &str = "join_channel";
pub const EVENT_GET_ONLINE_USERS: &str = "get_online_users";
