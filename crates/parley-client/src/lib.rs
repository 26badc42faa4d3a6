//! # parley-client
//!
//! Headless client SDK for the Parley chat service: session management,
//! the real-time connection and the channel / chat stores a UI renders from.
//!
//! Everything hangs off [`ChatClient`]. State changes are published as
//! [`ClientEvent`]s on a broadcast channel.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod realtime;
pub mod session;
pub mod stores;
pub mod timeline;

mod bridge;
mod client;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use error::{ApiError, ClientError, Result};
pub use events::{ClientEvent, EventBus};
pub use guard::RouteDecision;
pub use session::{Availability, Registration, RestoreOutcome, Session};
pub use timeline::{DeliveryState, PendingMessage, TimelineEntry};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parley=info,parley_client=debug,parley_net=debug,parley_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
