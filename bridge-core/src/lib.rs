// ABOUTME: Platform-agnostic core of the Matrix <-> IRC bridge
// ABOUTME: Identity mapping, session and join registries, relay engine, config and error types

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod join_tracker;
pub mod metrics;
pub mod paths;
pub mod pool;
pub mod relay;
pub mod traits;

pub use error::{BridgeError, BridgeResult};
pub use event::{IrcMessage, RoomEvent, Transaction};
pub use identity::IdentityMapper;
pub use join_tracker::JoinTracker;
pub use pool::{Checkout, SessionPool};
pub use relay::{IrcOutcome, RelayEngine, RelaySettings, RoomOutcome};
pub use traits::{IrcConnector, IrcSender, RoomClient};
