// ABOUTME: Root library module exposing the homeserver, IRC and webhook edges of the bridge
// ABOUTME: Re-exports the platform-agnostic core so the binary and tests share one import path

pub mod irc;
pub mod matrix_client;
pub mod webhook;

// Re-export platform-agnostic modules from bridge-core
pub use bridge_core::config;
pub use bridge_core::error;
pub use bridge_core::event;
pub use bridge_core::identity;
pub use bridge_core::metrics;
pub use bridge_core::paths;
pub use bridge_core::relay;
pub use bridge_core::traits;

pub use bridge_core::{BridgeError, BridgeResult, IrcMessage, RelayEngine, RelaySettings};
