// ABOUTME: Collaborator seams between the relay engine and the two networks
// ABOUTME: Matrix room calls, outbound IRC sessions, and the factory that opens them

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BridgeResult;

/// Calls against the bridged Matrix room, made as the application service
/// on behalf of a puppet user.
#[async_trait]
pub trait RoomClient: Send + Sync {
    /// Make `user_id` a member of the bridged room.
    async fn join(&self, user_id: &str) -> BridgeResult<()>;

    /// Post a plain-text message to the bridged room as `user_id`.
    async fn send_message(&self, user_id: &str, text: &str) -> BridgeResult<()>;
}

/// An outbound IRC connection owned by one identity.
///
/// Sends are queued on the connection and return without waiting for the
/// server; a session that has not finished registering holds them until it
/// has joined its channel.
pub trait IrcSender: Send + Sync {
    /// Nickname the connection registered (or is registering) with.
    fn nick(&self) -> &str;

    /// Queue `text` for `channel`, one PRIVMSG per line.
    fn send(&self, channel: &str, text: &str) -> BridgeResult<()>;

    /// Whether the server has acknowledged registration.
    fn is_registered(&self) -> bool;

    /// Whether the connection task has stopped.
    fn is_closed(&self) -> bool;

    /// Ask the connection to send QUIT and stop.
    fn quit(&self, reason: &str);
}

/// Opens per-user IRC connections for Matrix senders.
#[async_trait]
pub trait IrcConnector: Send + Sync {
    async fn connect(&self, nick: &str, user: &str) -> BridgeResult<Arc<dyn IrcSender>>;
}
