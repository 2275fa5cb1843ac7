// ABOUTME: Relay engine that moves messages between the Matrix room and the IRC channel
// ABOUTME: Applies anti-echo and room filters, then routes through the session pool and join tracker

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::BridgeResult;
use crate::event::{IrcMessage, RoomEvent, ROOM_MESSAGE};
use crate::identity::{is_bridge_user, is_synthetic_nick, IdentityMapper};
use crate::join_tracker::JoinTracker;
use crate::metrics;
use crate::pool::{Checkout, SessionPool};
use crate::traits::{IrcConnector, IrcSender, RoomClient};

/// Fixed routing parameters for one bridge instance.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// The Matrix room bridged to `channel`.
    pub room_id: String,
    /// The IRC channel bridged to `room_id`.
    pub channel: String,
    /// Nick of the shared listener connection.
    pub bridge_nick: String,
}

/// What happened to one Matrix event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomOutcome {
    Relayed { new_session: bool },
    SkippedEcho,
    SkippedRoom,
    IgnoredType,
    Malformed,
    ConnectFailed,
    SendFailed,
}

/// What happened to one IRC channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcOutcome {
    Relayed { joined: bool },
    SkippedSelf,
    SkippedSynthetic,
    SkippedTarget,
    SendFailed,
}

pub type SharedSession = Arc<dyn IrcSender>;

pub struct RelayEngine {
    settings: RelaySettings,
    identity: IdentityMapper,
    room: Arc<dyn RoomClient>,
    connector: Arc<dyn IrcConnector>,
    sessions: SessionPool<SharedSession>,
    joins: JoinTracker,
}

impl RelayEngine {
    pub fn new(
        settings: RelaySettings,
        identity: IdentityMapper,
        room: Arc<dyn RoomClient>,
        connector: Arc<dyn IrcConnector>,
    ) -> Self {
        Self::with_registries(
            settings,
            identity,
            room,
            connector,
            SessionPool::new(),
            JoinTracker::new(),
        )
    }

    /// Build an engine around existing registries.
    pub fn with_registries(
        settings: RelaySettings,
        identity: IdentityMapper,
        room: Arc<dyn RoomClient>,
        connector: Arc<dyn IrcConnector>,
        sessions: SessionPool<SharedSession>,
        joins: JoinTracker,
    ) -> Self {
        Self {
            settings,
            identity,
            room,
            connector,
            sessions,
            joins,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionPool<SharedSession> {
        &self.sessions
    }

    pub fn joins(&self) -> &JoinTracker {
        &self.joins
    }

    /// Process every event of one transaction, in order.
    ///
    /// A rejected or undecodable event only skips itself.
    pub async fn handle_transaction(&self, events: Vec<Value>) -> Vec<RoomOutcome> {
        let mut outcomes = Vec::with_capacity(events.len());
        for value in events {
            let outcome = match RoomEvent::from_value(value) {
                Ok(event) => self.handle_room_event(&event).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable event");
                    metrics::record_error(e.kind());
                    RoomOutcome::Malformed
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Matrix -> IRC for a single event.
    pub async fn handle_room_event(&self, event: &RoomEvent) -> RoomOutcome {
        if is_bridge_user(&event.user_id) {
            tracing::debug!(
                event_id = %event.event_id,
                user_id = %event.user_id,
                "Ignoring event from bridge-owned user"
            );
            metrics::record_event_skipped("echo");
            return RoomOutcome::SkippedEcho;
        }

        if event.room_id != self.settings.room_id {
            tracing::debug!(
                event_id = %event.event_id,
                room_id = %event.room_id,
                "Ignoring event from unbridged room"
            );
            metrics::record_event_skipped("room");
            return RoomOutcome::SkippedRoom;
        }

        if event.event_type != ROOM_MESSAGE {
            tracing::info!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "Unhandled event type"
            );
            metrics::record_event_skipped("type");
            return RoomOutcome::IgnoredType;
        }

        let body = match event.body() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %event.user_id, "Skipping message event");
                metrics::record_error(e.kind());
                return RoomOutcome::Malformed;
            }
        };

        let nick = self.identity.to_irc_nick(&event.user_id);
        let checkout = match self.checkout_session(&event.user_id, &nick).await {
            Ok(checkout) => checkout,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    user_id = %event.user_id,
                    event_id = %event.event_id,
                    "Could not open IRC session, dropping message"
                );
                metrics::record_error(e.kind());
                return RoomOutcome::ConnectFailed;
            }
        };

        if checkout.created {
            tracing::info!(
                user_id = %event.user_id,
                nick = %checkout.session.nick(),
                "Opened IRC session for Matrix user"
            );
            metrics::set_irc_sessions(self.sessions.len().await as u64);
        }

        match checkout.session.send(&self.settings.channel, body) {
            Ok(()) => {
                tracing::debug!(
                    user_id = %event.user_id,
                    nick = %checkout.session.nick(),
                    registered = checkout.session.is_registered(),
                    "Queued message for IRC"
                );
                metrics::record_message_relayed("to_irc");
                RoomOutcome::Relayed {
                    new_session: checkout.created,
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    user_id = %event.user_id,
                    "IRC send failed"
                );
                metrics::record_error(e.kind());
                if self
                    .sessions
                    .remove_if(&event.user_id, |s| s.is_closed())
                    .await
                    .is_some()
                {
                    tracing::info!(user_id = %event.user_id, "Dropped closed IRC session");
                    metrics::set_irc_sessions(self.sessions.len().await as u64);
                }
                RoomOutcome::SendFailed
            }
        }
    }

    /// Pooled session for `user_id`, replacing one whose connection is gone.
    ///
    /// A session that failed registration closes itself; evicting it here
    /// makes the next message reconnect instead of queueing into a dead task.
    async fn checkout_session(
        &self,
        user_id: &str,
        nick: &str,
    ) -> BridgeResult<Checkout<SharedSession>> {
        let connect = || {
            let connector = Arc::clone(&self.connector);
            let nick = nick.to_string();
            async move { connector.connect(&nick, &nick).await }
        };

        let checkout = self.sessions.get_or_create(user_id, connect).await?;
        if !checkout.session.is_closed() {
            return Ok(checkout);
        }

        if self
            .sessions
            .remove_if(user_id, |s| s.is_closed())
            .await
            .is_some()
        {
            tracing::info!(user_id = %user_id, "Replacing closed IRC session");
            metrics::set_irc_sessions(self.sessions.len().await as u64);
        }
        self.sessions.get_or_create(user_id, connect).await
    }

    /// IRC -> Matrix for a single channel message.
    pub async fn handle_irc_message(&self, msg: &IrcMessage) -> IrcOutcome {
        if !msg.target.eq_ignore_ascii_case(&self.settings.channel) {
            return IrcOutcome::SkippedTarget;
        }
        if msg.nick.eq_ignore_ascii_case(&self.settings.bridge_nick) {
            return IrcOutcome::SkippedSelf;
        }
        if is_synthetic_nick(&msg.nick) {
            return IrcOutcome::SkippedSynthetic;
        }

        let user_id = self.identity.to_matrix_user(&msg.nick);
        let room = Arc::clone(&self.room);
        let joined = self
            .joins
            .ensure_joined(&user_id, |id| async move {
                match room.join(&id).await {
                    Ok(()) => {
                        tracing::info!(user_id = %id, "Joined puppet to room");
                        metrics::record_room_join();
                        true
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            user_id = %id,
                            "Room join failed; puppet will not be joined again"
                        );
                        metrics::record_error(e.kind());
                        false
                    }
                }
            })
            .await;

        match self.room.send_message(&user_id, &msg.text).await {
            Ok(()) => {
                metrics::record_message_relayed("to_matrix");
                IrcOutcome::Relayed { joined }
            }
            Err(e) => {
                if self.joins.join_failed(&user_id).await {
                    tracing::error!(
                        error = %e,
                        user_id = %user_id,
                        "Room send failed for puppet whose room join was refused"
                    );
                } else {
                    tracing::error!(error = %e, user_id = %user_id, "Room send failed");
                }
                metrics::record_error(e.kind());
                IrcOutcome::SendFailed
            }
        }
    }

    /// Relay messages from the listener connection one at a time, in
    /// arrival order, until the connection goes away.
    pub async fn run_irc_listener(&self, mut rx: mpsc::UnboundedReceiver<IrcMessage>) {
        while let Some(msg) = rx.recv().await {
            let outcome = self.handle_irc_message(&msg).await;
            tracing::trace!(nick = %msg.nick, ?outcome, "IRC message handled");
        }
        tracing::info!("IRC listener channel closed");
    }

    /// Send QUIT on every pooled session and empty the pool.
    pub async fn shutdown(&self, reason: &str) {
        let sessions = self.sessions.drain().await;
        tracing::info!(count = sessions.len(), "Closing IRC sessions");
        for (user_id, session) in sessions {
            tracing::debug!(user_id = %user_id, nick = %session.nick(), "Quitting IRC session");
            session.quit(reason);
        }
        metrics::set_irc_sessions(0);
    }
}
