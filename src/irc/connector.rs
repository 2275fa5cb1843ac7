// ABOUTME: Opens per-Matrix-user IRC sessions against the configured server
// ABOUTME: Each session gets its own immutable context naming the channel it joins on registration

use async_trait::async_trait;
use bridge_core::config::IrcConfig;
use bridge_core::{BridgeResult, IrcConnector, IrcSender};
use std::sync::Arc;

use super::session::{IrcSession, SessionContext};

/// Connector used by the relay engine for Matrix senders.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    server_addr: String,
    channel: String,
}

impl TcpConnector {
    pub fn new(server_addr: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            channel: channel.into(),
        }
    }

    pub fn from_config(config: &IrcConfig) -> Self {
        Self::new(config.server_addr(), config.channel.clone())
    }

    fn context(&self, nick: &str, user: &str) -> SessionContext {
        SessionContext {
            server_addr: self.server_addr.clone(),
            nick: nick.to_string(),
            user: user.to_string(),
            realname: format!("{nick} (Matrix)"),
            channel: self.channel.clone(),
        }
    }
}

#[async_trait]
impl IrcConnector for TcpConnector {
    async fn connect(&self, nick: &str, user: &str) -> BridgeResult<Arc<dyn IrcSender>> {
        let session = IrcSession::connect(self.context(nick, user), None).await?;
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::BridgeError;

    #[test]
    fn context_carries_channel_and_identity() {
        let connector = TcpConnector::new("irc.example.net:6667", "#meta");
        let ctx = connector.context("M-alice", "M-alice");
        assert_eq!(ctx.server_addr, "irc.example.net:6667");
        assert_eq!(ctx.nick, "M-alice");
        assert_eq!(ctx.user, "M-alice");
        assert_eq!(ctx.channel, "#meta");
    }

    #[tokio::test]
    async fn connect_failure_is_connect_error() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::new(addr.to_string(), "#meta");
        let err = connector.connect("M-alice", "M-alice").await.err().unwrap();
        assert!(matches!(err, BridgeError::Connect { ref nick, .. } if nick == "M-alice"));
    }
}
