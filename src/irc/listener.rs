// ABOUTME: Keeps the shared bridge connection alive and feeds channel messages to the relay
// ABOUTME: Reconnects with exponential backoff whenever the connection drops

use bridge_core::config::IrcConfig;
use bridge_core::{IrcMessage, IrcSender};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::session::{IrcSession, SessionContext};

const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(300);
const QUIT_GRACE: Duration = Duration::from_secs(2);

pub fn listener_context(config: &IrcConfig) -> SessionContext {
    SessionContext {
        server_addr: config.server_addr(),
        nick: config.nick.clone(),
        user: config.user.clone(),
        realname: "Matrix bridge".to_string(),
        channel: config.channel.clone(),
    }
}

/// Run the bridge's listener connection until `shutdown` fires.
///
/// Every connection forwards into the same `tx`, so the relay sees one
/// ordered stream across reconnects.
pub async fn supervise_listener(
    ctx: SessionContext,
    tx: mpsc::UnboundedSender<IrcMessage>,
    shutdown: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match IrcSession::connect(ctx.clone(), Some(tx.clone())).await {
            Ok(session) => {
                backoff = INITIAL_BACKOFF;
                tokio::select! {
                    _ = session.closed() => {
                        tracing::warn!(nick = %ctx.nick, "Listener connection lost");
                    }
                    _ = shutdown.cancelled() => {
                        session.quit("Bridge shutting down");
                        let _ = tokio::time::timeout(QUIT_GRACE, session.closed()).await;
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Listener connection failed");
                bridge_core::metrics::record_error(e.kind());
            }
        }

        tracing::info!(delay_secs = backoff.as_secs(), "Reconnecting listener");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.cancelled() => return,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
