// ABOUTME: One IRC connection bound to one identity, driven by its own tokio task
// ABOUTME: Queues outbound lines until registration, joins the channel on 001, answers PINGs

use bridge_core::{BridgeError, BridgeResult, IrcMessage, IrcSender};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

use super::codec::IrcCodec;
use super::message::Message;

/// Longest PRIVMSG text the bridge puts on the wire, leaving room for the
/// prefix the server adds when relaying it.
pub const MAX_LINE_BYTES: usize = 460;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the server gets to confirm registration with 001.
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Nick collisions tolerated before giving up on registration.
const MAX_NICK_RETRIES: usize = 3;

/// Lines held back while registering; older ones are dropped past this.
const MAX_PENDING_LINES: usize = 200;

/// Everything a session needs to register, fixed when it is created.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub server_addr: String,
    pub nick: String,
    pub user: String,
    pub realname: String,
    /// Joined as soon as the server confirms registration.
    pub channel: String,
}

#[derive(Debug)]
enum Command {
    Privmsg { target: String, text: String },
    Quit(String),
}

/// Handle to a running IRC connection.
///
/// Cloning is cheap; all clones drive the same connection task. The task
/// sends QUIT and exits once every handle has been dropped.
#[derive(Clone)]
pub struct IrcSession {
    nick: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    registered: Arc<AtomicBool>,
    closed_rx: watch::Receiver<bool>,
}

impl IrcSession {
    /// Open a TCP connection and start registering.
    ///
    /// When `listener` is given, every PRIVMSG the connection hears is
    /// forwarded to it; otherwise the session only sends. The listener queue
    /// is unbounded so a slow consumer never stalls PING replies.
    pub async fn connect(
        ctx: SessionContext,
        listener: Option<mpsc::UnboundedSender<IrcMessage>>,
    ) -> BridgeResult<Self> {
        let connect_error = |reason: String| BridgeError::Connect {
            nick: ctx.nick.clone(),
            addr: ctx.server_addr.clone(),
            reason,
        };

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&ctx.server_addr))
            .await
            .map_err(|_| connect_error("timed out".to_string()))?
            .map_err(|e| connect_error(e.to_string()))?;

        tracing::info!(nick = %ctx.nick, addr = %ctx.server_addr, "Connected to IRC server");
        Ok(Self::start(stream, ctx, listener))
    }

    /// Drive the protocol over an already-open stream.
    ///
    /// The session closes itself if the server refuses the nick or does not
    /// confirm registration within [`REGISTRATION_TIMEOUT`].
    pub fn start<S>(
        stream: S,
        ctx: SessionContext,
        listener: Option<mpsc::UnboundedSender<IrcMessage>>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let registered = Arc::new(AtomicBool::new(false));

        let session = Self {
            nick: ctx.nick.clone(),
            cmd_tx,
            registered: Arc::clone(&registered),
            closed_rx,
        };

        tokio::spawn(async move {
            let framed = Framed::new(stream, IrcCodec);
            if let Err(e) = run_session(framed, &ctx, cmd_rx, listener, &registered).await {
                tracing::warn!(nick = %ctx.nick, error = %e, "IRC session ended with error");
            } else {
                tracing::info!(nick = %ctx.nick, "IRC session ended");
            }
            registered.store(false, Ordering::SeqCst);
            let _ = closed_tx.send(true);
        });

        session
    }

    /// Resolves once the connection task has stopped.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl IrcSender for IrcSession {
    fn nick(&self) -> &str {
        &self.nick
    }

    fn send(&self, channel: &str, text: &str) -> BridgeResult<()> {
        if self.is_closed() {
            return Err(BridgeError::Transport(format!(
                "IRC session {} is closed",
                self.nick
            )));
        }
        for line in split_message(text, MAX_LINE_BYTES) {
            self.cmd_tx
                .send(Command::Privmsg {
                    target: channel.to_string(),
                    text: line,
                })
                .map_err(|_| {
                    BridgeError::Transport(format!("IRC session {} is closed", self.nick))
                })?;
        }
        Ok(())
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        *self.closed_rx.borrow() || self.cmd_tx.is_closed()
    }

    fn quit(&self, reason: &str) {
        let _ = self.cmd_tx.send(Command::Quit(reason.to_string()));
    }
}

/// Split `text` into IRC-safe lines.
///
/// Breaks on CR and LF, drops empty lines, and cuts anything longer than
/// `max_bytes` into consecutive chunks at UTF-8 character boundaries.
pub fn split_message(text: &str, max_bytes: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in text.split(['\r', '\n']) {
        let mut rest = raw;
        while rest.len() > max_bytes {
            let mut cut = max_bytes;
            while cut > 0 && !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
            }
            lines.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        if !rest.is_empty() {
            lines.push(rest.to_string());
        }
    }
    lines
}

async fn run_session<S>(
    mut framed: Framed<S, IrcCodec>,
    ctx: &SessionContext,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    listener: Option<mpsc::UnboundedSender<IrcMessage>>,
    registered: &AtomicBool,
) -> BridgeResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut nick = ctx.nick.clone();
    write(&mut framed, Message::nick(&nick)).await?;
    write(&mut framed, Message::user(&ctx.user, &ctx.realname)).await?;

    let refused = |reason: String| BridgeError::Connect {
        nick: ctx.nick.clone(),
        addr: ctx.server_addr.clone(),
        reason,
    };

    let mut pending: VecDeque<(String, String)> = VecDeque::new();
    let mut nick_retries = 0;
    let deadline = tokio::time::sleep(REGISTRATION_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline, if !registered.load(Ordering::SeqCst) => {
                return Err(refused(format!(
                    "no registration after {}s, dropping {} queued lines",
                    REGISTRATION_TIMEOUT.as_secs(),
                    pending.len()
                )));
            }
            frame = framed.next() => {
                let msg = match frame {
                    None => {
                        tracing::info!(nick = %nick, "IRC server closed the connection");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(BridgeError::Transport(e.to_string())),
                    Some(Ok(msg)) => msg,
                };

                match msg.command.as_str() {
                    "PING" => {
                        let token = msg.params.first().map(String::as_str).unwrap_or("");
                        write(&mut framed, Message::pong(token)).await?;
                    }
                    "001" => {
                        if let Some(confirmed) = msg.params.first() {
                            nick = confirmed.clone();
                        }
                        registered.store(true, Ordering::SeqCst);
                        tracing::info!(nick = %nick, channel = %ctx.channel, "Registered with IRC server, joining channel");
                        write(&mut framed, Message::join(&ctx.channel)).await?;
                        for (target, text) in pending.drain(..) {
                            write(&mut framed, Message::privmsg(&target, &text)).await?;
                        }
                    }
                    "433" if !registered.load(Ordering::SeqCst) => {
                        nick_retries += 1;
                        if nick_retries > MAX_NICK_RETRIES {
                            return Err(refused(format!("nick still in use after {MAX_NICK_RETRIES} retries")));
                        }
                        nick.push('_');
                        tracing::warn!(nick = %nick, "Nick in use, retrying");
                        write(&mut framed, Message::nick(&nick)).await?;
                    }
                    // Erroneous nick, no nick given, banned
                    "431" | "432" | "465" if !registered.load(Ordering::SeqCst) => {
                        let reason = msg.params.last().cloned().unwrap_or_default();
                        return Err(refused(format!("server refused registration ({}): {reason}", msg.command)));
                    }
                    "PRIVMSG" => {
                        if let (Some(tx), Some(from), [target, text, ..]) =
                            (listener.as_ref(), msg.source_nick(), msg.params.as_slice())
                        {
                            let heard = IrcMessage {
                                nick: from.to_string(),
                                target: target.clone(),
                                text: text.clone(),
                            };
                            if tx.send(heard).is_err() {
                                tracing::warn!(nick = %nick, "Relay listener gone, dropping IRC message");
                            }
                        }
                    }
                    "ERROR" => {
                        let reason = msg.params.first().cloned().unwrap_or_default();
                        return Err(BridgeError::Transport(format!("server error: {reason}")));
                    }
                    _ => {}
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => {
                        write(&mut framed, Message::quit("Bridge session closed")).await?;
                        return Ok(());
                    }
                    Some(Command::Quit(reason)) => {
                        write(&mut framed, Message::quit(&reason)).await?;
                        return Ok(());
                    }
                    Some(Command::Privmsg { target, text }) => {
                        if registered.load(Ordering::SeqCst) {
                            write(&mut framed, Message::privmsg(&target, &text)).await?;
                        } else {
                            if pending.len() >= MAX_PENDING_LINES {
                                pending.pop_front();
                                tracing::warn!(nick = %nick, "Registration backlog full, dropping oldest line");
                            }
                            pending.push_back((target, text));
                        }
                    }
                }
            }
        }
    }
}

async fn write<S>(framed: &mut Framed<S, IrcCodec>, msg: Message) -> BridgeResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(msg)
        .await
        .map_err(|e| BridgeError::Transport(e.to_string()))
}
