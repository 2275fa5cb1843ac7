// ABOUTME: IRC side of the bridge: wire format, framing, sessions and the listener connection
// ABOUTME: Implements the IrcSender and IrcConnector seams used by the relay engine

pub mod codec;
pub mod connector;
pub mod listener;
pub mod message;
pub mod session;

pub use connector::TcpConnector;
pub use listener::{listener_context, supervise_listener};
pub use message::Message;
pub use session::{
    split_message, IrcSession, SessionContext, MAX_LINE_BYTES, REGISTRATION_TIMEOUT,
};
