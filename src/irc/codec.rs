// ABOUTME: IRC line codec that frames a TCP byte stream into IRC messages
// ABOUTME: Decodes LF or CRLF terminated lines, encodes with CRLF and refuses embedded line breaks

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::Message;

/// Maximum inbound line length, including the terminator.
/// RFC 2812 says 512 bytes; IRCv3 tags can push this to 8191.
const MAX_LINE_LENGTH: usize = 8191;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error("outgoing message contains a line break")]
    EmbeddedNewline,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(lf_pos) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };

            let line_bytes = src.split_to(lf_pos);
            src.advance(1);

            // Servers are not obliged to send valid UTF-8
            let line = String::from_utf8_lossy(&line_bytes);
            if let Some(msg) = Message::parse(&line) {
                return Ok(Some(msg));
            }
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_string();
        if wire.contains(['\r', '\n']) {
            return Err(CodecError::EmbeddedNewline);
        }
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
