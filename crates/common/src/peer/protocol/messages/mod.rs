use serde::{Deserialize, Serialize};

mod handshake;

pub use handshake::{Handshake, HandshakeError, NONCE_SIZE, PROTOCOL_VERSION};

use crate::envelope::{Envelope, LogPosition};

/// Everything two peers say to each other once connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Proof of the shared project secret, exactly once per side
    Handshake(Handshake),
    /// "I hold this log up to and including this index"
    Offer(LogPosition),
    /// "Send me the envelope at this position"
    Request(LogPosition),
    /// A requested envelope
    Envelope(Envelope),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake(_) => "handshake",
            Message::Offer(_) => "offer",
            Message::Request(_) => "request",
            Message::Envelope(_) => "envelope",
        }
    }
}
