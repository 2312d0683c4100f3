//! Wire protocol between two peers replicating one project.
//!
//! A connection is a single ordered byte stream. Both sides open with a
//! [`Handshake`]; after that the stream carries `Offer`, `Request` and
//! `Envelope` messages in either direction, framed by
//! [`MessageSink`]/[`MessageStream`].

mod framing;
pub mod messages;

pub use framing::{FramingError, Inbound, MessageSink, MessageStream, MAX_FRAME_LENGTH};
pub use messages::{Handshake, HandshakeError, Message, PROTOCOL_VERSION};
