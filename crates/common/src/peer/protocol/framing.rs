//! Message framing over any ordered byte stream using tokio-util
//! LengthDelimitedCodec
//!
//! Frames carry one bincode-encoded [`Message`] each.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::messages::Message;

/// Largest frame we accept or send
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
}

/// A frame read off the wire.
#[derive(Debug)]
pub enum Inbound {
    Message(Message),
    /// The frame did not decode; kept for logging, never answered
    Invalid(Bytes),
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Framed writer for sending messages
pub struct MessageSink<W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite + Unpin> MessageSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, codec()),
        }
    }

    /// Send a message (length-prefixed)
    pub async fn send(&mut self, msg: &Message) -> Result<(), FramingError> {
        let bytes = bincode::serialize(msg)?;
        self.inner.send(Bytes::from(bytes)).await?;
        Ok(())
    }

    /// Flush and shut down the write half
    pub async fn close(mut self) -> Result<(), FramingError> {
        SinkExt::<Bytes>::close(&mut self.inner).await?;
        Ok(())
    }
}

/// Framed reader for receiving messages
pub struct MessageStream<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

impl<R: AsyncRead + Unpin> MessageStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, codec()),
        }
    }

    /// Receive the next frame, or `None` once the peer closed the stream.
    ///
    /// An undecodable frame is returned as [`Inbound::Invalid`] rather
    ///  than an error: one bad message does not end the session.
    pub async fn recv(&mut self) -> Result<Option<Inbound>, FramingError> {
        match self.inner.next().await {
            Some(Ok(frame)) => {
                let frame = frame.freeze();
                Ok(Some(match bincode::deserialize::<Message>(&frame) {
                    Ok(msg) => Inbound::Message(msg),
                    Err(_) => Inbound::Invalid(frame),
                }))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::crypto::{Secret, SecretKey};
    use crate::envelope::LogPosition;
    use crate::peer::protocol::Handshake;

    #[tokio::test]
    async fn test_messages_cross_a_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut sink = MessageSink::new(a);
        let mut stream = MessageStream::new(b);

        let handshake = Message::Handshake(Handshake::new(&Secret::generate()));
        let offer = Message::Offer(LogPosition::new(SecretKey::generate().public(), 9));
        sink.send(&handshake).await.unwrap();
        sink.send(&offer).await.unwrap();
        sink.close().await.unwrap();

        assert!(matches!(stream.recv().await.unwrap(), Some(Inbound::Message(m)) if m == handshake));
        assert!(matches!(stream.recv().await.unwrap(), Some(Inbound::Message(m)) if m == offer));
        assert!(stream.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_frame_is_invalid_not_fatal() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut stream = MessageStream::new(b);

        // 4-byte big-endian length, then a variant tag bincode does not know
        a.write_all(&[0, 0, 0, 4, 0xff, 0xff, 0xff, 0xff]).await.unwrap();
        let mut sink = MessageSink::new(a);
        let offer = Message::Request(LogPosition::new(SecretKey::generate().public(), 0));
        sink.send(&offer).await.unwrap();

        assert!(matches!(stream.recv().await.unwrap(), Some(Inbound::Invalid(raw)) if raw.len() == 4));
        assert!(matches!(stream.recv().await.unwrap(), Some(Inbound::Message(m)) if m == offer));
    }
}
