//! Message channel between a persistent worker and the build cache.

use std::io;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout, stdin, stdout};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::JsonCodec;
use super::protocol::{Envelope, Message};

/// Bidirectional, ordered message transport.
///
/// The orchestrator pulls inbound envelopes one at a time and pushes replies;
/// any transport that preserves message order can implement it.
#[async_trait]
pub trait MessageChannel: Send {
    /// Next inbound envelope, `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<io::Result<Envelope>>;

    async fn send(&mut self, message: Message) -> io::Result<()>;
}

/// [`MessageChannel`] over a reader/writer pair using [`JsonCodec`] framing.
pub struct FramedChannel<R, W> {
    reader: FramedRead<R, JsonCodec<Envelope>>,
    writer: FramedWrite<W, JsonCodec<Message>>,
}

impl<R: AsyncRead, W: AsyncWrite> FramedChannel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FramedRead::new(reader, JsonCodec::new()),
            writer: FramedWrite::new(writer, JsonCodec::new()),
        }
    }
}

#[async_trait]
impl<R, W> MessageChannel for FramedChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<io::Result<Envelope>> {
        self.reader.next().await
    }

    async fn send(&mut self, message: Message) -> io::Result<()> {
        self.writer.send(message).await
    }
}

/// Channel over the process's stdin/stdout, as set up by the spawning cache.
///
/// Nothing else may write to stdout while this channel is in use.
pub fn stdio() -> FramedChannel<Stdin, Stdout> {
    FramedChannel::new(stdin(), stdout())
}
