use futures_util::{FutureExt, SinkExt, StreamExt};
use iotmq_bytes::{Codec, Packet};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::StateError;

pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T> AsyncReadWrite for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Network transforms packets <-> frames.
///
/// Writes are buffered with [`Network::write`] and go out on [`Network::flush`].
pub(crate) struct Network {
    framed: Framed<Box<dyn AsyncReadWrite>, Codec>,
    /// Maximum number of packets returned by a single `readb`
    max_readb_count: usize,
}

impl Network {
    pub fn new(
        socket: impl AsyncReadWrite + 'static,
        max_incoming_size: u32,
        max_outgoing_size: u32,
    ) -> Self {
        let socket = Box::new(socket) as Box<dyn AsyncReadWrite>;
        let codec = Codec::new(max_incoming_size, max_outgoing_size);
        let framed = Framed::new(socket, codec);

        Self {
            framed,
            max_readb_count: 10,
        }
    }

    /// Reads a single packet from the network
    pub async fn read(&mut self) -> Result<Packet, StateError> {
        match self.framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => Err(StateError::Deserialization(e)),
            None => Err(StateError::ConnectionAborted),
        }
    }

    /// Reads a batch of packets: waits for the first one, then takes whatever
    /// is already buffered without waiting again.
    ///
    /// Only the first read is awaited, so dropping this future never loses a packet.
    pub async fn readb(&mut self) -> Result<Vec<Packet>, StateError> {
        let mut packets = vec![self.read().await?];

        while packets.len() < self.max_readb_count {
            match self.framed.next().now_or_never() {
                Some(Some(Ok(packet))) => packets.push(packet),
                None => break,
                Some(Some(Err(e))) => return Err(StateError::Deserialization(e)),
                Some(None) => return Err(StateError::ConnectionAborted),
            }
        }

        Ok(packets)
    }

    /// Serializes packet into the write buffer
    pub async fn write(&mut self, packet: Packet) -> Result<(), StateError> {
        self.framed
            .feed(packet)
            .await
            .map_err(StateError::Deserialization)
    }

    pub async fn flush(&mut self) -> Result<(), StateError> {
        self.framed
            .flush()
            .await
            .map_err(StateError::Deserialization)
    }

    /// Flushes pending writes and shuts the stream down
    pub async fn close(&mut self) -> Result<(), StateError> {
        self.framed
            .close()
            .await
            .map_err(StateError::Deserialization)
    }
}
