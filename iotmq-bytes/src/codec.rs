use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::{Error, Packet};

/// MQTT 3.1.1 framing for [`tokio_util::codec::Framed`].
#[derive(Debug, Clone)]
pub struct Codec {
    /// Largest packet accepted from the broker
    pub max_incoming_size: u32,
    /// Largest packet the broker accepts from us
    pub max_outgoing_size: u32,
}

impl Codec {
    pub fn new(max_incoming_size: u32, max_outgoing_size: u32) -> Self {
        Self {
            max_incoming_size,
            max_outgoing_size,
        }
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match Packet::read(src, self.max_incoming_size) {
            Ok(packet) => Ok(Some(packet)),
            Err(Error::InsufficientBytes(b)) => {
                // Wait for the rest of the frame
                src.reserve(b);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl Encoder<Packet> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write(dst, self.max_outgoing_size)?;
        Ok(())
    }
}
