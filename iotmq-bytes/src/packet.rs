//! MQTT 3.1.1 control packets used by the client.
//!
//! [`Packet`] gathers the supported control packets into one type so the
//! codec can hand a single item to the network layer. Every packet struct
//! knows how to parse itself from a framed buffer and how to serialize
//! itself, while [`Packet::read`] and [`Packet::write`] take care of the
//! fixed header and the size limits.
//!
//! QoS 2 flows, unsubscribe and the MQTT 5 packets are not part of this
//! crate: receiving one of them is reported as [`Error::InvalidPacketType`].

use bytes::BytesMut;

use crate::{Error, FixedHeader, VarInt};

mod connack;
mod connect;
mod disconnect;
mod ping;
mod puback;
mod publish;
mod suback;
mod subscribe;

pub use connack::{ConnAck, ConnectReturnCode};
pub use connect::{Connect, LastWill, Login};
pub use disconnect::Disconnect;
pub use ping::{PingReq, PingResp};
pub use puback::PubAck;
pub use publish::Publish;
pub use suback::{SubAck, SubscribeReasonCode};
pub use subscribe::{Filter, Subscribe};

/// MQTT Control Packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    Subscribe(Subscribe),
    SubAck(SubAck),
    PingReq(PingReq),
    PingResp(PingResp),
    Disconnect(Disconnect),
}

/// MQTT packet types, as found in the upper nibble of the fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    PingReq,
    PingResp,
    Disconnect,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let packet_type = match value {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            x => return Err(Error::InvalidPacketType(x)),
        };

        Ok(packet_type)
    }
}

impl Packet {
    /// Reads one packet from the start of `stream`, consuming exactly its frame.
    ///
    /// Returns [`Error::InsufficientBytes`] without consuming anything when the
    /// frame is not complete yet.
    pub fn read(stream: &mut BytesMut, max_size: u32) -> Result<Packet, Error> {
        let fixed_header = FixedHeader::check(stream, max_size)?;
        let packet_type = fixed_header.packet_type()?;

        let mut packet = stream.split_to(fixed_header.packet_size());
        let _ = packet.split_to(fixed_header.size());

        if fixed_header.remaining_len == 0 {
            match packet_type {
                PacketType::Disconnect | PacketType::PingReq | PacketType::PingResp => (),
                _ => return Err(Error::PayloadRequired),
            };
        }

        let bytes = packet.freeze();
        let packet = match packet_type {
            PacketType::Connect => Packet::Connect(Connect::read(fixed_header, bytes)?),
            PacketType::ConnAck => Packet::ConnAck(ConnAck::read(fixed_header, bytes)?),
            PacketType::Publish => Packet::Publish(Publish::read(fixed_header, bytes)?),
            PacketType::PubAck => Packet::PubAck(PubAck::read(fixed_header, bytes)?),
            PacketType::Subscribe => Packet::Subscribe(Subscribe::read(fixed_header, bytes)?),
            PacketType::SubAck => Packet::SubAck(SubAck::read(fixed_header, bytes)?),
            PacketType::PingReq => Packet::PingReq(PingReq),
            PacketType::PingResp => Packet::PingResp(PingResp),
            PacketType::Disconnect => Packet::Disconnect(Disconnect),
            p => return Err(Error::InvalidPacketType(p as u8)),
        };

        Ok(packet)
    }

    /// Serializes the packet into `stream` and returns the number of bytes written.
    pub fn write(&self, stream: &mut BytesMut, max_size: u32) -> Result<usize, Error> {
        let size = self.size()?;
        if size > max_size as usize {
            return Err(Error::OutgoingPacketTooLarge {
                pkt_size: size as u32,
                max: max_size,
            });
        }

        match self {
            Packet::Connect(c) => c.write(stream),
            Packet::ConnAck(c) => c.write(stream),
            Packet::Publish(p) => p.write(stream),
            Packet::PubAck(p) => p.write(stream),
            Packet::Subscribe(s) => s.write(stream),
            Packet::SubAck(s) => s.write(stream),
            Packet::PingReq(p) => p.write(stream),
            Packet::PingResp(p) => p.write(stream),
            Packet::Disconnect(d) => d.write(stream),
        }
    }

    /// Size of the whole frame once serialized
    pub fn size(&self) -> Result<usize, Error> {
        let len = match self {
            Packet::Connect(c) => c.remaining_len(),
            Packet::ConnAck(c) => c.remaining_len(),
            Packet::Publish(p) => p.remaining_len(),
            Packet::PubAck(p) => p.remaining_len(),
            Packet::Subscribe(s) => s.remaining_len(),
            Packet::SubAck(s) => s.remaining_len(),
            Packet::PingReq(_) | Packet::PingResp(_) | Packet::Disconnect(_) => VarInt::new(0),
        }?;

        Ok(frame_size(len))
    }
}

/// Control field + remaining length + variable header & payload
fn frame_size(len: VarInt) -> usize {
    1 + len.length() + len.value()
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn qos2_handshake_packets_are_rejected() {
        // PUBREC, pkid = 1
        let mut stream = BytesMut::from(&[0x50, 0x02, 0x00, 0x01][..]);
        assert!(matches!(
            Packet::read(&mut stream, 128),
            Err(Error::InvalidPacketType(5))
        ));
    }

    #[test]
    fn packets_without_body_need_one() {
        let mut stream = BytesMut::from(&[0x40, 0x00][..]);
        assert!(matches!(
            Packet::read(&mut stream, 128),
            Err(Error::PayloadRequired)
        ));
    }

    #[test]
    fn back_to_back_frames_are_read_one_at_a_time() {
        let mut stream = BytesMut::from(&[0xD0, 0x00, 0x40, 0x02, 0x00, 0x07, 0xE0][..]);

        assert_eq!(Packet::read(&mut stream, 128).unwrap(), Packet::PingResp(PingResp));
        assert_eq!(
            Packet::read(&mut stream, 128).unwrap(),
            Packet::PubAck(PubAck::new(7))
        );
        assert!(matches!(
            Packet::read(&mut stream, 128),
            Err(Error::InsufficientBytes(1))
        ));
        assert_eq!(&stream[..], &[0xE0]);
    }
}
