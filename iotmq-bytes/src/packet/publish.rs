use bytes::{BufMut, Bytes, BytesMut};

use crate::parse::*;
use crate::{Error, FixedHeader, QoS, VarInt};

/// Publish message
///
/// Carries an application message in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// Set on every retransmission of a QoS 1 publish
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Packet identifier, 0 for QoS 0
    pub pkid: u16,
    pub payload: Bytes,
}

impl Publish {
    pub fn new<T: Into<String>, P: Into<Bytes>>(topic: T, qos: QoS, payload: P) -> Self {
        Publish {
            dup: false,
            qos,
            retain: false,
            pkid: 0,
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub(crate) fn read(fixed_header: FixedHeader, mut bytes: Bytes) -> Result<Self, Error> {
        let flags = fixed_header.flags();
        let qos = QoS::try_from((flags & 0b0110) >> 1)?;
        let topic = read_mqtt_string(&mut bytes)?;

        let pkid = match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce | QoS::ExactlyOnce => read_u16(&mut bytes)?,
        };

        if qos != QoS::AtMostOnce && pkid == 0 {
            return Err(Error::PacketIdZero);
        }

        Ok(Publish {
            dup: (flags & 0b1000) != 0,
            qos,
            retain: (flags & 0b0001) != 0,
            topic,
            pkid,
            payload: bytes,
        })
    }

    pub(crate) fn write(&self, buffer: &mut BytesMut) -> Result<usize, Error> {
        if self.qos != QoS::AtMostOnce && self.pkid == 0 {
            return Err(Error::PacketIdZero);
        }

        let len = self.remaining_len()?;
        let flags = (self.dup as u8) << 3 | (self.qos as u8) << 1 | self.retain as u8;
        buffer.put_u8(0b0011_0000 | flags);
        len.write(buffer);
        write_mqtt_string(buffer, &self.topic);

        if self.qos != QoS::AtMostOnce {
            buffer.put_u16(self.pkid);
        }

        buffer.extend_from_slice(&self.payload);

        Ok(1 + len.length() + len.value())
    }

    pub(crate) fn remaining_len(&self) -> Result<VarInt, Error> {
        let mut len = prefixed_len(self.topic.len())? + self.payload.len();
        if self.qos != QoS::AtMostOnce {
            len += 2;
        }

        VarInt::new(len)
    }
}
