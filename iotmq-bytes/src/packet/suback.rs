use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::parse::*;
use crate::{Error, FixedHeader, QoS, VarInt};

/// Subscribe acknowledgement, one return code per requested filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub pkid: u16,
    pub return_codes: Vec<SubscribeReasonCode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReasonCode {
    /// Subscription accepted with the maximum QoS the broker will deliver at
    Success(QoS),
    /// Subscription rejected (0x80)
    Failure,
}

impl SubscribeReasonCode {
    /// Granted QoS, `None` for a rejected subscription
    pub fn granted(&self) -> Option<QoS> {
        match self {
            Self::Success(qos) => Some(*qos),
            Self::Failure => None,
        }
    }
}

impl TryFrom<u8> for SubscribeReasonCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Success(QoS::AtMostOnce),
            1 => Self::Success(QoS::AtLeastOnce),
            2 => Self::Success(QoS::ExactlyOnce),
            0x80 => Self::Failure,
            v => return Err(Error::InvalidSubscribeReasonCode(v)),
        };

        Ok(code)
    }
}

impl From<SubscribeReasonCode> for u8 {
    fn from(value: SubscribeReasonCode) -> u8 {
        match value {
            SubscribeReasonCode::Success(qos) => qos as u8,
            SubscribeReasonCode::Failure => 0x80,
        }
    }
}

impl SubAck {
    pub fn new(pkid: u16, return_codes: Vec<SubscribeReasonCode>) -> Self {
        SubAck { pkid, return_codes }
    }

    pub(crate) fn read(_fixed_header: FixedHeader, mut bytes: Bytes) -> Result<Self, Error> {
        let pkid = read_u16(&mut bytes)?;

        if !bytes.has_remaining() {
            return Err(Error::MalformedPacket);
        }

        let mut return_codes = Vec::with_capacity(bytes.remaining());
        while bytes.has_remaining() {
            return_codes.push(SubscribeReasonCode::try_from(read_u8(&mut bytes)?)?);
        }

        Ok(SubAck::new(pkid, return_codes))
    }

    pub(crate) fn write(&self, buffer: &mut BytesMut) -> Result<usize, Error> {
        let len = self.remaining_len()?;
        buffer.put_u8(0x90);
        len.write(buffer);
        buffer.put_u16(self.pkid);
        buffer.extend(self.return_codes.iter().map(|&c| u8::from(c)));

        Ok(1 + len.length() + len.value())
    }

    pub(crate) fn remaining_len(&self) -> Result<VarInt, Error> {
        VarInt::new(2 + self.return_codes.len())
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Packet;

    #[test]
    fn suback_with_rejection_parsing() {
        #[rustfmt::skip]
        let stream = [
            0x90, 4,
            0x00, 0x0F, // pkid = 15
            0x01, 0x80, // granted qos 1, failure
        ];

        let mut stream = BytesMut::from(&stream[..]);
        let packet = Packet::read(&mut stream, 128).unwrap();

        assert_eq!(
            packet,
            Packet::SubAck(SubAck::new(
                15,
                vec![
                    SubscribeReasonCode::Success(QoS::AtLeastOnce),
                    SubscribeReasonCode::Failure,
                ],
            ))
        );
    }

    #[test]
    fn suback_without_return_codes_is_malformed() {
        let mut stream = BytesMut::from(&[0x90, 0x02, 0x00, 0x01][..]);
        assert!(matches!(
            Packet::read(&mut stream, 128),
            Err(Error::MalformedPacket)
        ));
    }

    #[test]
    fn granted_qos_of_failure_is_none() {
        assert_eq!(SubscribeReasonCode::Failure.granted(), None);
        assert_eq!(
            SubscribeReasonCode::Success(QoS::AtMostOnce).granted(),
            Some(QoS::AtMostOnce)
        );
    }
}
