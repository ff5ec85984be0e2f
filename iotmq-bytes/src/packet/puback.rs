use bytes::{BufMut, Bytes, BytesMut};

use crate::parse::*;
use crate::{Error, FixedHeader, VarInt};

/// Publish acknowledgment, the response to a QoS 1 publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub pkid: u16,
}

impl PubAck {
    pub fn new(pkid: u16) -> Self {
        Self { pkid }
    }

    pub(crate) fn read(_fixed_header: FixedHeader, mut bytes: Bytes) -> Result<Self, Error> {
        let pkid = read_u16(&mut bytes)?;
        if pkid == 0 {
            return Err(Error::PacketIdZero);
        }
        Ok(PubAck::new(pkid))
    }

    pub(crate) fn write(&self, buffer: &mut BytesMut) -> Result<usize, Error> {
        let len = self.remaining_len()?;
        buffer.put_u8(0x40);
        len.write(buffer);
        buffer.put_u16(self.pkid);

        Ok(1 + len.length() + len.value())
    }

    pub(crate) fn remaining_len(&self) -> Result<VarInt, Error> {
        VarInt::new(2)
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Packet;

    #[test]
    fn puback_encoding() {
        let mut buf = BytesMut::new();
        PubAck::new(10).write(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x40, 0x02, 0x00, 0x0A]);
    }

    #[test]
    fn puback_for_pkid_zero_is_rejected() {
        let mut stream = BytesMut::from(&[0x40, 0x02, 0x00, 0x00][..]);
        assert!(matches!(
            Packet::read(&mut stream, 128),
            Err(Error::PacketIdZero)
        ));
    }
}
