use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::parse::*;
use crate::{Error, FixedHeader, QoS, VarInt};

/// Subscribe request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub pkid: u16,
    pub filters: Vec<Filter>,
}

/// Topic filter with the maximum QoS requested for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub path: String,
    pub qos: QoS,
}

impl Filter {
    pub fn new(path: impl Into<String>, qos: QoS) -> Self {
        Self {
            path: path.into(),
            qos,
        }
    }

    fn len(&self) -> Result<usize, Error> {
        // length prefix + filter + requested qos
        Ok(prefixed_len(self.path.len())? + 1)
    }
}

impl Subscribe {
    pub fn new(filter: Filter) -> Self {
        Self {
            pkid: 0,
            filters: vec![filter],
        }
    }

    pub(crate) fn read(_fixed_header: FixedHeader, mut bytes: Bytes) -> Result<Self, Error> {
        let pkid = read_u16(&mut bytes)?;

        let mut filters = Vec::new();
        while bytes.has_remaining() {
            let path = read_mqtt_string(&mut bytes)?;
            let options = read_u8(&mut bytes)?;
            filters.push(Filter {
                path,
                qos: QoS::try_from(options & 0b0000_0011)?,
            });
        }

        if filters.is_empty() {
            return Err(Error::EmptySubscription);
        }

        Ok(Subscribe { pkid, filters })
    }

    pub(crate) fn write(&self, buffer: &mut BytesMut) -> Result<usize, Error> {
        if self.filters.is_empty() {
            return Err(Error::EmptySubscription);
        }

        let len = self.remaining_len()?;
        // reserved flags of subscribe are 0b0010
        buffer.put_u8(0x82);
        len.write(buffer);
        buffer.put_u16(self.pkid);

        for filter in &self.filters {
            write_mqtt_string(buffer, &filter.path);
            buffer.put_u8(filter.qos as u8);
        }

        Ok(1 + len.length() + len.value())
    }

    pub(crate) fn remaining_len(&self) -> Result<VarInt, Error> {
        let filters = self
            .filters
            .iter()
            .map(Filter::len)
            .sum::<Result<usize, Error>>()?;
        VarInt::new(2 + filters)
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Packet;

    #[test]
    fn subscribe_parsing() {
        #[rustfmt::skip]
        let stream = [
            0b1000_0010, 13,
            0x01, 0x04, // pkid = 260
            0x00, 0x03, b'a', b'/', b'+', 0x00, // 'a/+' at qos 0
            0x00, 0x01, b'#', 0x01, // '#' at qos 1
        ];

        let mut stream = BytesMut::from(&stream[..]);
        let packet = Packet::read(&mut stream, 128).unwrap();

        assert_eq!(
            packet,
            Packet::Subscribe(Subscribe {
                pkid: 260,
                filters: vec![
                    Filter::new("a/+", QoS::AtMostOnce),
                    Filter::new("#", QoS::AtLeastOnce),
                ],
            })
        );
    }

    #[test]
    fn single_filter_subscribe_encoding() {
        let mut subscribe = Subscribe::new(Filter::new("sdk/test/Python", QoS::AtLeastOnce));
        subscribe.pkid = 1;

        let mut buf = BytesMut::new();
        subscribe.write(&mut buf).unwrap();

        let mut expected = vec![0x82, 20, 0x00, 0x01, 0x00, 15];
        expected.extend_from_slice(b"sdk/test/Python");
        expected.push(0x01);
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn subscribe_without_filters_is_rejected() {
        let mut stream = BytesMut::from(&[0x82, 0x02, 0x00, 0x01][..]);
        assert!(matches!(
            Packet::read(&mut stream, 128),
            Err(Error::EmptySubscription)
        ));
    }
}
