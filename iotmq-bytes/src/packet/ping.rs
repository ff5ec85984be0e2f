use bytes::{BufMut, BytesMut};

use crate::Error;

/// Keep alive request, sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReq;

/// Keep alive response, sent by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingResp;

impl PingReq {
    pub(crate) fn write(&self, buffer: &mut BytesMut) -> Result<usize, Error> {
        buffer.put_slice(&[0xC0, 0x00]);
        Ok(2)
    }
}

impl PingResp {
    pub(crate) fn write(&self, buffer: &mut BytesMut) -> Result<usize, Error> {
        buffer.put_slice(&[0xD0, 0x00]);
        Ok(2)
    }
}
