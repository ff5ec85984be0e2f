use bytes::{BufMut, BytesMut};

use crate::Error;

/// Graceful disconnect notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnect;

impl Disconnect {
    pub(crate) fn write(&self, buffer: &mut BytesMut) -> Result<usize, Error> {
        buffer.put_slice(&[0xE0, 0x00]);
        Ok(2)
    }
}
