//! Parsing utility functions

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Error;

/// Variable Byte Integer
///
/// An unsigned integer encoded in one to four bytes, seven bits per byte with
/// the high bit as continuation flag. MQTT 3.1.1 only uses it for the
/// `Remaining Length` of the fixed header.
///
/// See [MQTT 3.1.1, section 2.2.3](https://docs.oasis-open.org/mqtt/mqtt/v3.1.1/os/mqtt-v3.1.1-os.html#_Toc398718023).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarInt {
    value: u32,
    length: u8,
}

impl PartialOrd<usize> for VarInt {
    fn partial_cmp(&self, other: &usize) -> Option<std::cmp::Ordering> {
        Some(self.value().cmp(other))
    }
}

impl PartialEq<usize> for VarInt {
    fn eq(&self, other: &usize) -> bool {
        self.value().eq(other)
    }
}

impl From<VarInt> for u32 {
    fn from(val: VarInt) -> Self {
        val.value
    }
}

impl VarInt {
    /// Largest value that fits in four bytes
    pub const MAX: usize = 268_435_455;

    /// Creates a new variable byte integer
    ///
    /// # Errors
    /// This will return an error if the value is too large to be encoded
    pub fn new(value: usize) -> Result<Self, Error> {
        let length = match value {
            0..=127 => 1,
            128..=16_383 => 2,
            16_384..=2_097_151 => 3,
            2_097_152..=Self::MAX => 4,
            _ => return Err(Error::PayloadTooLong),
        };
        Ok(Self {
            value: value as u32,
            length,
        })
    }

    /// The numeric value of the variable byte integer
    pub const fn value(&self) -> usize {
        self.value as usize
    }

    /// The number of bytes required to encode this variable byte integer
    pub const fn length(&self) -> usize {
        self.length as usize
    }

    /// Read a variable byte integer from the start of `stream` without consuming it
    pub fn read(stream: &[u8]) -> Result<Self, Error> {
        let mut value: u32 = 0;
        let mut length = 0;

        // Stream 0b1xxx_xxxx 0b1yyy_yyyy 0b1zzz_zzzz 0b0www_wwww will
        // be framed as number 0bwww_wwww_zzz_zzzz_yyy_yyyy_xxx_xxxx
        for &byte in stream {
            value |= ((byte & 0b0111_1111) as u32) << (7 * length);
            length += 1;

            if (byte & 0b1000_0000) == 0 {
                return Ok(Self { value, length });
            }

            // a fifth byte is never valid
            if length >= 4 {
                return Err(Error::MalformedRemainingLength);
            }
        }

        Err(Error::InsufficientBytes(1))
    }

    /// Write a variable byte integer to the stream
    pub fn write(&self, stream: &mut BytesMut) {
        let mut x = self.value;
        loop {
            let mut byte = (x % 128) as u8;
            x >>= 7;
            if x > 0 {
                byte |= 128;
            }

            stream.put_u8(byte);
            if x == 0 {
                break;
            }
        }
    }
}

/// Read length prefixed binary data from a byte stream.
pub fn read_mqtt_bytes(stream: &mut Bytes) -> Result<Bytes, Error> {
    let len = read_u16(stream)? as usize;

    // A length prefix pointing past the framed packet means the sender lied
    // about the remaining length
    if len > stream.len() {
        return Err(Error::BoundaryCrossed(len));
    }

    Ok(stream.split_to(len))
}

/// Read a length prefixed UTF-8 string from a byte stream.
pub fn read_mqtt_string(stream: &mut Bytes) -> Result<String, Error> {
    let s = read_mqtt_bytes(stream)?;
    String::from_utf8(s.to_vec()).map_err(|e| Error::Utf8Encoding(e.utf8_error()))
}

/// Encoded size of `len` bytes of length prefixed data.
///
/// Fails when `len` does not fit the `u16` prefix. Packets check every field
/// with this while computing their remaining length, before anything is written.
pub fn prefixed_len(len: usize) -> Result<usize, Error> {
    match u16::try_from(len) {
        Ok(_) => Ok(2 + len),
        Err(_) => Err(Error::StringTooLong(len)),
    }
}

/// Write length prefixed binary data to a byte stream.
///
/// The length is checked by [`prefixed_len`] beforehand.
pub fn write_mqtt_bytes(stream: &mut BytesMut, bytes: &[u8]) {
    debug_assert!(bytes.len() <= u16::MAX as usize);
    stream.put_u16(bytes.len() as u16);
    stream.extend_from_slice(bytes);
}

/// Write a length prefixed UTF-8 string to a byte stream.
pub fn write_mqtt_string(stream: &mut BytesMut, string: &str) {
    write_mqtt_bytes(stream, string.as_bytes());
}

/// A checked version of [`bytes::Buf::get_u8`]
pub fn read_u8(stream: &mut Bytes) -> Result<u8, Error> {
    if stream.is_empty() {
        return Err(Error::MalformedPacket);
    }

    Ok(stream.get_u8())
}

/// A checked version of [`bytes::Buf::get_u16`]
pub fn read_u16(stream: &mut Bytes) -> Result<u16, Error> {
    if stream.len() < 2 {
        return Err(Error::MalformedPacket);
    }

    Ok(stream.get_u16())
}
