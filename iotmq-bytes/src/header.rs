//! Fixed header of MQTT control packets.

use crate::parse::VarInt;
use crate::{Error, PacketType};

/// Fixed header of an MQTT Control Packet
///
/// ```text
///           7                          3                          0
///           +--------------------------+--------------------------+
/// byte 1    | MQTT Control Packet Type |   Flags for each type    |
///           +--------------------------+--------------------------+
/// bytes 2.. |            Remaining Length (1 to 4 bytes)          |
///           +-----------------------------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    /// Packet type and flags
    pub control_field: u8,
    /// Length of the variable header plus payload
    pub remaining_len: VarInt,
}

impl FixedHeader {
    pub fn new(control_field: u8, remaining_len: VarInt) -> FixedHeader {
        FixedHeader {
            control_field,
            remaining_len,
        }
    }

    pub fn packet_type(&self) -> Result<PacketType, Error> {
        PacketType::try_from(self.control_field >> 4)
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.control_field & 0x0F
    }

    /// Size of the fixed header itself
    #[inline]
    pub fn size(&self) -> usize {
        1 + self.remaining_len.length()
    }

    /// Size of the whole frame: fixed header, variable header and payload
    #[inline]
    pub fn packet_size(&self) -> usize {
        self.size() + self.remaining_len.value()
    }

    /// Parses the fixed header at the start of `stream` and checks that the
    /// whole frame it announces is already buffered.
    ///
    /// Nothing is consumed. `InsufficientBytes` carries the number of bytes
    /// still missing so the caller can reserve space before reading again.
    pub fn check(stream: &[u8], max_packet_size: u32) -> Result<Self, Error> {
        let (&byte1, rest) = stream.split_first().ok_or(Error::InsufficientBytes(2))?;
        let remaining_len = VarInt::read(rest)?;
        let fixed_header = Self::new(byte1, remaining_len);

        // Reject oversized frames before buffering them
        if remaining_len > max_packet_size as usize {
            return Err(Error::PayloadSizeLimitExceeded {
                pkt_size: remaining_len.into(),
                max: max_packet_size,
            });
        }

        let frame_length = fixed_header.packet_size();
        if stream.len() < frame_length {
            return Err(Error::InsufficientBytes(frame_length - stream.len()));
        }

        Ok(fixed_header)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_frame_reports_missing_bytes() {
        // publish announcing 10 bytes with only 3 buffered
        let stream = [0x30, 10, 0x00, 0x03, b'a'];
        assert!(matches!(
            FixedHeader::check(&stream, 1024),
            Err(Error::InsufficientBytes(7))
        ));
    }

    #[test]
    fn empty_stream_needs_at_least_a_header() {
        assert!(matches!(
            FixedHeader::check(&[], 1024),
            Err(Error::InsufficientBytes(2))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected_before_buffering() {
        let stream = [0x30, 0x80, 0x01];
        assert!(matches!(
            FixedHeader::check(&stream, 100),
            Err(Error::PayloadSizeLimitExceeded {
                pkt_size: 128,
                max: 100
            })
        ));
    }
}
