use bytes::{BufMut, Bytes, BytesMut};

use crate::parse::*;
use crate::{Error, FixedHeader, VarInt};

/// Connect acknowledgment
///
/// Sent by the broker in response to a CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAck {
    /// Whether the broker resumed a session it kept for this client id
    pub session_present: bool,
    pub code: ConnectReturnCode,
}

/// MQTT 3.1.1 return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Success = 0,
    RefusedProtocolVersion,
    BadClientId,
    ServiceUnavailable,
    BadUserNamePassword,
    NotAuthorized,
}

impl ConnectReturnCode {
    /// A refusal that will be repeated on every retry with the same options.
    ///
    /// Only an unavailable service is worth reconnecting for.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Success | Self::ServiceUnavailable)
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Success,
            1 => Self::RefusedProtocolVersion,
            2 => Self::BadClientId,
            3 => Self::ServiceUnavailable,
            4 => Self::BadUserNamePassword,
            5 => Self::NotAuthorized,
            num => return Err(Error::InvalidConnectReturnCode(num)),
        };

        Ok(code)
    }
}

impl ConnAck {
    pub fn new(code: ConnectReturnCode, session_present: bool) -> Self {
        Self {
            session_present,
            code,
        }
    }

    pub(crate) fn read(_fixed_header: FixedHeader, mut bytes: Bytes) -> Result<Self, Error> {
        let flags = read_u8(&mut bytes)?;
        let return_code = read_u8(&mut bytes)?;

        Ok(ConnAck {
            session_present: (flags & 0x01) == 1,
            code: ConnectReturnCode::try_from(return_code)?,
        })
    }

    pub(crate) fn write(&self, buffer: &mut BytesMut) -> Result<usize, Error> {
        let len = self.remaining_len()?;
        buffer.put_u8(0x20);
        len.write(buffer);
        buffer.put_u8(self.session_present as u8);
        buffer.put_u8(self.code as u8);

        Ok(1 + len.length() + len.value())
    }

    pub(crate) fn remaining_len(&self) -> Result<VarInt, Error> {
        // acknowledge flags + return code
        VarInt::new(1 + 1)
    }
}
