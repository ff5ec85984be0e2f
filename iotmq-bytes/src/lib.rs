//! MQTT protocol serialization and deserialization
//!
//! This crate implements the assembling and disassembling of the MQTT 3.1.1
//! control packets needed by a minimal client: connect, publish and subscribe
//! with their acknowledgements, keep-alive pings and disconnect.
//!
//! It is mainly intended to be used with the `iotmqc` client.

mod codec;
mod error;
mod header;
mod packet;
mod parse;

pub use codec::Codec;
pub use error::Error;
pub use header::FixedHeader;
pub use packet::*;
pub use parse::VarInt;

/// Quality of Service levels for packet delivery.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[allow(clippy::enum_variant_names)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            qos => Err(Error::InvalidQoS(qos)),
        }
    }
}
