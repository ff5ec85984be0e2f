use bytes::{BufMut, Bytes, BytesMut};

use crate::parse::*;
use crate::{Error, FixedHeader, QoS, VarInt};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

/// Connection request
///
/// The first packet a client sends after the network connection is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// Keep alive interval in seconds, 0 disables it
    pub keep_alive: u16,
    /// Asks the broker to discard any previous session
    pub clean_session: bool,
    pub client_id: String,
    /// Message the broker publishes if the client goes away uncleanly
    pub last_will: Option<LastWill>,
    pub login: Option<Login>,
}

impl Connect {
    pub fn new(client_id: impl Into<String>, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            keep_alive,
            clean_session,
            client_id: client_id.into(),
            last_will: None,
            login: None,
        }
    }

    pub(crate) fn read(_fixed_header: FixedHeader, mut bytes: Bytes) -> Result<Self, Error> {
        let protocol_name = read_mqtt_string(&mut bytes)?;
        if protocol_name != PROTOCOL_NAME {
            return Err(Error::InvalidProtocol);
        }

        let protocol_level = read_u8(&mut bytes)?;
        if protocol_level != PROTOCOL_LEVEL {
            return Err(Error::InvalidProtocolLevel(protocol_level));
        }

        let connect_flags = read_u8(&mut bytes)?;
        let keep_alive = read_u16(&mut bytes)?;
        let client_id = read_mqtt_string(&mut bytes)?;
        let last_will = LastWill::read(connect_flags, &mut bytes)?;
        let login = Login::read(connect_flags, &mut bytes)?;

        Ok(Connect {
            keep_alive,
            clean_session: (connect_flags & 0b10) != 0,
            client_id,
            last_will,
            login,
        })
    }

    pub(crate) fn write(&self, buffer: &mut BytesMut) -> Result<usize, Error> {
        let len = self.remaining_len()?;

        buffer.put_u8(0x10);
        len.write(buffer);
        write_mqtt_string(buffer, PROTOCOL_NAME);
        buffer.put_u8(PROTOCOL_LEVEL);

        let mut connect_flags = 0;
        if self.clean_session {
            connect_flags |= 0b10;
        }
        if let Some(will) = &self.last_will {
            connect_flags |= will.flags();
        }
        if let Some(login) = &self.login {
            connect_flags |= login.flags();
        }
        buffer.put_u8(connect_flags);
        buffer.put_u16(self.keep_alive);

        write_mqtt_string(buffer, &self.client_id);
        if let Some(will) = &self.last_will {
            write_mqtt_string(buffer, &will.topic);
            write_mqtt_bytes(buffer, &will.payload);
        }
        if let Some(login) = &self.login {
            login.write(buffer);
        }

        Ok(1 + len.length() + len.value())
    }

    pub(crate) fn remaining_len(&self) -> Result<VarInt, Error> {
        // protocol name + level + flags + keep alive
        let mut len = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
        len += prefixed_len(self.client_id.len())?;

        if let Some(will) = &self.last_will {
            len += prefixed_len(will.topic.len())? + prefixed_len(will.payload.len())?;
        }

        if let Some(login) = &self.login {
            len += login.len()?;
        }

        VarInt::new(len)
    }
}

/// LastWill that the broker forwards on behalf of the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl LastWill {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> LastWill {
        LastWill {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0b100 | ((self.qos as u8) << 3);
        if self.retain {
            flags |= 0b0010_0000;
        }
        flags
    }

    fn read(connect_flags: u8, bytes: &mut Bytes) -> Result<Option<LastWill>, Error> {
        if connect_flags & 0b100 == 0 {
            // will qos and retain must be zero without a will
            if connect_flags & 0b0011_1000 != 0 {
                return Err(Error::IncorrectPacketFormat);
            }
            return Ok(None);
        }

        let topic = read_mqtt_string(bytes)?;
        let payload = read_mqtt_bytes(bytes)?;
        Ok(Some(LastWill {
            topic,
            payload,
            qos: QoS::try_from((connect_flags & 0b1_1000) >> 3)?,
            retain: (connect_flags & 0b0010_0000) != 0,
        }))
    }
}

/// Username and password sent with the connect request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    pub password: String,
}

impl Login {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Login {
        Login {
            username: username.into(),
            password: password.into(),
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if !self.username.is_empty() {
            flags |= 0x80;
        }
        if !self.password.is_empty() {
            flags |= 0x40;
        }
        flags
    }

    fn read(connect_flags: u8, bytes: &mut Bytes) -> Result<Option<Login>, Error> {
        let username = match connect_flags & 0x80 {
            0 => String::new(),
            _ => read_mqtt_string(bytes)?,
        };

        let password = match connect_flags & 0x40 {
            0 => String::new(),
            _ => read_mqtt_string(bytes)?,
        };

        if username.is_empty() && password.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Login { username, password }))
        }
    }

    fn write(&self, buffer: &mut BytesMut) {
        if !self.username.is_empty() {
            write_mqtt_string(buffer, &self.username);
        }

        if !self.password.is_empty() {
            write_mqtt_string(buffer, &self.password);
        }
    }

    fn len(&self) -> Result<usize, Error> {
        let mut len = 0;
        if !self.username.is_empty() {
            len += prefixed_len(self.username.len())?;
        }
        if !self.password.is_empty() {
            len += prefixed_len(self.password.len())?;
        }
        Ok(len)
    }
}
