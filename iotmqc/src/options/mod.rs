use std::time::Duration;

use iotmq_bytes::{LastWill, Login};

use crate::Transport;

mod builder;
pub use builder::OptionBuilder;

/// Low level socket configuration
#[derive(Debug, Clone, Default)]
pub(crate) struct NetworkOptions {
    pub(crate) tcp_send_buffer_size: Option<u32>,
    pub(crate) tcp_recv_buffer_size: Option<u32>,
    pub(crate) tcp_nodelay: bool,
    /// Bound on establishing a connection, on awaiting CONNACK and on every flush
    pub(crate) conn_timeout: Duration,
}

/// Content of the CONNECT packet
#[derive(Debug, Clone)]
pub(crate) struct ConnectOptions {
    pub(crate) client_id: String,
    pub(crate) clean_session: bool,
    pub(crate) credentials: Option<Login>,
    pub(crate) last_will: Option<LastWill>,
}

/// When and how often an interrupted connection is re-established
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReconnectOptions {
    pub(crate) min_delay: Duration,
    pub(crate) max_delay: Duration,
    /// `None` retries forever
    pub(crate) max_attempts: Option<u32>,
}

impl ReconnectOptions {
    /// Delay before the given (zero based) reconnect attempt.
    ///
    /// Doubles with every attempt, starting at `min_delay` and capped at `max_delay`.
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.min_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Options to configure the client behaviour
///
/// Construct this using an [`OptionBuilder`]. The options are immutable
/// once the client is created.
#[derive(Clone)]
pub struct MqttOptions {
    pub(crate) broker_addr: String,
    pub(crate) port: u16,
    pub(crate) transport: Transport,
    /// Keep alive interval, zero disables pings
    pub(crate) keep_alive: Duration,
    pub(crate) max_packet_size_in: u32,
    pub(crate) max_packet_size_out: u32,
    /// Maximum number of unacknowledged QoS 1 publishes
    pub(crate) max_inflight: u16,
    /// Time to wait for a PUBACK before retransmitting
    pub(crate) ack_timeout: Duration,
    /// Retransmissions of an unacknowledged publish before it fails
    pub(crate) publish_retries: u32,
    pub(crate) connect_options: ConnectOptions,
    pub(crate) network_options: NetworkOptions,
    pub(crate) reconnect: ReconnectOptions,
    #[cfg(feature = "proxy")]
    pub(crate) proxy: Option<crate::Proxy>,
}

impl MqttOptions {
    /// Broker address
    pub fn broker_address(&self) -> (&str, u16) {
        (&self.broker_addr, self.port)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn client_id(&self) -> &str {
        &self.connect_options.client_id
    }

    pub fn clean_session(&self) -> bool {
        self.connect_options.clean_session
    }

    pub fn last_will(&self) -> Option<&LastWill> {
        self.connect_options.last_will.as_ref()
    }

    pub fn max_packet_size(&self) -> u32 {
        self.max_packet_size_in
    }

    pub fn connection_timeout(&self) -> Duration {
        self.network_options.conn_timeout
    }

    pub fn inflight(&self) -> u16 {
        self.max_inflight
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub fn publish_retries(&self) -> u32 {
        self.publish_retries
    }

    pub fn max_reconnect_attempts(&self) -> Option<u32> {
        self.reconnect.max_attempts
    }

    #[cfg(feature = "proxy")]
    pub fn proxy(&self) -> Option<&crate::Proxy> {
        self.proxy.as_ref()
    }

    /// CONNECT packet announcing these options
    pub(crate) fn connect_packet(&self) -> iotmq_bytes::Connect {
        let mut connect = iotmq_bytes::Connect::new(
            self.client_id(),
            self.keep_alive.as_secs().min(u16::MAX as u64) as u16,
            self.clean_session(),
        );
        connect.last_will = self.connect_options.last_will.clone();
        connect.login = self.connect_options.credentials.clone();
        connect
    }
}

// Credentials and key material stay out of logs
impl std::fmt::Debug for MqttOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MqttOptions")
            .field("broker_addr", &self.broker_addr)
            .field("port", &self.port)
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.connect_options.clean_session)
            .field("client_id", &self.connect_options.client_id)
            .field("max_packet_size", &self.max_packet_size_in)
            .field("max_inflight", &self.max_inflight)
            .field("ack_timeout", &self.ack_timeout)
            .field("publish_retries", &self.publish_retries)
            .field("reconnect", &self.reconnect)
            .field("last_will", &self.connect_options.last_will)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_up_to_the_cap() {
        let reconnect = ReconnectOptions {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: None,
        };

        assert_eq!(reconnect.delay(0), Duration::from_millis(100));
        assert_eq!(reconnect.delay(1), Duration::from_millis(200));
        assert_eq!(reconnect.delay(3), Duration::from_millis(800));
        assert_eq!(reconnect.delay(4), Duration::from_secs(1));
        assert_eq!(reconnect.delay(40), Duration::from_secs(1));
    }
}
