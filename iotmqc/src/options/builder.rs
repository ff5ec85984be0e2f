use std::time::Duration;

use iotmq_bytes::{LastWill, Login};

use super::{ConnectOptions, MqttOptions, NetworkOptions, ReconnectOptions};
use crate::Transport;
#[cfg(feature = "use-rustls")]
use crate::TlsConfiguration;

#[cfg(feature = "proxy")]
use crate::Proxy;

/// Largest packet size the protocol can express
const MAX_PACKET_SIZE: u32 = 256 * 1024 * 1024;

/// Create [`MqttOptions`](super::MqttOptions) using a builder pattern.
pub struct OptionBuilder {
    // network options
    tcp_send_buffer_size: Option<u32>,
    tcp_recv_buffer_size: Option<u32>,
    tcp_nodelay: bool,
    conn_timeout: Duration,
    // mqtt options
    transport: Transport,
    broker_addr: String,
    port: u16,

    client_id: Option<String>,
    keep_alive: Duration,
    clean_session: bool,
    credentials: Option<Login>,
    last_will: Option<LastWill>,

    max_packet_size_in: u32,
    max_packet_size_out: u32,
    max_inflight: u16,
    ack_timeout: Duration,
    publish_retries: u32,
    reconnect_min_delay: Duration,
    reconnect_max_delay: Duration,
    max_reconnect_attempts: Option<u32>,
    #[cfg(feature = "proxy")]
    proxy: Option<Proxy>,
}

impl OptionBuilder {
    /// Create a new `OptionBuilder` for plain TCP connections
    pub fn new_tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(Transport::Tcp, host.into(), port)
    }

    /// Create a new `OptionBuilder` for TLS connections
    #[cfg(feature = "use-rustls")]
    pub fn new_tls(host: impl Into<String>, port: u16, config: TlsConfiguration) -> Self {
        Self::new(Transport::Tls(config), host.into(), port)
    }

    fn new(transport: Transport, broker_addr: String, port: u16) -> Self {
        Self {
            tcp_send_buffer_size: None,
            tcp_recv_buffer_size: None,
            tcp_nodelay: false,
            conn_timeout: Duration::from_secs(5),
            transport,
            broker_addr,
            port,
            client_id: None,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            credentials: None,
            last_will: None,
            max_packet_size_in: 10 * 1024,
            max_packet_size_out: 10 * 1024,
            max_inflight: 100,
            ack_timeout: Duration::from_secs(10),
            publish_retries: 3,
            reconnect_min_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: None,
            #[cfg(feature = "proxy")]
            proxy: None,
        }
    }

    pub fn finalize(self) -> MqttOptions {
        let client_id = self.client_id.unwrap_or_default();
        if client_id.is_empty() && !self.clean_session {
            // The broker will refuse this with `BadClientId`
            log::warn!("An empty client id without a clean session will be rejected.");
        }

        let network_options = NetworkOptions {
            tcp_send_buffer_size: self.tcp_send_buffer_size,
            tcp_recv_buffer_size: self.tcp_recv_buffer_size,
            tcp_nodelay: self.tcp_nodelay,
            conn_timeout: self.conn_timeout,
        };

        let connect_options = ConnectOptions {
            client_id,
            clean_session: self.clean_session,
            credentials: self.credentials,
            last_will: self.last_will,
        };

        let reconnect = ReconnectOptions {
            min_delay: self.reconnect_min_delay,
            max_delay: self.reconnect_max_delay.max(self.reconnect_min_delay),
            max_attempts: self.max_reconnect_attempts,
        };

        MqttOptions {
            broker_addr: self.broker_addr,
            port: self.port,
            transport: self.transport,
            keep_alive: self.keep_alive,
            max_packet_size_in: self.max_packet_size_in,
            max_packet_size_out: self.max_packet_size_out,
            max_inflight: self.max_inflight,
            ack_timeout: self.ack_timeout,
            publish_retries: self.publish_retries,
            connect_options,
            network_options,
            reconnect,
            #[cfg(feature = "proxy")]
            proxy: self.proxy,
        }
    }
}

// Network options
impl OptionBuilder {
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    pub fn tcp_send_buffer_size(mut self, size: u32) -> Self {
        self.tcp_send_buffer_size = Some(size);
        self
    }

    pub fn tcp_recv_buffer_size(mut self, size: u32) -> Self {
        self.tcp_recv_buffer_size = Some(size);
        self
    }

    /// Bound on opening the connection, on waiting for CONNACK and on every write.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = timeout;
        self
    }

    #[cfg(feature = "proxy")]
    /// Tunnel the connection through an HTTP CONNECT proxy.
    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

// Connect options
impl OptionBuilder {
    /// Set the client identifier to use.
    ///
    /// If this is not set, an empty client id is sent and the broker may
    /// assign one. It *must* be set when [clean_session](Self::clean_session)
    /// is `false`.
    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the last will message.
    pub fn last_will(mut self, will: LastWill) -> Self {
        self.last_will = Some(will);
        self
    }

    /// Set the username and password to use for authentication.
    pub fn credentials<U, P>(mut self, username: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        self.credentials = Some(Login::new(username, password));
        self
    }

    /// `clean_session = false` asks the broker to keep the session, subscriptions
    /// and undelivered QoS 1 messages included, while the client is away.
    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    /// Set the maximum size of an incoming packet, capped to 256MB.
    pub fn max_packet_size(mut self, max_size: u32) -> Self {
        self.max_packet_size_in = max_size.min(MAX_PACKET_SIZE);
        self
    }
}

// Session options
impl OptionBuilder {
    /// Keep-alive interval announced in CONNECT, in whole seconds.
    ///
    /// A PINGREQ goes out whenever the connection was idle for this long.
    /// `Duration::ZERO` turns pings off.
    ///
    /// # Panics
    ///
    /// If the interval is not zero but shorter than one second.
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        assert!(
            duration.is_zero() || duration.as_secs() > 0,
            "keep alive of {duration:?} cannot be announced in whole seconds"
        );

        self.keep_alive = duration;
        self
    }

    /// Set a limit on the size of outgoing packets.
    pub fn max_outgoing_size(mut self, outgoing: u32) -> Self {
        self.max_packet_size_out = outgoing.min(MAX_PACKET_SIZE);
        self
    }

    /// Set the maximum number of unacknowledged QoS 1 publishes.
    ///
    /// Publishes beyond this limit are queued locally until an ack frees a slot.
    pub fn max_inflight(mut self, inflight: u16) -> Self {
        self.max_inflight = inflight.max(1);
        self
    }

    /// Time to wait for a PUBACK before the publish is sent again with the duplicate flag.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Number of retransmissions after which an unacknowledged publish fails.
    pub fn publish_retries(mut self, retries: u32) -> Self {
        self.publish_retries = retries;
        self
    }

    /// Bounds of the exponential backoff between reconnect attempts.
    pub fn reconnect_delay(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_min_delay = min;
        self.reconnect_max_delay = max;
        self
    }

    /// Give up after this many failed reconnect attempts in a row.
    ///
    /// By default the client keeps trying until it is disconnected.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }
}
