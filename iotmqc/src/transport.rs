use std::net::SocketAddr;
#[cfg(feature = "use-rustls")]
use std::sync::Arc;

use tokio::net::{lookup_host, TcpSocket, TcpStream};
#[cfg(feature = "use-rustls")]
use tokio_rustls::rustls::ClientConfig;

use crate::framed::{AsyncReadWrite, Network};
use crate::options::{MqttOptions, NetworkOptions};

/// Failure to open the byte stream to the broker
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Socket connect: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "use-rustls")]
    #[error("Tls connect: {0}")]
    Tls(#[from] crate::tls::Error),
    #[cfg(feature = "proxy")]
    #[error("Proxy connect: {0}")]
    Proxy(#[from] crate::proxy::ProxyError),
}

/// Transport methods. Defaults to TCP.
#[derive(Clone, Debug, Default)]
pub enum Transport {
    #[default]
    Tcp,
    #[cfg(feature = "use-rustls")]
    Tls(TlsConfiguration),
}

impl Transport {
    /// Plain tcp
    pub fn tcp() -> Self {
        Self::Tcp
    }

    /// Mutually authenticated tls from PEM encoded material
    #[cfg(feature = "use-rustls")]
    pub fn tls(
        ca: Vec<u8>,
        client_auth: Option<(Vec<u8>, Vec<u8>)>,
        alpn: Option<Vec<Vec<u8>>>,
    ) -> Self {
        Self::Tls(TlsConfiguration::Simple {
            ca,
            alpn,
            client_auth,
        })
    }
}

/// TLS configuration method
#[cfg(feature = "use-rustls")]
#[derive(Clone, Debug)]
pub enum TlsConfiguration {
    Simple {
        /// PEM encoded trust roots
        ca: Vec<u8>,
        /// Protocols offered during ALPN
        alpn: Option<Vec<Vec<u8>>>,
        /// PEM encoded client certificate chain and private key
        client_auth: Option<(Vec<u8>, Vec<u8>)>,
    },
    /// Injected rustls ClientConfig for full control over the handshake
    Rustls(Arc<ClientConfig>),
}

#[cfg(feature = "use-rustls")]
impl From<ClientConfig> for TlsConfiguration {
    fn from(config: ClientConfig) -> Self {
        TlsConfiguration::Rustls(Arc::new(config))
    }
}

/// Create a TCP socket, connected to the given host
pub(crate) async fn socket(
    host: String,
    network_options: &NetworkOptions,
) -> std::io::Result<TcpStream> {
    let addrs = lookup_host(host).await?;
    let mut last_err = None;

    for addr in addrs {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        socket.set_nodelay(network_options.tcp_nodelay)?;

        if let Some(size) = network_options.tcp_send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = network_options.tcp_recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }

        match socket.connect(addr).await {
            Ok(s) => return Ok(s),
            Err(e) => {
                log::debug!("Connecting to {addr} failed: {e}");
                last_err = Some(e);
            }
        };
    }

    Err(last_err.unwrap_or_else(|| std::io::Error::other("Could not resolve host to any address")))
}

/// Open the byte stream described by `options`: an optional proxy tunnel,
/// then tcp and an optional tls handshake on top.
pub(crate) async fn connect(options: &MqttOptions) -> Result<Network, TransportError> {
    let (domain, port) = options.broker_address();

    let tcp_stream: Box<dyn AsyncReadWrite> = {
        #[cfg(feature = "proxy")]
        match options.proxy() {
            Some(proxy) => {
                proxy
                    .connect(domain, port, &options.network_options)
                    .await?
            }
            None => Box::new(socket(format!("{domain}:{port}"), &options.network_options).await?),
        }
        #[cfg(not(feature = "proxy"))]
        {
            Box::new(socket(format!("{domain}:{port}"), &options.network_options).await?)
        }
    };

    let network = match options.transport() {
        Transport::Tcp => Network::new(
            tcp_stream,
            options.max_packet_size_in,
            options.max_packet_size_out,
        ),
        #[cfg(feature = "use-rustls")]
        Transport::Tls(tls_config) => {
            let socket = crate::tls::tls_connect(domain, tls_config, tcp_stream).await?;
            Network::new(
                socket,
                options.max_packet_size_in,
                options.max_packet_size_out,
            )
        }
    };

    Ok(network)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn socket_applies_options_and_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let options = NetworkOptions {
            tcp_nodelay: true,
            conn_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let stream = socket(addr.to_string(), &options).await.unwrap();
        assert!(stream.nodelay().unwrap());
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn refused_connection_is_an_io_error() {
        // bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let options = NetworkOptions::default();
        assert!(socket(addr.to_string(), &options).await.is_err());
    }
}
