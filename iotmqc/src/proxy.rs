use async_http_proxy::{http_connect_tokio, http_connect_tokio_with_basic_auth, HttpError};

use crate::framed::AsyncReadWrite;
use crate::options::NetworkOptions;

/// HTTP proxy the broker connection is tunnelled through with `CONNECT`
#[derive(Clone, Debug)]
pub struct Proxy {
    pub addr: String,
    pub port: u16,
    pub auth: ProxyAuth,
}

#[derive(Clone, Debug, Default)]
pub enum ProxyAuth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Socket connect: {0}")]
    Io(#[from] std::io::Error),
    #[error("Proxy refused the tunnel: {0}")]
    Proxy(#[from] HttpError),
}

impl Proxy {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            auth: ProxyAuth::None,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = ProxyAuth::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Opens a tunnel to `host:port` through the proxy
    pub(crate) async fn connect(
        &self,
        host: &str,
        port: u16,
        network_options: &NetworkOptions,
    ) -> Result<Box<dyn AsyncReadWrite>, ProxyError> {
        let proxy_addr = format!("{}:{}", self.addr, self.port);
        let mut tcp = crate::transport::socket(proxy_addr, network_options).await?;

        match &self.auth {
            ProxyAuth::None => http_connect_tokio(&mut tcp, host, port).await?,
            ProxyAuth::Basic { username, password } => {
                http_connect_tokio_with_basic_auth(&mut tcp, host, port, username, password).await?
            }
        };

        log::debug!("Tunnel to {host}:{port} open through {}", self.addr);
        Ok(Box::new(tcp))
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    async fn fake_proxy(reply: &'static [u8]) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(reply).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        (port, handle)
    }

    #[tokio::test]
    async fn tunnel_is_requested_for_the_broker() {
        let (port, request) = fake_proxy(b"HTTP/1.1 200 Connection established\r\n\r\n").await;

        let proxy = Proxy::new("127.0.0.1", port);
        proxy
            .connect("broker.example.com", 8883, &NetworkOptions::default())
            .await
            .unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("CONNECT broker.example.com:8883 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn refused_tunnel_is_a_proxy_error() {
        let (port, _request) =
            fake_proxy(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await;

        let proxy = Proxy::new("127.0.0.1", port).with_basic_auth("user", "wrong");
        let result = proxy
            .connect("broker.example.com", 8883, &NetworkOptions::default())
            .await;
        assert!(matches!(result, Err(ProxyError::Proxy(_))));
    }
}
