use std::sync::Arc;

use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{InvalidDnsNameError, ServerName};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::framed::AsyncReadWrite;
use crate::TlsConfiguration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading PEM material or the handshake itself failed
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid dns name: {0}")]
    DnsName(#[from] InvalidDnsNameError),
    #[error("TLS: {0}")]
    Tls(#[from] rustls::Error),
    #[error("No valid CA certificate provided")]
    NoValidCertInChain,
    #[error("No valid client certificate provided")]
    NoValidClientCert,
    #[error("No valid private key provided")]
    NoValidClientKey,
}

/// Build the rustls client configuration out of PEM material
pub(crate) fn rustls_config(tls_config: &TlsConfiguration) -> Result<Arc<ClientConfig>, Error> {
    let (ca, alpn, client_auth) = match tls_config {
        TlsConfiguration::Rustls(config) => return Ok(config.clone()),
        TlsConfiguration::Simple {
            ca,
            alpn,
            client_auth,
        } => (ca, alpn, client_auth),
    };

    let mut root_store = RootCertStore::empty();
    let roots = rustls_pemfile::certs(&mut ca.as_slice()).collect::<Result<Vec<_>, _>>()?;
    let (added, ignored) = root_store.add_parsable_certificates(roots);
    if added == 0 {
        return Err(Error::NoValidCertInChain);
    }
    if ignored > 0 {
        log::warn!("Ignored {ignored} unparsable CA certificate(s)");
    }

    let builder = ClientConfig::builder().with_root_certificates(root_store);
    let mut config = match client_auth {
        Some((cert, key)) => {
            let chain = rustls_pemfile::certs(&mut cert.as_slice()).collect::<Result<Vec<_>, _>>()?;
            if chain.is_empty() {
                return Err(Error::NoValidClientCert);
            }

            let key = rustls_pemfile::private_key(&mut key.as_slice())?
                .ok_or(Error::NoValidClientKey)?;
            builder.with_client_auth_cert(chain, key)?
        }
        None => builder.with_no_client_auth(),
    };

    if let Some(alpn) = alpn {
        config.alpn_protocols.extend_from_slice(alpn);
    }

    Ok(Arc::new(config))
}

pub(crate) async fn tls_connect(
    addr: &str,
    tls_config: &TlsConfiguration,
    tcp: Box<dyn AsyncReadWrite>,
) -> Result<TlsStream<Box<dyn AsyncReadWrite>>, Error> {
    let connector = TlsConnector::from(rustls_config(tls_config)?);
    let domain = ServerName::try_from(addr.to_owned())?;
    let tls = connector.connect(domain, tcp).await?;
    Ok(tls)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn garbage_ca_is_rejected() {
        let config = TlsConfiguration::Simple {
            ca: b"not a certificate".to_vec(),
            alpn: None,
            client_auth: None,
        };

        assert!(matches!(
            rustls_config(&config),
            Err(Error::NoValidCertInChain)
        ));
    }

    #[test]
    fn injected_config_is_used_as_is() {
        let config = ClientConfig::builder()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        let config = Arc::new(config);

        let built = rustls_config(&TlsConfiguration::Rustls(config.clone())).unwrap();
        assert!(Arc::ptr_eq(&built, &config));
    }
}
