use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Connects to a broker with mutual TLS, subscribes to a topic and publishes
/// messages to it.
#[derive(Parser, Debug)]
#[command(name = "pubsub")]
#[command(version)]
pub struct Args {
    /// Broker endpoint
    #[arg(long)]
    pub endpoint: String,

    #[arg(long, default_value_t = 8883)]
    pub port: u16,

    /// Path to the PEM encoded client certificate
    #[arg(long)]
    pub cert: PathBuf,

    /// Path to the PEM encoded private key
    #[arg(long)]
    pub key: PathBuf,

    /// Path to the PEM encoded root CA
    #[arg(long)]
    pub root_ca: PathBuf,

    /// Client id, random when not given
    #[arg(long, default_value_t = uuid::Uuid::new_v4().to_string())]
    pub client_id: String,

    /// Topic to publish and subscribe to
    #[arg(long, default_value = "sdk/test/Python")]
    pub topic: String,

    #[arg(long, value_enum, default_value_t = Mode::Both)]
    pub mode: Mode,

    /// Number of messages to publish, 0 publishes until interrupted
    #[arg(long, default_value_t = 10)]
    pub count: u64,

    /// Message to publish, a counter is appended
    #[arg(long, default_value = "Hello World")]
    pub message: String,

    #[arg(long)]
    pub proxy_host: Option<String>,

    /// Proxy port, 0 disables the proxy
    #[arg(long, default_value_t = 0)]
    pub proxy_port: u16,

    /// Keep the endpoint and client id out of the output
    #[arg(long)]
    pub ci: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Publish,
    Subscribe,
    Both,
}

impl Mode {
    pub fn publishes(self) -> bool {
        matches!(self, Mode::Publish | Mode::Both)
    }

    pub fn subscribes(self) -> bool {
        matches!(self, Mode::Subscribe | Mode::Both)
    }
}

impl Args {
    /// Proxy to tunnel through, when both host and a non-zero port are given
    pub fn proxy(&self) -> Option<(&str, u16)> {
        match (&self.proxy_host, self.proxy_port) {
            (Some(host), port) if port != 0 => Some((host, port)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    const REQUIRED: [&str; 9] = [
        "pubsub",
        "--endpoint",
        "broker.example.com",
        "--cert",
        "device.pem.crt",
        "--key",
        "private.pem.key",
        "--root-ca",
        "root-CA.crt",
    ];

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(REQUIRED).unwrap();

        assert_eq!(args.port, 8883);
        assert_eq!(args.topic, "sdk/test/Python");
        assert_eq!(args.mode, Mode::Both);
        assert_eq!(args.count, 10);
        assert_eq!(args.message, "Hello World");
        assert_eq!(args.proxy(), None);
        assert!(!args.ci);
        assert!(uuid::Uuid::parse_str(&args.client_id).is_ok());
    }

    #[test]
    fn proxy_needs_host_and_port() {
        let host_only = REQUIRED.into_iter().chain(["--proxy-host", "proxy.local"]);
        let args = Args::try_parse_from(host_only).unwrap();
        assert_eq!(args.proxy(), None);

        let both = REQUIRED
            .into_iter()
            .chain(["--proxy-host", "proxy.local", "--proxy-port", "3128"]);
        let args = Args::try_parse_from(both).unwrap();
        assert_eq!(args.proxy(), Some(("proxy.local", 3128)));
    }

    #[test]
    fn mode_and_credentials() {
        let args = Args::try_parse_from(REQUIRED.into_iter().chain(["--mode", "subscribe"])).unwrap();
        assert!(args.mode.subscribes());
        assert!(!args.mode.publishes());

        let missing_ca = REQUIRED.into_iter().take(7);
        assert!(Args::try_parse_from(missing_ca).is_err());
    }
}
