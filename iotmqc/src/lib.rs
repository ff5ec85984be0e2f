//! A minimal MQTT 3.1.1 client.
//!
//! The client owns a single connection to a broker and keeps it alive on its
//! own: it sends keep-alive pings, reconnects with exponential backoff after
//! an interruption, resubscribes when the broker lost the session and
//! retransmits every QoS 1 publish that was not acknowledged yet.
//!
//! Work happens on two background threads. The event loop thread owns the
//! network connection and the session state, while the callback thread runs
//! the user's [`Callbacks`] and subscription handlers, so a slow handler
//! never delays a keep-alive ping. Every request returns a [`Notice`] that
//! can be awaited or blocked on.
//!
//! ```no_run
//! use iotmqc::{Callbacks, Client, OptionBuilder, QoS};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = OptionBuilder::new_tcp("localhost", 1883)
//!     .client_id("sensor-1")
//!     .finalize();
//! let callbacks = Callbacks::new()
//!     .on_connection_interrupted(|error| eprintln!("interrupted: {error}"));
//!
//! let client = Client::new(options, callbacks)?;
//! client.connect().wait()?;
//! client
//!     .subscribe("sensors/+/temperature", QoS::AtLeastOnce, |message| {
//!         println!("{}: {:?}", message.topic, message.payload);
//!     })
//!     .wait()?;
//! client.publish("sensors/1/temperature", "21.5", QoS::AtLeastOnce, false).wait()?;
//! client.disconnect().wait()?;
//! # Ok(())
//! # }
//! ```

mod callbacks;
mod client;
mod eventloop;
mod events;
mod framed;
mod keepalive;
mod options;
#[cfg(feature = "proxy")]
mod proxy;
mod state;
#[cfg(feature = "use-rustls")]
mod tls;
mod topic;
mod transport;

pub use callbacks::{Callbacks, MessageHandler};
pub use client::{Client, ClientError, Notice, Reply, Request};
pub use eventloop::ConnectionError;
pub use events::{ConnectResult, Event, Message, PublishResult, ResubscribeError, SubscribeResult};
pub use options::{MqttOptions, OptionBuilder};
#[cfg(feature = "proxy")]
pub use proxy::{Proxy, ProxyAuth, ProxyError};
pub use state::{ConnectionState, SessionSnapshot, StateError, Subscription};
#[cfg(feature = "use-rustls")]
pub use tls::Error as TlsError;
pub use topic::{matches, valid_filter, valid_topic};
#[cfg(feature = "use-rustls")]
pub use transport::TlsConfiguration;
pub use transport::{Transport, TransportError};

pub use iotmq_bytes::{ConnectReturnCode, LastWill, QoS};
#[cfg(feature = "use-rustls")]
pub use tokio_rustls;
