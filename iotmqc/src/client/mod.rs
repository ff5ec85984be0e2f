//! Thread safe handle to the event loop.

use std::io;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use flume::Sender;
use iotmq_bytes::{Filter, Publish, QoS};
use tokio::runtime;

use crate::callbacks::{Callbacks, Dispatcher, MessageHandler};
use crate::eventloop::EventLoop;
use crate::events::{ConnectResult, Message, PublishResult, SubscribeResult};
use crate::state::SessionSnapshot;
use crate::topic::{valid_filter, valid_topic};
use crate::{ConnectionError, MqttOptions};

mod notice;
pub(crate) use notice::resolve;
pub use notice::{Notice, Reply};

/// Client Error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid topic name {0:?}")]
    InvalidTopic(String),
    #[error("Invalid topic filter {0:?}")]
    InvalidFilter(String),
    #[error("{0:?} is not supported")]
    UnsupportedQoS(QoS),
    #[error("Client is not connected")]
    NotConnected,
    #[error("Client is already connected")]
    AlreadyConnected,
    #[error("Connection failed: {0}")]
    Connect(Arc<ConnectionError>),
    #[error("Publish with pkid {pkid} not acknowledged after {attempts} attempts")]
    PublishTimeout { pkid: u16, attempts: u32 },
    #[error("Connection closed before the request completed")]
    ConnectionClosed,
    #[error("Packet exceeds the outgoing size limit of {max} bytes")]
    PacketTooLarge { max: u32 },
    #[error("Every packet identifier is in use")]
    PacketIdsExhausted,
    #[error("Timed out waiting for the request to complete")]
    WaitTimeout,
}

/// Requests handled by the event loop
pub enum Request {
    Connect(Reply<ConnectResult>),
    Publish {
        publish: Publish,
        reply: Reply<PublishResult>,
    },
    Subscribe {
        filter: Filter,
        handler: MessageHandler,
        reply: Reply<SubscribeResult>,
    },
    Disconnect(Reply<()>),
    Snapshot(Reply<SessionSnapshot>),
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Connect(_) => f.write_str("Connect"),
            Request::Publish { publish, .. } => f.debug_tuple("Publish").field(publish).finish(),
            Request::Subscribe { filter, .. } => f.debug_tuple("Subscribe").field(filter).finish(),
            Request::Disconnect(_) => f.write_str("Disconnect"),
            Request::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

/// A client to an MQTT broker.
///
/// Cheap to clone and usable from any thread. Every method returns
/// immediately with a [`Notice`] of the request's completion. The
/// connection is closed once every clone is dropped.
#[derive(Clone, Debug)]
pub struct Client {
    request_tx: Sender<Request>,
}

impl Client {
    /// Starts the event loop and callback threads for a new, disconnected client.
    ///
    /// Nothing is sent to the broker until [`Client::connect`].
    pub fn new(options: MqttOptions, callbacks: Callbacks) -> io::Result<Client> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (request_tx, request_rx) = flume::unbounded();
        let (dispatch_tx, dispatch_rx) = flume::unbounded();

        let dispatcher = Dispatcher::new(callbacks);
        thread::Builder::new()
            .name("iotmq-callbacks".to_owned())
            .spawn(move || dispatcher.run(dispatch_rx))?;

        let eventloop = EventLoop::new(options, request_rx, dispatch_tx);
        thread::Builder::new()
            .name("iotmq-eventloop".to_owned())
            .spawn(move || runtime.block_on(eventloop.run()))?;

        Ok(Client { request_tx })
    }

    /// Create a new `Client` from a channel `Sender`.
    ///
    /// This is mostly useful for creating a test instance where you can
    /// listen on the corresponding receiver.
    pub fn from_sender(request_tx: Sender<Request>) -> Self {
        Self { request_tx }
    }

    fn request<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Notice<T> {
        let (reply, notice) = Notice::new();
        // a dropped request drops its reply, which closes the notice
        if self.request_tx.send(request(reply)).is_err() {
            log::debug!("Event loop is gone, request dropped");
        }
        notice
    }

    /// Connects to the broker. Fails once, without retrying, if the broker
    /// cannot be reached or refuses the connection.
    pub fn connect(&self) -> Notice<ConnectResult> {
        self.request(Request::Connect)
    }

    /// Publishes `payload` on `topic` with QoS 0 or 1.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Notice<PublishResult> {
        let topic = topic.into();
        if !valid_topic(&topic) {
            return Notice::failed(ClientError::InvalidTopic(topic));
        }
        if qos == QoS::ExactlyOnce {
            return Notice::failed(ClientError::UnsupportedQoS(qos));
        }

        let mut publish = Publish::new(topic, qos, payload);
        publish.retain = retain;
        self.request(|reply| Request::Publish { publish, reply })
    }

    /// Subscribes to `filter` with QoS 0 or 1. Messages matching it are
    /// handed to `on_message` on the callback thread.
    pub fn subscribe(
        &self,
        filter: impl Into<String>,
        qos: QoS,
        on_message: impl FnMut(Message) + Send + 'static,
    ) -> Notice<SubscribeResult> {
        let filter = filter.into();
        if !valid_filter(&filter) {
            return Notice::failed(ClientError::InvalidFilter(filter));
        }
        if qos == QoS::ExactlyOnce {
            return Notice::failed(ClientError::UnsupportedQoS(qos));
        }

        let filter = Filter::new(filter, qos);
        let handler: MessageHandler = Box::new(on_message);
        self.request(|reply| Request::Subscribe {
            filter,
            handler,
            reply,
        })
    }

    /// Sends DISCONNECT if connected and closes the connection. Outstanding
    /// requests fail with [`ClientError::ConnectionClosed`]. Always succeeds.
    pub fn disconnect(&self) -> Notice<()> {
        self.request(Request::Disconnect)
    }

    /// Copy of the session as seen by the event loop
    pub fn snapshot(&self) -> Notice<SessionSnapshot> {
        self.request(Request::Snapshot)
    }
}
