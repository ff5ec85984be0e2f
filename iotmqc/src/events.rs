use std::sync::Arc;

use bytes::Bytes;
use iotmq_bytes::{ConnectReturnCode, Publish, QoS};

use crate::ConnectionError;

/// Application message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    /// The broker may have delivered this message before
    pub dup: bool,
    pub retain: bool,
}

impl From<Publish> for Message {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            dup: publish.dup,
            retain: publish.retain,
        }
    }
}

/// Outcome of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResult {
    pub return_code: ConnectReturnCode,
    /// The broker resumed a session it kept for this client id
    pub session_present: bool,
}

/// Outcome of a subscribe request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResult {
    pub pkid: u16,
    pub topic: String,
    /// QoS granted by the broker, `None` if the subscription was rejected
    pub granted: Option<QoS>,
}

/// Outcome of a publish request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishResult {
    /// Packet identifier, 0 for QoS 0
    pub pkid: u16,
}

/// The broker rejected one or more subscriptions replayed after a session loss.
///
/// The rejected filters are no longer part of the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Broker rejected resubscription of {rejected:?}")]
pub struct ResubscribeError {
    pub rejected: Vec<String>,
    /// Every replayed subscription, accepted ones included
    pub results: Vec<SubscribeResult>,
}

/// Lifecycle and data notifications, delivered to [`Callbacks`](crate::Callbacks)
#[derive(Debug, Clone)]
pub enum Event {
    /// A CONNACK accepted the connection, after `connect()` or a reconnect
    ConnectionSuccess(ConnectResult),
    /// A connection attempt failed
    ConnectionFailure(Arc<ConnectionError>),
    /// An established connection was lost, the client is reconnecting
    ConnectionInterrupted(Arc<ConnectionError>),
    /// The connection came back after an interruption
    ConnectionResumed(ConnectResult),
    /// The client is disconnected for good, by request or after giving up
    ConnectionClosed,
    /// Every subscription replayed after a session loss got its SUBACK
    ResubscribeComplete(Result<Vec<SubscribeResult>, ResubscribeError>),
    MessageReceived(Message),
}
