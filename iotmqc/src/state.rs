use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use iotmq_bytes::{Filter, Packet, PubAck, Publish, QoS, SubAck, Subscribe};
use tokio::time::Instant;

use crate::callbacks::{Dispatch, MessageHandler};
use crate::client::{resolve, ClientError, Reply};
use crate::events::{Event, Message, PublishResult, ResubscribeError, SubscribeResult};

/// Errors during state handling
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Io Error while state is passed to network
    #[error("Io error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Mqtt serialization/deserialization error: {0}")]
    Deserialization(#[from] iotmq_bytes::Error),
    /// Received a packet a client never expects from a broker
    #[error("Received unexpected packet: {0:?}")]
    WrongPacket(Box<Packet>),
    #[error("Connection closed by peer abruptly")]
    ConnectionAborted,
    #[error("No response from broker within the keep-alive deadline")]
    KeepAliveTimeout,
}

/// Lifecycle state of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Lost an established connection, waiting to reconnect
    Interrupted,
    Reconnecting,
}

/// Active subscription of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: String,
    /// Requested QoS
    pub qos: QoS,
    /// QoS granted by the broker, `None` until the SUBACK arrives
    pub granted: Option<QoS>,
}

/// Copy of the session taken by [`Client::snapshot`](crate::Client::snapshot)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    /// Packet identifiers of operations awaiting an acknowledgment, sorted
    pub inflight: Vec<u16>,
    /// Subscriptions in the order they were made
    pub subscriptions: Vec<Subscription>,
}

/// Operation waiting for an acknowledgment
enum Pending {
    Publish {
        publish: Publish,
        reply: Reply<PublishResult>,
        /// Retransmissions after an ack timeout
        retries: u32,
        last_sent: Instant,
        sequence: u64,
    },
    Subscribe {
        subscribe: Subscribe,
        reply: Reply<SubscribeResult>,
        sequence: u64,
    },
    /// Subscription replayed after the broker lost the session
    Resubscribe { subscribe: Subscribe, sequence: u64 },
}

impl Pending {
    fn sequence(&self) -> u64 {
        match self {
            Pending::Publish { sequence, .. }
            | Pending::Subscribe { sequence, .. }
            | Pending::Resubscribe { sequence, .. } => *sequence,
        }
    }
}

/// SUBACKs collected for one replay of the subscriptions
#[derive(Debug, Default)]
struct ResubscribeBatch {
    /// Replayed filters in subscription order
    filters: Vec<String>,
    results: HashMap<String, SubscribeResult>,
}

/// State of the mqtt session.
///
/// Methods only modify the state, the event loop does the network
/// operations. Packets the state wants written are returned, events and
/// handler updates for the callback thread are queued in `events`.
pub(crate) struct MqttState {
    pub connection: ConnectionState,
    /// Operations awaiting an ack, by packet identifier
    pending: HashMap<u16, Pending>,
    subscriptions: Vec<Subscription>,
    pub events: VecDeque<Dispatch>,
    /// Number of pending QoS 1 publishes
    inflight: u16,
    max_inflight: u16,
    /// Packet id of the last outgoing packet
    last_pkid: u16,
    /// Orders pending operations for retransmission
    next_sequence: u64,
    ack_timeout: Duration,
    max_retries: u32,
    /// Largest frame the codec is allowed to write
    max_packet_size: u32,
    resubscribe: Option<ResubscribeBatch>,
}

impl MqttState {
    pub fn new(
        max_inflight: u16,
        ack_timeout: Duration,
        max_retries: u32,
        max_packet_size: u32,
    ) -> Self {
        MqttState {
            connection: ConnectionState::Disconnected,
            pending: HashMap::new(),
            subscriptions: Vec::new(),
            events: VecDeque::with_capacity(16),
            inflight: 0,
            max_inflight: max_inflight.max(1),
            last_pkid: 0,
            next_sequence: 0,
            ack_timeout,
            max_retries,
            max_packet_size,
            resubscribe: None,
        }
    }

    /// Fails a packet the codec would refuse to write, before it enters the session
    pub fn check_size(&self, packet: &Packet) -> Result<(), ClientError> {
        match packet.size() {
            Ok(size) if size <= self.max_packet_size as usize => Ok(()),
            _ => Err(ClientError::PacketTooLarge {
                max: self.max_packet_size,
            }),
        }
    }

    /// No room for another QoS 1 publish
    pub fn inflight_full(&self) -> bool {
        self.inflight >= self.max_inflight
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut inflight: Vec<u16> = self.pending.keys().copied().collect();
        inflight.sort_unstable();

        SessionSnapshot {
            state: self.connection,
            inflight,
            subscriptions: self.subscriptions.clone(),
        }
    }

    fn emit(&mut self, event: Event) {
        self.events.push_back(Dispatch::Event(event));
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Next free packet identifier after the last one handed out.
    ///
    /// Wraps around, skipping 0 and every identifier still awaiting an ack.
    fn next_pkid(&mut self) -> Result<u16, ClientError> {
        let mut pkid = self.last_pkid;
        for _ in 0..u16::MAX {
            pkid = pkid.wrapping_add(1);
            if pkid == 0 {
                pkid = 1;
            }

            if !self.pending.contains_key(&pkid) {
                self.last_pkid = pkid;
                return Ok(pkid);
            }
        }

        Err(ClientError::PacketIdsExhausted)
    }

    /// Consolidates handling of an incoming packet. Returns the packet to
    /// write back to the broker, if any.
    pub fn handle_incoming_packet(&mut self, packet: Packet) -> Result<Option<Packet>, StateError> {
        match packet {
            Packet::Publish(publish) => Ok(self.handle_incoming_publish(publish)),
            Packet::PubAck(puback) => {
                self.handle_incoming_puback(puback);
                Ok(None)
            }
            Packet::SubAck(suback) => {
                self.handle_incoming_suback(suback);
                Ok(None)
            }
            Packet::PingResp(_) => Ok(None),
            packet => {
                log::error!("Invalid incoming packet = {packet:?}");
                Err(StateError::WrongPacket(Box::new(packet)))
            }
        }
    }

    fn handle_incoming_publish(&mut self, publish: Publish) -> Option<Packet> {
        let ack = match publish.qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(Packet::PubAck(PubAck::new(publish.pkid))),
            QoS::ExactlyOnce => {
                log::warn!(
                    "QoS 2 publish on {} delivered without acknowledgment",
                    publish.topic
                );
                None
            }
        };

        self.emit(Event::MessageReceived(Message::from(publish)));
        ack
    }

    fn handle_incoming_puback(&mut self, puback: PubAck) {
        let pkid = puback.pkid;
        if !matches!(self.pending.get(&pkid), Some(Pending::Publish { .. })) {
            log::warn!("Ignoring unsolicited puback, pkid = {pkid}");
            return;
        }

        if let Some(Pending::Publish { reply, .. }) = self.pending.remove(&pkid) {
            self.inflight -= 1;
            resolve(&reply, Ok(PublishResult { pkid }));
        }
    }

    fn handle_incoming_suback(&mut self, suback: SubAck) {
        let pkid = suback.pkid;
        let (subscribe, reply) = match self.pending.remove(&pkid) {
            Some(Pending::Subscribe {
                subscribe, reply, ..
            }) => (subscribe, Some(reply)),
            Some(Pending::Resubscribe { subscribe, .. }) => (subscribe, None),
            Some(publish) => {
                self.pending.insert(pkid, publish);
                log::warn!("Ignoring suback for a publish, pkid = {pkid}");
                return;
            }
            None => {
                log::warn!("Ignoring unsolicited suback, pkid = {pkid}");
                return;
            }
        };

        let granted = suback.return_codes.first().and_then(|code| code.granted());
        let result = self.apply_suback(pkid, subscribe, granted);
        match reply {
            Some(reply) => resolve(&reply, Ok(result)),
            None => self.record_resubscribe(result),
        }
    }

    /// Confirms or drops the subscription a SUBACK answers
    fn apply_suback(
        &mut self,
        pkid: u16,
        subscribe: Subscribe,
        granted: Option<QoS>,
    ) -> SubscribeResult {
        let topic = subscribe
            .filters
            .into_iter()
            .next()
            .map(|filter| filter.path)
            .unwrap_or_default();

        match granted {
            Some(qos) => {
                if let Some(subscription) = self.subscriptions.iter_mut().find(|s| s.filter == topic) {
                    subscription.granted = Some(qos);
                }
            }
            None => {
                log::warn!("Broker rejected subscription to {topic}");
                self.subscriptions.retain(|s| s.filter != topic);
                self.events.push_back(Dispatch::Unregister(topic.clone()));
            }
        }

        SubscribeResult {
            pkid,
            topic,
            granted,
        }
    }

    fn record_resubscribe(&mut self, result: SubscribeResult) {
        let Some(batch) = &mut self.resubscribe else {
            return;
        };

        batch.results.insert(result.topic.clone(), result);
        if batch.results.len() < batch.filters.len() {
            return;
        }

        let Some(mut batch) = self.resubscribe.take() else {
            return;
        };
        let results: Vec<SubscribeResult> = batch
            .filters
            .iter()
            .filter_map(|filter| batch.results.remove(filter))
            .collect();
        let rejected: Vec<String> = results
            .iter()
            .filter(|r| r.granted.is_none())
            .map(|r| r.topic.clone())
            .collect();

        let outcome = if rejected.is_empty() {
            log::info!("Resubscribed to {} filters", results.len());
            Ok(results)
        } else {
            Err(ResubscribeError { rejected, results })
        };
        self.emit(Event::ResubscribeComplete(outcome));
    }

    /// Adds a publish to the session. Returns the packet to write, if any.
    ///
    /// QoS 0 resolves right away. QoS 1 waits for the PUBACK, the caller
    /// checks [`MqttState::inflight_full`] first.
    pub fn outgoing_publish(
        &mut self,
        mut publish: Publish,
        reply: Reply<PublishResult>,
        now: Instant,
    ) -> Option<Packet> {
        if let Err(e) = self.check_size(&Packet::Publish(publish.clone())) {
            log::warn!("Dropping oversized publish to {}: {e}", publish.topic);
            resolve(&reply, Err(e));
            return None;
        }

        if publish.qos == QoS::AtMostOnce {
            log::debug!("Publish. Topic = {}, Payload Size = {}", publish.topic, publish.payload.len());
            resolve(&reply, Ok(PublishResult { pkid: 0 }));
            return Some(Packet::Publish(publish));
        }

        let pkid = match self.next_pkid() {
            Ok(pkid) => pkid,
            Err(e) => {
                resolve(&reply, Err(e));
                return None;
            }
        };
        publish.pkid = pkid;
        log::debug!(
            "Publish. Topic = {}, Pkid = {}, Payload Size = {}",
            publish.topic,
            pkid,
            publish.payload.len()
        );

        let sequence = self.next_sequence();
        let packet = Packet::Publish(publish.clone());
        self.pending.insert(
            pkid,
            Pending::Publish {
                publish,
                reply,
                retries: 0,
                last_sent: now,
                sequence,
            },
        );
        self.inflight += 1;

        Some(packet)
    }

    /// Adds a subscription to the session and routes matching messages to
    /// `handler` from now on. Subscribing to a known filter again replaces
    /// it without changing its position.
    pub fn outgoing_subscribe(
        &mut self,
        filter: Filter,
        handler: MessageHandler,
        reply: Reply<SubscribeResult>,
    ) -> Option<Packet> {
        if let Err(e) = self.check_size(&Packet::Subscribe(Subscribe::new(filter.clone()))) {
            log::warn!("Dropping oversized subscribe to {}: {e}", filter.path);
            resolve(&reply, Err(e));
            return None;
        }

        let pkid = match self.next_pkid() {
            Ok(pkid) => pkid,
            Err(e) => {
                resolve(&reply, Err(e));
                return None;
            }
        };
        log::debug!("Subscribe. Topics = {}, Pkid = {pkid}", filter.path);

        let subscription = Subscription {
            filter: filter.path.clone(),
            qos: filter.qos,
            granted: None,
        };
        match self.subscriptions.iter_mut().find(|s| s.filter == filter.path) {
            Some(existing) => *existing = subscription,
            None => self.subscriptions.push(subscription),
        }
        self.events.push_back(Dispatch::Register {
            filter: filter.path.clone(),
            handler,
        });

        let mut subscribe = Subscribe::new(filter);
        subscribe.pkid = pkid;
        let sequence = self.next_sequence();
        let packet = Packet::Subscribe(subscribe.clone());
        self.pending.insert(
            pkid,
            Pending::Subscribe {
                subscribe,
                reply,
                sequence,
            },
        );

        Some(packet)
    }

    /// Earliest instant at which a pending publish times out
    pub fn next_ack_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|pending| match pending {
                Pending::Publish { last_sent, .. } => Some(*last_sent + self.ack_timeout),
                _ => None,
            })
            .min()
    }

    /// Retransmits, with the duplicate flag set, every publish whose ack
    /// timed out. Publishes out of retries fail with `PublishTimeout` and
    /// release their packet identifier.
    pub fn retransmit_expired(&mut self, now: Instant) -> Vec<Packet> {
        let mut expired: Vec<(u64, u16)> = self
            .pending
            .iter()
            .filter_map(|(pkid, pending)| match pending {
                Pending::Publish {
                    last_sent,
                    sequence,
                    ..
                } if *last_sent + self.ack_timeout <= now => Some((*sequence, *pkid)),
                _ => None,
            })
            .collect();
        expired.sort_unstable();

        let mut packets = Vec::new();
        for (_, pkid) in expired {
            let Some(Pending::Publish {
                publish,
                retries,
                last_sent,
                ..
            }) = self.pending.get_mut(&pkid)
            else {
                continue;
            };

            if *retries < self.max_retries {
                *retries += 1;
                *last_sent = now;
                log::debug!("Retransmitting publish, pkid = {pkid}, retry = {retries}");
                let mut publish = publish.clone();
                publish.dup = true;
                packets.push(Packet::Publish(publish));
                continue;
            }

            if let Some(Pending::Publish { reply, retries, .. }) = self.pending.remove(&pkid) {
                log::warn!("Publish timed out, pkid = {pkid}");
                self.inflight -= 1;
                let attempts = retries + 1;
                resolve(&reply, Err(ClientError::PublishTimeout { pkid, attempts }));
            }
        }

        packets
    }

    /// Packets to write after a CONNACK accepted a reconnect.
    ///
    /// When the broker lost the session every confirmed subscription is
    /// replayed first, each with a fresh SUBSCRIBE. Then subscribes still
    /// awaiting their SUBACK go out again with their original identifiers,
    /// followed by the unacknowledged publishes in their original order.
    pub fn resume(&mut self, session_present: bool, now: Instant) -> Vec<Packet> {
        if !session_present {
            self.pending
                .retain(|_, pending| !matches!(pending, Pending::Resubscribe { .. }));
            self.resubscribe = None;
        }

        let mut pending: Vec<(u64, u16)> = self
            .pending
            .iter()
            .map(|(pkid, pending)| (pending.sequence(), *pkid))
            .collect();
        pending.sort_unstable();

        let mut subscribes = Vec::new();
        let mut publishes = Vec::new();
        for (_, pkid) in pending {
            match self.pending.get_mut(&pkid) {
                Some(Pending::Subscribe { subscribe, .. })
                | Some(Pending::Resubscribe { subscribe, .. }) => {
                    subscribes.push(Packet::Subscribe(subscribe.clone()))
                }
                Some(Pending::Publish {
                    publish, last_sent, ..
                }) => {
                    *last_sent = now;
                    let mut publish = publish.clone();
                    publish.dup = true;
                    publishes.push(Packet::Publish(publish));
                }
                None => {}
            }
        }

        let mut packets = match session_present {
            true => Vec::new(),
            false => self.replay_subscriptions(),
        };
        packets.extend(subscribes);
        packets.extend(publishes);
        packets
    }

    fn replay_subscriptions(&mut self) -> Vec<Packet> {
        let filters: Vec<Filter> = self
            .subscriptions
            .iter()
            .filter(|s| s.granted.is_some())
            .map(|s| Filter::new(s.filter.clone(), s.qos))
            .collect();
        if filters.is_empty() {
            return Vec::new();
        }

        log::info!("Broker lost the session, resubscribing to {} filters", filters.len());
        self.resubscribe = Some(ResubscribeBatch {
            filters: filters.iter().map(|f| f.path.clone()).collect(),
            results: HashMap::new(),
        });

        let mut packets = Vec::new();
        for filter in filters {
            let pkid = match self.next_pkid() {
                Ok(pkid) => pkid,
                Err(e) => {
                    log::error!("Cannot resubscribe to {}: {e}", filter.path);
                    let result = self.apply_suback(0, Subscribe::new(filter), None);
                    self.record_resubscribe(result);
                    continue;
                }
            };

            let mut subscribe = Subscribe::new(filter);
            subscribe.pkid = pkid;
            let sequence = self.next_sequence();
            packets.push(Packet::Subscribe(subscribe.clone()));
            self.pending
                .insert(pkid, Pending::Resubscribe { subscribe, sequence });
        }

        packets
    }

    /// Fails every outstanding operation with `ConnectionClosed` and clears
    /// the session
    pub fn fail_all(&mut self) {
        let mut pending: Vec<(u16, Pending)> = self.pending.drain().collect();
        pending.sort_unstable_by_key(|(_, pending)| pending.sequence());

        for (_, pending) in pending {
            match pending {
                Pending::Publish { reply, .. } => resolve(&reply, Err(ClientError::ConnectionClosed)),
                Pending::Subscribe { reply, .. } => {
                    resolve(&reply, Err(ClientError::ConnectionClosed))
                }
                Pending::Resubscribe { .. } => {}
            }
        }

        self.subscriptions.clear();
        self.inflight = 0;
        self.last_pkid = 0;
        self.resubscribe = None;
        self.events.push_back(Dispatch::Clear);
    }
}
