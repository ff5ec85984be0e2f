use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;

use flume::{Receiver, Sender};
use iotmq_bytes::{ConnAck, ConnectReturnCode, Disconnect, Packet, PingReq, QoS};
use tokio::time::{self, error::Elapsed, Instant};

use crate::callbacks::Dispatch;
use crate::client::{resolve, ClientError, Notice, Request};
use crate::events::{ConnectResult, Event, PublishResult};
use crate::framed::Network;
use crate::keepalive::{KeepAlive, Tick};
use crate::state::{ConnectionState, MqttState, StateError};
use crate::transport::{self, TransportError};
use crate::MqttOptions;

/// Critical errors of a connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Mqtt state: {0}")]
    MqttState(#[from] StateError),
    #[error("Timeout")]
    Timeout(#[from] Elapsed),
    #[error("Transport: {0}")]
    Transport(#[from] TransportError),
    #[error("Connection refused, return code: `{0:?}`")]
    ConnectionRefused(ConnectReturnCode),
    #[error("Expected ConnAck packet, received: {0:?}")]
    NotConnAck(Box<Packet>),
}

impl ConnectionError {
    /// The broker refused the connection and retrying will not change its mind
    pub fn is_permanent(&self) -> bool {
        matches!(self, ConnectionError::ConnectionRefused(code) if code.is_permanent())
    }
}

/// What woke up the connected loop
enum Wake {
    Request(Request),
    /// Every client handle is gone
    RequestsDone,
    Incoming(Result<Vec<Packet>, StateError>),
    Timer,
}

/// Owns the connection and the session, and serves client requests.
///
/// Runs on its own thread until every [`Client`](crate::Client) is dropped.
pub(crate) struct EventLoop {
    options: MqttOptions,
    state: MqttState,
    /// Present while connected
    network: Option<Network>,
    keepalive: KeepAlive,
    requests_rx: Receiver<Request>,
    /// Requests waiting for the connection to resume or for a free inflight slot
    pending: VecDeque<Request>,
    dispatch_tx: Sender<Dispatch>,
}

impl EventLoop {
    pub fn new(
        options: MqttOptions,
        requests_rx: Receiver<Request>,
        dispatch_tx: Sender<Dispatch>,
    ) -> Self {
        let state = MqttState::new(
            options.inflight(),
            options.ack_timeout(),
            options.publish_retries(),
            options.max_packet_size_out,
        );
        let keepalive = KeepAlive::new(options.keep_alive(), Instant::now());

        Self {
            options,
            state,
            network: None,
            keepalive,
            requests_rx,
            pending: VecDeque::new(),
            dispatch_tx,
        }
    }

    pub async fn run(mut self) {
        loop {
            let flow = match self.state.connection {
                ConnectionState::Connected => self.connected().await,
                ConnectionState::Interrupted | ConnectionState::Reconnecting => {
                    self.reconnect().await
                }
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    self.disconnected().await
                }
            };

            self.dispatch_events();
            if flow.is_break() {
                break;
            }
        }

        log::info!("Event loop done, every client was dropped");
    }

    fn emit(&mut self, event: Event) {
        self.state.events.push_back(Dispatch::Event(event));
    }

    /// Hands queued events and handler updates to the callback thread
    fn dispatch_events(&mut self) {
        for dispatch in self.state.events.drain(..) {
            if self.dispatch_tx.send(dispatch).is_err() {
                log::warn!("Callback thread is gone, dropping events");
                break;
            }
        }
    }

    async fn disconnected(&mut self) -> ControlFlow<()> {
        let Ok(request) = self.requests_rx.recv_async().await else {
            return ControlFlow::Break(());
        };

        match request {
            Request::Connect(reply) => {
                self.state.connection = ConnectionState::Connecting;
                match self.establish().await {
                    Ok(connack) => {
                        let result = ConnectResult {
                            return_code: connack.code,
                            session_present: connack.session_present,
                        };
                        self.emit(Event::ConnectionSuccess(result));
                        resolve(&reply, Ok(result));
                    }
                    Err(e) => {
                        log::error!("Connection failed: {e}");
                        let e = Arc::new(e);
                        self.state.connection = ConnectionState::Disconnected;
                        resolve(&reply, Err(ClientError::Connect(e.clone())));
                        self.emit(Event::ConnectionFailure(e));
                    }
                }
            }
            Request::Disconnect(reply) => resolve(&reply, Ok(())),
            Request::Snapshot(reply) => resolve(&reply, Ok(self.state.snapshot())),
            request => reject(request, ClientError::NotConnected),
        }

        ControlFlow::Continue(())
    }

    /// Opens the transport and performs the CONNECT/CONNACK exchange,
    /// bounded by the connection timeout
    async fn establish(&mut self) -> Result<ConnAck, ConnectionError> {
        let (network, connack) =
            time::timeout(self.options.connection_timeout(), connect(&self.options)).await??;

        log::info!(
            "Connected to {}:{}, session present = {}",
            self.options.broker_addr,
            self.options.port,
            connack.session_present
        );
        self.network = Some(network);
        self.keepalive.reset(Instant::now());
        self.state.connection = ConnectionState::Connected;
        Ok(connack)
    }

    async fn connected(&mut self) -> ControlFlow<()> {
        match self.poll_connected().await {
            Ok(flow) => flow,
            Err(e) => {
                self.interrupt(e);
                ControlFlow::Continue(())
            }
        }
    }

    /// Serves queued requests, then waits for whichever comes first: a new
    /// request, packets from the broker or a keep-alive/ack deadline
    async fn poll_connected(&mut self) -> Result<ControlFlow<()>, ConnectionError> {
        let mut outgoing = Vec::new();
        while self.pending.front().is_some_and(|r| !self.throttled(r)) {
            if let Some(request) = self.pending.pop_front() {
                outgoing.extend(self.outgoing(request));
            }
        }
        self.write(outgoing).await?;
        self.dispatch_events();

        let deadline = match (self.keepalive.deadline(), self.state.next_ack_deadline()) {
            (Some(keepalive), Some(ack)) => Some(keepalive.min(ack)),
            (keepalive, ack) => keepalive.or(ack),
        };
        let timer = time::sleep_until(deadline.unwrap_or_else(Instant::now));

        let Some(network) = self.network.as_mut() else {
            return Err(StateError::ConnectionAborted.into());
        };
        let wake = tokio::select! {
            request = self.requests_rx.recv_async() => match request {
                Ok(request) => Wake::Request(request),
                Err(_) => Wake::RequestsDone,
            },
            packets = network.readb() => Wake::Incoming(packets),
            _ = timer, if deadline.is_some() => Wake::Timer,
        };

        match wake {
            Wake::RequestsDone => {
                log::info!("Every client dropped, closing the connection");
                self.go_disconnected().await;
                return Ok(ControlFlow::Break(()));
            }
            Wake::Request(request) => self.handle_request(request).await?,
            Wake::Incoming(packets) => {
                let now = Instant::now();
                let mut outgoing = Vec::new();
                for packet in packets? {
                    log::trace!("Incoming = {packet:?}");
                    self.keepalive
                        .received(now, matches!(packet, Packet::PingResp(_)));
                    outgoing.extend(self.state.handle_incoming_packet(packet)?);
                }
                self.write(outgoing).await?;
            }
            Wake::Timer => {
                let now = Instant::now();
                let mut outgoing = Vec::new();
                match self.keepalive.poll(now) {
                    Tick::Expired => return Err(StateError::KeepAliveTimeout.into()),
                    Tick::Ping => {
                        log::debug!("Pingreq");
                        self.keepalive.ping_sent(now);
                        outgoing.push(Packet::PingReq(PingReq));
                    }
                    Tick::Wait => {}
                }
                outgoing.extend(self.state.retransmit_expired(now));
                self.write(outgoing).await?;
            }
        }

        self.dispatch_events();
        Ok(ControlFlow::Continue(()))
    }

    async fn handle_request(&mut self, request: Request) -> Result<(), ConnectionError> {
        match request {
            Request::Connect(reply) => resolve(&reply, Err(ClientError::AlreadyConnected)),
            Request::Snapshot(reply) => resolve(&reply, Ok(self.state.snapshot())),
            Request::Disconnect(reply) => {
                self.go_disconnected().await;
                resolve(&reply, Ok(()));
            }
            // keeps arrival order behind requests that are already waiting
            request if !self.pending.is_empty() || self.throttled(&request) => {
                self.pending.push_back(request)
            }
            request => {
                let packet = self.outgoing(request);
                self.write(packet.into_iter().collect()).await?;
            }
        }

        Ok(())
    }

    /// A QoS 1 publish has to wait for a free inflight slot
    fn throttled(&self, request: &Request) -> bool {
        matches!(request, Request::Publish { publish, .. } if publish.qos == QoS::AtLeastOnce)
            && self.state.inflight_full()
    }

    /// Adds a publish or subscribe to the session
    fn outgoing(&mut self, request: Request) -> Option<Packet> {
        match request {
            Request::Publish { publish, reply } => {
                self.state.outgoing_publish(publish, reply, Instant::now())
            }
            Request::Subscribe {
                filter,
                handler,
                reply,
            } => self.state.outgoing_subscribe(filter, handler, reply),
            request => {
                log::error!("Unexpected queued request = {request:?}");
                None
            }
        }
    }

    /// Writes packets and flushes them, bounded by the connection timeout
    async fn write(&mut self, packets: Vec<Packet>) -> Result<(), ConnectionError> {
        if packets.is_empty() {
            return Ok(());
        }

        let Some(network) = self.network.as_mut() else {
            return Err(StateError::ConnectionAborted.into());
        };
        for packet in packets {
            log::trace!("Outgoing = {packet:?}");
            network.write(packet).await?;
        }
        self.keepalive.sent(Instant::now());
        time::timeout(self.options.connection_timeout(), network.flush()).await??;

        Ok(())
    }

    /// Drops the broken connection, keeping the session for the reconnect
    fn interrupt(&mut self, error: ConnectionError) {
        log::error!("Connection interrupted: {error}");
        self.network = None;
        self.state.connection = ConnectionState::Interrupted;
        self.emit(Event::ConnectionInterrupted(Arc::new(error)));
    }

    /// Re-establishes an interrupted connection with exponential backoff.
    /// Requests made in the meantime are queued until the connection resumes.
    async fn reconnect(&mut self) -> ControlFlow<()> {
        let mut attempt = 0;
        loop {
            self.dispatch_events();

            let backoff = time::sleep(self.options.reconnect.delay(attempt));
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    _ = &mut backoff => break,
                    request = self.requests_rx.recv_async() => match request {
                        Ok(Request::Disconnect(reply)) => {
                            self.go_disconnected().await;
                            resolve(&reply, Ok(()));
                            return ControlFlow::Continue(());
                        }
                        Ok(request) => self.queue(request),
                        Err(_) => {
                            self.go_disconnected().await;
                            return ControlFlow::Break(());
                        }
                    },
                }
            }

            attempt += 1;
            log::info!("Reconnecting, attempt = {attempt}");
            self.state.connection = ConnectionState::Reconnecting;
            match self.establish().await {
                Ok(connack) => {
                    let result = ConnectResult {
                        return_code: connack.code,
                        session_present: connack.session_present,
                    };
                    self.emit(Event::ConnectionSuccess(result));
                    self.emit(Event::ConnectionResumed(result));

                    let packets = self.state.resume(connack.session_present, Instant::now());
                    if let Err(e) = self.write(packets).await {
                        self.interrupt(e);
                    }
                    return ControlFlow::Continue(());
                }
                Err(e) => {
                    log::error!("Reconnect failed: {e}");
                    let permanent = e.is_permanent();
                    self.emit(Event::ConnectionFailure(Arc::new(e)));

                    let exhausted = self
                        .options
                        .reconnect
                        .max_attempts
                        .is_some_and(|max| attempt >= max);
                    if permanent || exhausted {
                        self.go_disconnected().await;
                        return ControlFlow::Continue(());
                    }
                    self.state.connection = ConnectionState::Interrupted;
                }
            }
        }
    }

    /// Holds a request made while the connection is down
    fn queue(&mut self, request: Request) {
        match request {
            Request::Connect(reply) => resolve(&reply, Err(ClientError::AlreadyConnected)),
            Request::Snapshot(reply) => resolve(&reply, Ok(self.state.snapshot())),
            // QoS 0 completes once queued, the notice is not resolved a second time
            Request::Publish { publish, reply } if publish.qos == QoS::AtMostOnce => {
                let checked = self.state.check_size(&Packet::Publish(publish.clone()));
                if let Err(e) = checked {
                    resolve(&reply, Err(e));
                    return;
                }
                resolve(&reply, Ok(PublishResult { pkid: 0 }));
                let (reply, _) = Notice::new();
                self.pending.push_back(Request::Publish { publish, reply });
            }
            request => self.pending.push_back(request),
        }
    }

    /// Closes the connection for good, failing everything outstanding
    async fn go_disconnected(&mut self) {
        if let Some(mut network) = self.network.take() {
            let sent = time::timeout(self.options.connection_timeout(), async {
                network.write(Packet::Disconnect(Disconnect)).await?;
                network.close().await
            })
            .await;

            match sent {
                Ok(Ok(())) => log::debug!("Disconnect sent"),
                Ok(Err(e)) => log::warn!("Failed to send disconnect: {e}"),
                Err(_) => log::warn!("Timed out sending disconnect"),
            }
        }

        self.state.fail_all();
        for request in self.pending.drain(..) {
            reject(request, ClientError::ConnectionClosed);
        }

        self.state.connection = ConnectionState::Disconnected;
        self.emit(Event::ConnectionClosed);
        log::info!("Disconnected");
    }
}

/// Fails a request that cannot be served
fn reject(request: Request, error: ClientError) {
    match request {
        Request::Connect(reply) => resolve(&reply, Err(error)),
        Request::Publish { reply, .. } => resolve(&reply, Err(error)),
        Request::Subscribe { reply, .. } => resolve(&reply, Err(error)),
        Request::Snapshot(reply) => resolve(&reply, Err(error)),
        Request::Disconnect(reply) => resolve(&reply, Ok(())),
    }
}

/// Opens the transport, sends CONNECT and waits for the CONNACK
async fn connect(options: &MqttOptions) -> Result<(Network, ConnAck), ConnectionError> {
    let mut network = transport::connect(options).await?;

    let connect = options.connect_packet();
    log::debug!(
        "Connect. Client id = {}, clean session = {}",
        connect.client_id,
        connect.clean_session
    );
    network.write(Packet::Connect(connect)).await?;
    network.flush().await?;

    match network.read().await? {
        Packet::ConnAck(connack) if connack.code == ConnectReturnCode::Success => {
            Ok((network, connack))
        }
        Packet::ConnAck(connack) => Err(ConnectionError::ConnectionRefused(connack.code)),
        packet => Err(ConnectionError::NotConnAck(Box::new(packet))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_definitive_refusals_are_permanent() {
        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert!(refused.is_permanent());

        let unavailable = ConnectionError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable);
        assert!(!unavailable.is_permanent());

        assert!(!ConnectionError::MqttState(StateError::KeepAliveTimeout).is_permanent());
    }
}
