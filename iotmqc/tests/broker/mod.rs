//! In-process broker for integration tests.
//!
//! The broker does nothing on its own: every test scripts the packets it
//! expects from the client and the packets it answers with.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use iotmq_bytes::{
    Codec, ConnAck, Connect, ConnectReturnCode, Packet, PubAck, Publish, QoS, SubAck, Subscribe,
    SubscribeReasonCode,
};
use iotmqc::{Callbacks, Event, OptionBuilder};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tokio_util::codec::Framed;

/// Bound on every wait in the tests
pub const WAIT: Duration = Duration::from_secs(5);

pub struct Broker {
    listener: TcpListener,
    pub port: u16,
}

impl Broker {
    pub async fn new() -> Broker {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Broker { listener, port }
    }

    /// Options with short timeouts pointing at this broker, keep-alive off
    pub fn options(&self, client_id: &str) -> OptionBuilder {
        OptionBuilder::new_tcp("127.0.0.1", self.port)
            .client_id(client_id)
            .keep_alive(Duration::ZERO)
            .connection_timeout(Duration::from_secs(1))
            .reconnect_delay(Duration::from_millis(10), Duration::from_millis(50))
    }

    pub async fn accept(&self) -> Conn {
        let (stream, _) = time::timeout(WAIT, self.listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();
        Conn {
            framed: Framed::new(stream, Codec::new(10 * 1024, 10 * 1024)),
        }
    }

    /// Accepts a connection and completes the handshake
    pub async fn accept_session(&self, session_present: bool) -> (Conn, Connect) {
        let mut conn = self.accept().await;
        let connect = conn.handshake(session_present).await;
        (conn, connect)
    }
}

/// Broker side of one client connection
pub struct Conn {
    framed: Framed<TcpStream, Codec>,
}

impl Conn {
    pub async fn read(&mut self) -> Packet {
        match time::timeout(WAIT, self.framed.next()).await {
            Ok(Some(Ok(packet))) => packet,
            Ok(Some(Err(e))) => panic!("invalid packet from client: {e}"),
            Ok(None) => panic!("client closed the connection"),
            Err(_) => panic!("no packet from client within {WAIT:?}"),
        }
    }

    /// Asserts the client sends nothing for `duration`
    pub async fn expect_silence(&mut self, duration: Duration) {
        if let Ok(packet) = time::timeout(duration, self.framed.next()).await {
            panic!("expected silence, got {packet:?}");
        }
    }

    /// Waits until the client closes the connection, returning what it sent before
    pub async fn closed(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        loop {
            match time::timeout(WAIT, self.framed.next()).await {
                Ok(Some(Ok(packet))) => packets.push(packet),
                Ok(Some(Err(_))) | Ok(None) => return packets,
                Err(_) => panic!("client kept the connection open"),
            }
        }
    }

    pub async fn write(&mut self, packet: Packet) {
        self.framed.send(packet).await.unwrap();
    }

    pub async fn handshake(&mut self, session_present: bool) -> Connect {
        let Packet::Connect(connect) = self.read().await else {
            panic!("expected connect");
        };
        self.write(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            session_present,
        )))
        .await;
        connect
    }

    pub async fn refuse(&mut self, code: ConnectReturnCode) {
        let packet = self.read().await;
        assert!(matches!(packet, Packet::Connect(_)), "expected connect, got {packet:?}");
        self.write(Packet::ConnAck(ConnAck::new(code, false))).await;
    }

    pub async fn read_publish(&mut self) -> Publish {
        match self.read().await {
            Packet::Publish(publish) => publish,
            packet => panic!("expected publish, got {packet:?}"),
        }
    }

    pub async fn read_subscribe(&mut self) -> Subscribe {
        match self.read().await {
            Packet::Subscribe(subscribe) => subscribe,
            packet => panic!("expected subscribe, got {packet:?}"),
        }
    }

    /// Reads a SUBSCRIBE and grants the requested QoS
    pub async fn grant_subscribe(&mut self) -> Subscribe {
        let subscribe = self.read_subscribe().await;
        let qos = subscribe.filters[0].qos;
        self.suback(subscribe.pkid, SubscribeReasonCode::Success(qos))
            .await;
        subscribe
    }

    pub async fn suback(&mut self, pkid: u16, code: SubscribeReasonCode) {
        self.write(Packet::SubAck(SubAck::new(pkid, vec![code])))
            .await;
    }

    pub async fn puback(&mut self, pkid: u16) {
        self.write(Packet::PubAck(PubAck::new(pkid))).await;
    }

    /// Delivers an application message to the client
    pub async fn deliver(&mut self, topic: &str, payload: &[u8], pkid: u16) {
        let mut publish = Publish::new(topic, QoS::AtLeastOnce, payload.to_vec());
        publish.pkid = pkid;
        self.write(Packet::Publish(publish)).await;
    }
}

/// Callbacks forwarding every event to the returned receiver
pub fn recording_callbacks() -> (Callbacks, flume::Receiver<Event>) {
    let (tx, rx) = flume::unbounded();

    let success = tx.clone();
    let failure = tx.clone();
    let interrupted = tx.clone();
    let resumed = tx.clone();
    let closed = tx.clone();
    let resubscribed = tx.clone();
    let message = tx;

    let callbacks = Callbacks::new()
        .on_connection_success(move |r| success.send(Event::ConnectionSuccess(r)).unwrap())
        .on_connection_failure(move |e| failure.send(Event::ConnectionFailure(e)).unwrap())
        .on_connection_interrupted(move |e| {
            interrupted.send(Event::ConnectionInterrupted(e)).unwrap()
        })
        .on_connection_resumed(move |r| resumed.send(Event::ConnectionResumed(r)).unwrap())
        .on_connection_closed(move || closed.send(Event::ConnectionClosed).unwrap())
        .on_resubscribe_complete(move |r| {
            resubscribed.send(Event::ResubscribeComplete(r)).unwrap()
        })
        .on_message(move |m| message.send(Event::MessageReceived(m)).unwrap());

    (callbacks, rx)
}

pub async fn next_event(events: &flume::Receiver<Event>) -> Event {
    time::timeout(WAIT, events.recv_async())
        .await
        .expect("no event within timeout")
        .unwrap()
}

/// Skips events until one matches `pred`
pub async fn wait_for(events: &flume::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

pub fn init_logger() {
    let _ = pretty_env_logger::try_init();
}
