mod broker;

use std::time::Duration;

use broker::{init_logger, next_event, recording_callbacks, wait_for, Broker, WAIT};
use bytes::Bytes;
use iotmq_bytes::{Packet, PubAck, QoS, SubscribeReasonCode};
use iotmqc::{Client, ClientError, ConnectReturnCode, ConnectionState, Event, Message};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn published_messages_arrive_once_and_in_order() {
    init_logger();
    let broker = Broker::new().await;
    let (callbacks, events) = recording_callbacks();
    let client = Client::new(broker.options("pubsub-1").finalize(), callbacks).unwrap();

    let connected = client.connect();
    let (mut conn, connect) = broker.accept_session(false).await;
    assert_eq!(connect.client_id, "pubsub-1");
    let result = connected.await.unwrap();
    assert_eq!(result.return_code, ConnectReturnCode::Success);
    assert!(!result.session_present);

    let (tx, received) = flume::unbounded();
    let subscribed = client.subscribe("test/topic", QoS::AtLeastOnce, move |m: Message| {
        tx.send(m).unwrap()
    });
    let subscribe = conn.grant_subscribe().await;
    assert_eq!(subscribe.filters[0].path, "test/topic");
    assert_eq!(subscribed.await.unwrap().granted, Some(QoS::AtLeastOnce));

    for n in 1..=3u16 {
        let payload = format!("\"Hello World [{n}]\"");
        let published = client.publish("test/topic", payload.clone(), QoS::AtLeastOnce, false);

        let publish = conn.read_publish().await;
        assert_eq!(publish.payload, Bytes::from(payload.clone()));
        assert!(!publish.dup);
        conn.puback(publish.pkid).await;
        assert_eq!(published.await.unwrap().pkid, publish.pkid);

        // echo the message back, as a broker does for a subscribed topic
        conn.deliver("test/topic", payload.as_bytes(), 100 + n).await;
        assert_eq!(conn.read().await, Packet::PubAck(PubAck::new(100 + n)));
    }

    let mut payloads = Vec::new();
    for _ in 0..3 {
        let message = tokio::time::timeout(WAIT, received.recv_async())
            .await
            .unwrap()
            .unwrap();
        payloads.push(message.payload);
    }
    assert_eq!(
        payloads,
        vec![
            Bytes::from_static(b"\"Hello World [1]\""),
            Bytes::from_static(b"\"Hello World [2]\""),
            Bytes::from_static(b"\"Hello World [3]\""),
        ]
    );
    assert!(received.is_empty());

    client.disconnect().await.unwrap();
    let sent = conn.closed().await;
    assert!(matches!(sent[..], [Packet::Disconnect(_)]));

    // the subscription handler took every message, the global handler none
    let rest: Vec<Event> = events.drain().collect();
    assert!(!rest.iter().any(|e| matches!(e, Event::MessageReceived(_))));
}

#[tokio::test]
async fn unmatched_messages_go_to_connection_handler() {
    init_logger();
    let broker = Broker::new().await;
    let (callbacks, events) = recording_callbacks();
    let client = Client::new(broker.options("pubsub-2").finalize(), callbacks).unwrap();

    let connected = client.connect();
    let (mut conn, _) = broker.accept_session(false).await;
    connected.await.unwrap();

    conn.deliver("sdk/test/Python", b"retained", 1).await;
    assert_eq!(conn.read().await, Packet::PubAck(PubAck::new(1)));

    let event = wait_for(&events, |e| matches!(e, Event::MessageReceived(_))).await;
    let Event::MessageReceived(message) = event else {
        unreachable!()
    };
    assert_eq!(message.topic, "sdk/test/Python");
    assert_eq!(message.qos, QoS::AtLeastOnce);
}

#[tokio::test]
async fn subscriptions_are_replayed_in_order_after_session_loss() {
    init_logger();
    let broker = Broker::new().await;
    let (callbacks, events) = recording_callbacks();
    let client = Client::new(broker.options("pubsub-3").finalize(), callbacks).unwrap();

    let connected = client.connect();
    let (mut conn, _) = broker.accept_session(false).await;
    connected.await.unwrap();

    let mut original = Vec::new();
    for filter in ["sensors/a", "sensors/+/b", "sensors/#"] {
        let subscribed = client.subscribe(filter, QoS::AtLeastOnce, |_| {});
        original.push(conn.grant_subscribe().await.pkid);
        subscribed.await.unwrap();
    }

    drop(conn);
    wait_for(&events, |e| matches!(e, Event::ConnectionInterrupted(_))).await;

    let (mut conn, _) = broker.accept_session(false).await;
    let mut replayed = Vec::new();
    for _ in 0..3 {
        replayed.push(conn.read_subscribe().await);
    }
    let filters: Vec<&str> = replayed
        .iter()
        .map(|s| s.filters[0].path.as_str())
        .collect();
    assert_eq!(filters, vec!["sensors/a", "sensors/+/b", "sensors/#"]);
    for subscribe in &replayed {
        assert!(!original.contains(&subscribe.pkid));
    }

    conn.suback(replayed[0].pkid, SubscribeReasonCode::Success(QoS::AtLeastOnce))
        .await;
    conn.suback(replayed[1].pkid, SubscribeReasonCode::Failure)
        .await;
    conn.suback(replayed[2].pkid, SubscribeReasonCode::Success(QoS::AtMostOnce))
        .await;

    let event = wait_for(&events, |e| matches!(e, Event::ResubscribeComplete(_))).await;
    let Event::ResubscribeComplete(Err(error)) = event else {
        panic!("expected rejected resubscribe, got {event:?}");
    };
    assert_eq!(error.rejected, vec!["sensors/+/b".to_owned()]);

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    let active: Vec<(String, Option<QoS>)> = snapshot
        .subscriptions
        .into_iter()
        .map(|s| (s.filter, s.granted))
        .collect();
    assert_eq!(
        active,
        vec![
            ("sensors/a".to_owned(), Some(QoS::AtLeastOnce)),
            ("sensors/#".to_owned(), Some(QoS::AtMostOnce)),
        ]
    );
}

#[tokio::test]
async fn resumed_session_is_not_replayed() {
    init_logger();
    let broker = Broker::new().await;
    let (callbacks, events) = recording_callbacks();
    let options = broker.options("pubsub-4").clean_session(false).finalize();
    let client = Client::new(options, callbacks).unwrap();

    let connected = client.connect();
    let (mut conn, connect) = broker.accept_session(false).await;
    assert!(!connect.clean_session);
    connected.await.unwrap();

    let subscribed = client.subscribe("test/topic", QoS::AtLeastOnce, |_| {});
    conn.grant_subscribe().await;
    subscribed.await.unwrap();

    drop(conn);
    let (mut conn, _) = broker.accept_session(true).await;
    let event = wait_for(&events, |e| matches!(e, Event::ConnectionResumed(_))).await;
    assert!(matches!(event, Event::ConnectionResumed(r) if r.session_present));

    conn.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn snapshot_reports_inflight_publishes() {
    init_logger();
    let broker = Broker::new().await;
    let (callbacks, _events) = recording_callbacks();
    let client = Client::new(broker.options("pubsub-5").finalize(), callbacks).unwrap();

    let connected = client.connect();
    let (mut conn, _) = broker.accept_session(false).await;
    connected.await.unwrap();

    let published = client.publish("test/topic", "a", QoS::AtLeastOnce, false);
    let publish = conn.read_publish().await;

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.inflight, vec![publish.pkid]);

    conn.puback(publish.pkid).await;
    published.await.unwrap();
    assert!(client.snapshot().await.unwrap().inflight.is_empty());
}

#[tokio::test]
async fn requests_fail_while_disconnected() {
    init_logger();
    let broker = Broker::new().await;
    let (callbacks, events) = recording_callbacks();
    let client = Client::new(broker.options("pubsub-6").finalize(), callbacks).unwrap();

    let err = client
        .publish("test/topic", "a", QoS::AtLeastOnce, false)
        .await;
    assert!(matches!(err, Err(ClientError::NotConnected)));
    let err = client.subscribe("test/topic", QoS::AtLeastOnce, |_| {}).await;
    assert!(matches!(err, Err(ClientError::NotConnected)));
    client.disconnect().await.unwrap();

    // a refused connect fails once and is not retried
    let connected = client.connect();
    let mut conn = broker.accept().await;
    conn.refuse(ConnectReturnCode::BadUserNamePassword).await;
    let err = connected.await.unwrap_err();
    let ClientError::Connect(error) = err else {
        panic!("expected connect error, got {err:?}");
    };
    assert!(error.is_permanent());
    assert!(matches!(
        next_event(&events).await,
        Event::ConnectionFailure(_)
    ));

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn empty_filter_is_rejected_before_sending() {
    init_logger();
    let broker = Broker::new().await;
    let (callbacks, _events) = recording_callbacks();
    let client = Client::new(broker.options("pubsub-7").finalize(), callbacks).unwrap();

    let connected = client.connect();
    let (mut conn, _) = broker.accept_session(false).await;
    connected.await.unwrap();

    let err = client.subscribe("", QoS::AtLeastOnce, |_| {}).await;
    assert!(matches!(err, Err(ClientError::InvalidFilter(_))));
    conn.expect_silence(Duration::from_millis(200)).await;
}
