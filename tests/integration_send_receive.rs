//! End-to-end auto-ack send/receive against an in-process fake broker.

mod common;

use openwire_client_core::config::{connect, ConnectionOptions};
use openwire_client_core::model::{DeliveryMode, Destination, Message};
use openwire_client_core::AckMode;
use std::time::Duration;

#[tokio::test]
async fn send_then_receive_round_trips_text_and_defaults() {
    let broker = common::spawn_fake_broker().await;
    let uri = format!("tcp://{}", broker.addr);

    let connection = connect(&uri, ConnectionOptions::default()).await.expect("connect");
    connection.start().await.expect("start");
    let session = connection.create_session(AckMode::Auto).await.expect("create session");

    let destination = Destination::parse("Q.T1");
    let producer = session.create_producer(Some(destination.clone()), None).await.expect("create producer");
    let consumer = session.create_consumer(destination, 1000, false, None, false, 4).await.expect("create consumer");

    let mut message = Message::text("hello");
    message.delivery_mode = DeliveryMode::NonPersistent;
    producer.send(message).await.expect("send");

    let received = consumer.receive_timed(Duration::from_millis(2000)).await.expect("message should arrive");
    assert_eq!(received.text_body(), Some("hello"));
    assert_eq!(received.priority, 4);
    assert_eq!(received.redelivery_counter, 0);

    connection.close().await.expect("close");
}

#[tokio::test]
async fn receive_times_out_when_nothing_was_sent() {
    let broker = common::spawn_fake_broker().await;
    let uri = format!("tcp://{}", broker.addr);

    let connection = connect(&uri, ConnectionOptions::default()).await.expect("connect");
    connection.start().await.expect("start");
    let session = connection.create_session(AckMode::Auto).await.expect("create session");
    let consumer = session.create_consumer(Destination::parse("Q.Empty"), 1000, false, None, false, 4).await.expect("create consumer");

    let received = consumer.receive_timed(Duration::from_millis(200)).await;
    assert!(received.is_none());

    connection.close().await.expect("close");
}
