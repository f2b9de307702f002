//! A windowed producer sending more in-flight data than its window allows
//! must still deliver every message once acks drain the window; blocking
//! only throttles throughput, it never drops sends.

mod common;

use openwire_client_core::config::{connect, ConnectionOptions};
use openwire_client_core::model::Destination;
use openwire_client_core::model::Message;
use openwire_client_core::AckMode;
use std::time::Duration;

#[tokio::test]
async fn windowed_producer_delivers_every_send_under_backpressure() {
    let broker = common::spawn_fake_broker().await;
    let uri = format!("tcp://{}", broker.addr);

    let connection = connect(&uri, ConnectionOptions::default()).await.expect("connect");
    connection.start().await.expect("start");
    let session = connection.create_session(AckMode::Auto).await.expect("create session");

    let destination = Destination::parse("Q.FlowControl");
    // 65536-byte window, ~4KB payloads: only ~16 fit in flight at once, so
    // later sends in the loop below must block on earlier acks draining
    // the window rather than racing ahead unbounded.
    let producer = session.create_producer(Some(destination.clone()), Some(65536)).await.expect("create producer");
    let consumer = session.create_consumer(destination, 1000, false, None, false, 4).await.expect("create consumer");

    let payload = "x".repeat(4096);
    for i in 0..50 {
        let message = Message::text(format!("{payload}-{i}"));
        producer.send(message).await.expect("send under window");
    }

    let mut received = 0;
    while received < 50 {
        let message = consumer
            .receive_timed(Duration::from_millis(5000))
            .await
            .unwrap_or_else(|| panic!("expected message {received} of 50 to arrive"));
        assert!(message.text_body().unwrap().starts_with('x'));
        received += 1;
    }

    connection.close().await.expect("close");
}
