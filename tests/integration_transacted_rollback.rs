//! A rolled-back send must never reach a consumer; a committed one always
//! does, even one created on a fresh session after the commit.

mod common;

use openwire_client_core::config::{connect, ConnectionOptions};
use openwire_client_core::model::{Destination, Message};
use openwire_client_core::AckMode;
use std::time::Duration;

#[tokio::test]
async fn rolled_back_send_is_discarded_committed_send_survives() {
    let broker = common::spawn_fake_broker().await;
    let uri = format!("tcp://{}", broker.addr);

    let connection = connect(&uri, ConnectionOptions::default()).await.expect("connect");
    connection.start().await.expect("start");

    let destination = Destination::parse("Q.T2");
    let sending_session = connection.create_session(AckMode::Transacted).await.expect("create session");
    let producer = sending_session.create_producer(Some(destination.clone()), None).await.expect("create producer");

    sending_session.begin_transaction().await.expect("begin");
    producer.send(Message::text("m1")).await.expect("send m1");
    sending_session.rollback_transaction().await.expect("rollback");

    sending_session.begin_transaction().await.expect("begin again");
    producer.send(Message::text("m2")).await.expect("send m2");
    sending_session.commit_transaction().await.expect("commit");

    let consuming_session = connection.create_session(AckMode::Auto).await.expect("fresh session");
    let consumer = consuming_session.create_consumer(destination, 1000, false, None, false, 4).await.expect("create consumer");

    let first = consumer.receive_timed(Duration::from_millis(500)).await.expect("committed message should arrive");
    assert_eq!(first.text_body(), Some("m2"));

    let second = consumer.receive_timed(Duration::from_millis(500)).await;
    assert!(second.is_none(), "rolled-back m1 must never be delivered");

    connection.close().await.expect("close");
}
