//! When the primary broker dies right after a consumer subscribes, failover
//! must reconnect to the backup and replay the consumer registration
//! transparently, so a message sent after the switch still arrives.

mod common;

use openwire_client_core::config::{connect, ConnectionOptions};
use openwire_client_core::model::Destination;
use openwire_client_core::transport::failover::FailoverOptions;
use openwire_client_core::AckMode;
use std::time::Duration;

#[tokio::test]
async fn consumer_survives_failover_to_backup_broker() {
    let dying = common::spawn_broker_dying_after_subscribe().await;
    let backup = common::spawn_fake_broker().await;

    let uri = format!("failover:(tcp://{},tcp://{})", dying.addr, backup.addr);
    let mut options = ConnectionOptions::default();
    options.failover = FailoverOptions {
        randomize: false,
        initial_reconnect_delay: Duration::from_millis(5),
        max_reconnect_delay: Duration::from_millis(20),
        ..FailoverOptions::default()
    };

    let connection = connect(&uri, options).await.expect("connect");
    connection.start().await.expect("start");
    let session = connection.create_session(AckMode::Auto).await.expect("create session");

    let destination = Destination::parse("Q.Failover");
    let consumer = session.create_consumer(destination.clone(), 1000, false, None, false, 4).await.expect("create consumer");

    // The dying broker drops its socket right after acking the ConsumerInfo
    // above; give the failover transport time to notice and reconnect to
    // the backup, replaying connection/session/consumer registration.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // A second, direct connection stands in for "another client publishing
    // to the backup broker" and proves the consumer really was resubscribed
    // there, not just locally marked as connected.
    let direct = connect(&format!("tcp://{}", backup.addr), ConnectionOptions::default()).await.expect("direct connect");
    direct.start().await.expect("direct start");
    let direct_session = direct.create_session(AckMode::Auto).await.expect("direct session");
    let producer = direct_session.create_producer(Some(destination), None).await.expect("direct producer");
    producer.send(openwire_client_core::model::Message::text("post-failover")).await.expect("send after failover");

    let received = consumer.receive_timed(Duration::from_millis(3000)).await.expect("message should arrive after failover");
    assert_eq!(received.text_body(), Some("post-failover"));

    direct.close().await.expect("close direct");
    connection.close().await.expect("close");
}
