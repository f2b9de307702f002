//! Scheduled-delivery properties are broker-interpreted hints; the client
//! only carries them on the wire, verbatim, and never delays or reorders
//! delivery based on them itself.

mod common;

use openwire_client_core::config::{connect, ConnectionOptions};
use openwire_client_core::model::message::{AMQ_SCHEDULED_DELAY, AMQ_SCHEDULED_PERIOD, AMQ_SCHEDULED_REPEAT};
use openwire_client_core::model::{Destination, Message, PropertyValue};
use openwire_client_core::AckMode;
use std::time::Duration;

#[tokio::test]
async fn scheduled_delivery_properties_round_trip_unmodified() {
    let broker = common::spawn_fake_broker().await;
    let uri = format!("tcp://{}", broker.addr);

    let connection = connect(&uri, ConnectionOptions::default()).await.expect("connect");
    connection.start().await.expect("start");
    let session = connection.create_session(AckMode::Auto).await.expect("create session");

    let destination = Destination::parse("Q.Scheduled");
    let producer = session.create_producer(Some(destination.clone()), None).await.expect("create producer");
    let consumer = session.create_consumer(destination, 1000, false, None, false, 4).await.expect("create consumer");

    let mut message = Message::text("later");
    message.set_property(AMQ_SCHEDULED_DELAY, PropertyValue::Long(60_000)).expect("set delay");
    message.set_property(AMQ_SCHEDULED_PERIOD, PropertyValue::Long(1_000)).expect("set period");
    message.set_property(AMQ_SCHEDULED_REPEAT, PropertyValue::Int(3)).expect("set repeat");

    // The client never interprets these, so an immediate-dispatch fake
    // broker sees no reason to withhold the message; delivery here proves
    // the client passed the hints through untouched rather than acting on
    // them locally.
    producer.send(message).await.expect("send");

    let received = consumer.receive_timed(Duration::from_millis(1000)).await.expect("message should arrive");
    assert_eq!(received.text_body(), Some("later"));
    assert_eq!(received.property(AMQ_SCHEDULED_DELAY), Some(&PropertyValue::Long(60_000)));
    assert_eq!(received.property(AMQ_SCHEDULED_PERIOD), Some(&PropertyValue::Long(1_000)));
    assert_eq!(received.property(AMQ_SCHEDULED_REPEAT), Some(&PropertyValue::Int(3)));

    connection.close().await.expect("close");
}
