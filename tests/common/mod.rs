//! A minimal in-process broker, just capable enough to drive the client
//! through the end-to-end scenarios: wireformat handshake, connection/
//! session/producer/consumer registration, plain queueing with immediate
//! dispatch to an already-subscribed consumer, and local-transaction
//! buffering (commit flushes to the queue, rollback discards).
//!
//! Not a faithful broker: no topics-vs-queues fan-out, no selectors, no
//! prefetch limits. Enough of OpenWire's command flow to exercise the
//! client honestly without reimplementing a broker.

use openwire_client_core::model::{
    Command, ConsumerId, Destination, Envelope, Message, Response, TransactionId, WireformatInfo,
};
use openwire_client_core::transport::{AnyStream, IoTransport};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

pub struct FakeBroker {
    pub addr: SocketAddr,
}

/// Bind a loopback listener and run one broker session per accepted
/// connection, forever, until the test process exits.
pub async fn spawn_fake_broker() -> FakeBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake broker");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(run_session(stream));
                }
                Err(_) => return,
            }
        }
    });
    FakeBroker { addr }
}

/// Like [`spawn_fake_broker`], but the accepted connection is dropped after
/// `drop_after_messages` `Message` sends have been acked, simulating a
/// broker crash mid-session for failover tests.
pub async fn spawn_flaky_broker(drop_after_messages: usize) -> FakeBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind flaky broker");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            run_session_with_limit(stream, Some(drop_after_messages)).await;
        }
    });
    FakeBroker { addr }
}

async fn run_session(stream: TcpStream) {
    run_session_with_limit(stream, None).await;
}

/// A broker that accepts exactly one connection, serves it long enough to
/// ack a `ConsumerInfo` registration, then drops the socket, simulating a
/// broker crash right after a consumer subscribes.
pub async fn spawn_broker_dying_after_subscribe() -> FakeBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind dying broker");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            run_session_until_subscribed(stream).await;
        }
    });
    FakeBroker { addr }
}

async fn run_session_until_subscribed(stream: TcpStream) {
    let mut transport = IoTransport::spawn(AnyStream::Plain(stream));
    loop {
        let envelope = match transport.recv().await {
            Some(envelope) => envelope,
            None => return,
        };
        match envelope.command {
            Command::WireformatInfo(_) => {
                let info = WireformatInfo {
                    version: 1,
                    tight_encoding_enabled: false,
                    cache_enabled: false,
                    cache_size: 0,
                    max_inactivity_duration_ms: 30_000,
                    max_inactivity_duration_initial_delay_ms: 10_000,
                    stack_trace_enabled: false,
                    message_compression_enabled: false,
                };
                let _ = transport.send(&Envelope { command_id: 0, command: Command::WireformatInfo(info) }).await;
            }
            Command::ConsumerInfo(_) => {
                let _ = transport.send(&ack(envelope.command_id)).await;
                return;
            }
            other if other.expects_response() => {
                let _ = transport.send(&ack(envelope.command_id)).await;
            }
            _ => {}
        }
    }
}

fn ack(correlation_id: u32) -> Envelope {
    Envelope { command_id: 0, command: Command::Response(Response { correlation_id }) }
}

async fn run_session_with_limit(stream: TcpStream, drop_after_messages: Option<usize>) {
    let mut transport = IoTransport::spawn(AnyStream::Plain(stream));
    let mut consumers: Vec<(ConsumerId, String)> = Vec::new();
    let mut queues: HashMap<String, Vec<Message>> = HashMap::new();
    let mut pending_tx: HashMap<TransactionId, Vec<Message>> = HashMap::new();
    let mut messages_seen = 0usize;

    loop {
        let envelope = match transport.recv().await {
            Some(envelope) => envelope,
            None => return,
        };

        match envelope.command {
            Command::WireformatInfo(_) => {
                let info = WireformatInfo {
                    version: 1,
                    tight_encoding_enabled: false,
                    cache_enabled: false,
                    cache_size: 0,
                    max_inactivity_duration_ms: 30_000,
                    max_inactivity_duration_initial_delay_ms: 10_000,
                    stack_trace_enabled: false,
                    message_compression_enabled: false,
                };
                let _ = transport.send(&Envelope { command_id: 0, command: Command::WireformatInfo(info) }).await;
            }
            Command::ConsumerInfo(info) => {
                let key = destination_key(&info.destination);
                let _ = transport.send(&ack(envelope.command_id)).await;
                let backlog = queues.entry(key.clone()).or_default();
                backlog.sort_by_key(|m| std::cmp::Reverse(m.priority));
                for message in backlog.drain(..) {
                    let dispatch = openwire_client_core::model::MessageDispatch {
                        consumer_id: info.consumer_id.clone(),
                        message,
                        redelivery_count_hint: 0,
                    };
                    let _ = transport.send(&Envelope { command_id: 0, command: Command::MessageDispatch(dispatch) }).await;
                }
                consumers.push((info.consumer_id, key));
            }
            Command::Message(message) => {
                let _ = transport.send(&ack(envelope.command_id)).await;
                messages_seen += 1;

                if let Some(transaction_id) = message.transaction_id.clone() {
                    pending_tx.entry(transaction_id).or_default().push(message);
                } else {
                    deliver_or_queue(&mut transport, &consumers, &mut queues, message).await;
                }

                if let Some(limit) = drop_after_messages {
                    if messages_seen >= limit {
                        return;
                    }
                }
            }
            Command::TransactionInfo(info) => {
                use openwire_client_core::model::TransactionOperation;
                let _ = transport.send(&ack(envelope.command_id)).await;
                match info.operation {
                    TransactionOperation::Rollback => {
                        pending_tx.remove(&info.transaction_id);
                    }
                    TransactionOperation::CommitOnePhase | TransactionOperation::CommitTwoPhase => {
                        if let Some(messages) = pending_tx.remove(&info.transaction_id) {
                            for message in messages {
                                deliver_or_queue(&mut transport, &consumers, &mut queues, message).await;
                            }
                        }
                    }
                    _ => {}
                }
            }
            other if other.expects_response() => {
                let _ = transport.send(&ack(envelope.command_id)).await;
            }
            _ => {}
        }
    }
}

async fn deliver_or_queue(
    transport: &mut IoTransport<AnyStream>,
    consumers: &[(ConsumerId, String)],
    queues: &mut HashMap<String, Vec<Message>>,
    message: Message,
) {
    let key = message.destination.as_ref().map(destination_key).unwrap_or_default();
    match consumers.iter().find(|(_, k)| *k == key) {
        Some((consumer_id, _)) => {
            let dispatch = openwire_client_core::model::MessageDispatch {
                consumer_id: consumer_id.clone(),
                message,
                redelivery_count_hint: 0,
            };
            let _ = transport.send(&Envelope { command_id: 0, command: Command::MessageDispatch(dispatch) }).await;
        }
        None => {
            queues.entry(key).or_default().push(message);
        }
    }
}

fn destination_key(destination: &Destination) -> String {
    destination.to_string()
}
