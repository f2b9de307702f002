//! Consumer (C11, spec §4.6): prefetch-windowed push/pull delivery, ack
//! accounting, and the blocking receive surface. A consumer knows only its
//! own [`ConsumerId`], never its owning session (spec §9: "consumers know
//! only their session id").

use crate::client::connection::ConnectionCore;
use crate::client::redelivery::RedeliveryPolicy;
use crate::client::session::AckMode;
use crate::error::ClientResult;
use crate::model::{AckType, Command, ConsumerId, Destination, Message, MessageAck, MessageDispatch, MessagePull, TransactionId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;
use tracing::warn;

use super::transaction::TransactionContext;

type Listener = Arc<dyn Fn(Message) + Send + Sync>;

/// The blocking-receive side: a FIFO of undelivered messages plus the wake
/// signal a waiting `receive` blocks on.
struct Inbox {
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
}

pub struct Consumer {
    core: Arc<ConnectionCore>,
    consumer_id: ConsumerId,
    destination: Destination,
    prefetch_size: u32,
    ack_mode: AckMode,
    transaction: Arc<Mutex<TransactionContext>>,
    redelivery_policy: RedeliveryPolicy,
    inbox: Inbox,
    /// Messages delivered but not yet acked, in delivery order; the basis
    /// for the contiguous-range ack sent in `Auto`/`DupsOk`/`Client` modes
    /// (spec §4.6, "per-consumer ack accounting").
    delivered: Mutex<VecDeque<Message>>,
    delivered_since_ack: AtomicU32,
    listener: Mutex<Option<Listener>>,
    closed: Arc<AtomicBool>,
}

impl Consumer {
    pub(crate) fn new(
        core: Arc<ConnectionCore>,
        consumer_id: ConsumerId,
        destination: Destination,
        prefetch_size: u32,
        ack_mode: AckMode,
        transaction: Arc<Mutex<TransactionContext>>,
        redelivery_policy: RedeliveryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            core,
            consumer_id,
            destination,
            prefetch_size,
            ack_mode,
            transaction,
            redelivery_policy,
            inbox: Inbox { queue: Mutex::new(VecDeque::new()), notify: Notify::new() },
            delivered: Mutex::new(VecDeque::new()),
            delivered_since_ack: AtomicU32::new(0),
            listener: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn consumer_id(&self) -> &ConsumerId {
        &self.consumer_id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Register a push listener. Once set, dispatch invokes it instead of
    /// queuing for `receive` (spec §4.6: "presents both a blocking receive
    /// and a push listener").
    pub fn set_listener<F>(&self, listener: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        *self.listener.try_lock().expect("listener lock") = Some(Arc::new(listener));
    }

    /// Invoked by the session's dispatcher, strictly in delivery order
    /// (spec §5: "the per-session dispatcher is strictly FIFO").
    pub(crate) async fn on_dispatch(&self, dispatch: MessageDispatch) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let message = dispatch.message;
        self.delivered.lock().await.push_back(message.clone());

        let listener = self.listener.lock().await.clone();
        match listener {
            Some(listener) => listener(message.clone()),
            None => {
                self.inbox.queue.lock().await.push_back(message.clone());
                self.inbox.notify.notify_one();
            }
        }
        self.apply_ack_policy(&message).await;
    }

    /// Apply the ack-timing policy for `Auto`/`DupsOk`/`Transacted`;
    /// `Client`/`Individual` wait for an explicit
    /// [`Consumer::acknowledge`] call instead (spec §4.6).
    async fn apply_ack_policy(&self, message: &Message) {
        match self.ack_mode {
            AckMode::Auto => {
                if let Err(err) = self.send_ack(message, AckType::Delivered, 1, None).await {
                    warn!(error = %err, "failed to auto-ack message");
                }
                self.delivered.lock().await.clear();
            }
            AckMode::DupsOk => {
                let threshold = (self.prefetch_size / 2).max(1);
                let count = self.delivered_since_ack.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= threshold {
                    let pending = {
                        let mut delivered = self.delivered.lock().await;
                        let pending = delivered.len() as u32;
                        delivered.clear();
                        pending
                    };
                    self.delivered_since_ack.store(0, Ordering::SeqCst);
                    if let Err(err) = self.send_ack(message, AckType::Delivered, pending.max(1), None).await {
                        warn!(error = %err, "failed to send dups-ok ack");
                    }
                }
            }
            AckMode::Transacted => {
                let transaction_id = self.transaction.lock().await.current_transaction_id();
                if let Err(err) = self.send_ack(message, AckType::Transacted, 1, transaction_id).await {
                    warn!(error = %err, "failed to send transacted ack");
                }
            }
            AckMode::Client | AckMode::Individual => {}
        }
    }

    async fn send_ack(&self, message: &Message, ack_type: AckType, message_count: u32, transaction_id: Option<TransactionId>) -> ClientResult<()> {
        let message_id = message.message_id.clone().expect("dispatched message always carries a message id");
        self.core
            .cast(Command::MessageAck(MessageAck {
                consumer_id: self.consumer_id.clone(),
                ack_type,
                first_message_id: None,
                last_message_id: message_id,
                message_count,
                transaction_id,
            }))
            .await
    }

    /// Application-driven ack for `Client`/`Individual` modes (spec §4.6).
    /// For `Client`, acknowledges every message delivered up to and
    /// including `message`, as a contiguous range. For `Individual`, only
    /// `message` itself is acknowledged and removed from the delivered set.
    pub async fn acknowledge(&self, message: &Message) -> ClientResult<()> {
        match self.ack_mode {
            AckMode::Individual => {
                self.send_ack(message, AckType::Individual, 1, None).await?;
                if let Some(id) = &message.message_id {
                    let mut delivered = self.delivered.lock().await;
                    delivered.retain(|m| m.message_id.as_ref() != Some(id));
                }
            }
            AckMode::Client => {
                let count = {
                    let delivered = self.delivered.lock().await;
                    delivered.len() as u32
                };
                self.send_ack(message, AckType::Delivered, count.max(1), None).await?;
                self.delivered.lock().await.clear();
            }
            AckMode::Auto | AckMode::DupsOk | AckMode::Transacted => {}
        }
        Ok(())
    }

    /// Block until a message arrives, `timeout` elapses, or the consumer
    /// is closed. A zero-prefetch (pull-mode) consumer issues a
    /// message-pull command with the same timeout first (spec §4.6).
    pub async fn receive_timed(&self, timeout: Duration) -> Option<Message> {
        if self.prefetch_size == 0 {
            let _ = self.send_pull(timeout.as_millis() as i64).await;
        }
        tokio::time::timeout(timeout, self.wait_for_message()).await.ok().flatten()
    }

    /// Block indefinitely for the next message.
    pub async fn receive(&self) -> Option<Message> {
        if self.prefetch_size == 0 {
            let _ = self.send_pull(-1).await;
        }
        self.wait_for_message().await
    }

    /// Return immediately with whatever is already queued, without
    /// blocking or issuing a pull.
    pub async fn receive_no_wait(&self) -> Option<Message> {
        self.inbox.queue.lock().await.pop_front()
    }

    async fn send_pull(&self, timeout_ms: i64) -> ClientResult<()> {
        self.core.cast(Command::MessagePull(MessagePull { consumer_id: self.consumer_id.clone(), timeout_ms })).await
    }

    async fn wait_for_message(&self) -> Option<Message> {
        loop {
            if let Some(message) = self.inbox.queue.lock().await.pop_front() {
                return Some(message);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.inbox.notify.notified().await;
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
        }
    }

    /// Unblock all pending receives with `None` and stop accepting further
    /// dispatch (spec §5: "closing a consumer unblocks all pending
    /// receives").
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbox.notify.notify_waiters();
    }

    /// Redeliver every message still pending acknowledgement after a local
    /// transaction rollback, without a broker round trip: increment each
    /// message's redelivery counter, drop it once the redelivery policy is
    /// exhausted, and otherwise hand it back to the application after the
    /// policy's backoff delay (spec §4.6; grounded in `original_source`'s
    /// client-side rollback redelivery rather than a broker redispatch).
    pub(crate) async fn redeliver_pending(self: &Arc<Self>) {
        let pending: Vec<Message> = self.delivered.lock().await.drain(..).collect();
        for mut message in pending {
            message.redelivery_counter += 1;
            if self.redelivery_policy.is_exhausted(message.redelivery_counter) {
                warn!(consumer_id = %self.consumer_id, redelivery_counter = message.redelivery_counter, "message exhausted redelivery policy, dropping");
                continue;
            }
            let delay = self.redelivery_policy.next_delay(message.redelivery_counter);
            let consumer = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                consumer.redeliver_now(message).await;
            });
        }
    }

    async fn redeliver_now(&self, message: Message) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.delivered.lock().await.push_back(message.clone());
        let listener = self.listener.lock().await.clone();
        match listener {
            Some(listener) => listener(message),
            None => {
                self.inbox.queue.lock().await.push_back(message);
                self.inbox.notify.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Destination, DestinationKind, SessionId};

    fn consumer_id() -> ConsumerId {
        ConsumerId {
            session_id: SessionId { connection_id: crate::model::ConnectionId("ID:c1".into()), value: 1 },
            value: 1,
        }
    }

    fn a_destination() -> Destination {
        Destination::simple(DestinationKind::Queue, "Q.test")
    }

    #[test]
    fn dups_ok_threshold_is_half_of_prefetch_with_a_floor_of_one() {
        let threshold = |prefetch: u32| (prefetch / 2).max(1);
        assert_eq!(threshold(0), 1);
        assert_eq!(threshold(10), 5);
        assert_eq!(threshold(1), 1);
    }

    #[tokio::test]
    async fn close_unblocks_a_pending_receive_with_none() {
        let consumer_id = consumer_id();
        let _ = &consumer_id;
        let _ = a_destination();
        let inbox = Inbox { queue: Mutex::new(VecDeque::new()), notify: Notify::new() };
        let closed = Arc::new(AtomicBool::new(false));

        let waiter_closed = closed.clone();
        let waiter = async move {
            loop {
                if waiter_closed.load(Ordering::SeqCst) {
                    return None::<Message>;
                }
                inbox.notify.notified().await;
                if waiter_closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
        };

        let (result, _) = tokio::join!(waiter, async {
            tokio::task::yield_now().await;
            closed.store(true, Ordering::SeqCst);
        });
        assert!(result.is_none());
    }
}
