//! Producer (C10, spec §4.6): message id assignment, transaction stamping,
//! the sync-vs-async send decision, and producer-window flow control.

use crate::client::connection::ConnectionCore;
use crate::client::session::Session;
use crate::error::ClientResult;
use crate::model::{Command, DeliveryMode, Destination, IdCounter, Message, MessageId, ProducerId};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Outcome handed to an async-completion callback (spec §4.6: "on async
/// failure the callback receives the failure").
pub type SendCallback = Box<dyn FnOnce(ClientResult<()>) + Send>;

/// Byte-credit flow control for async sends (spec §4.6, "producer window").
/// Reserves bytes before a send goes out and releases them once the broker
/// acks that send, waking any sender blocked on a full window.
struct ProducerWindow {
    max_bytes: u32,
    in_flight: Mutex<u32>,
    notify: Notify,
}

impl ProducerWindow {
    fn new(max_bytes: u32) -> Self {
        Self { max_bytes, in_flight: Mutex::new(0), notify: Notify::new() }
    }

    /// Block until `size` bytes of credit are available, then reserve them.
    /// A single oversized message is still admitted once the window is
    /// completely empty, so one large send never deadlocks a small window.
    async fn reserve(&self, size: u32) {
        loop {
            {
                let mut in_flight = self.in_flight.lock().await;
                if *in_flight == 0 || *in_flight + size <= self.max_bytes {
                    *in_flight += size;
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    async fn release(&self, size: u32) {
        let mut in_flight = self.in_flight.lock().await;
        *in_flight = in_flight.saturating_sub(size);
        drop(in_flight);
        self.notify.notify_waiters();
    }
}

/// A bounded, recently-sent-id window per producer (spec §6, "message-audit
/// hook"), grounded in `original_source`'s `ActiveMQMessageAuditTest.cpp`.
/// Exposed read-only to the application; the producer itself never rejects
/// a send based on it.
struct MessageAudit {
    seen: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl MessageAudit {
    fn new(capacity: usize) -> Self {
        Self { seen: HashSet::new(), order: VecDeque::new(), capacity }
    }

    /// Record `id` as sent, evicting the oldest entry once over capacity.
    /// Returns whether `id` had already been recorded.
    fn record(&mut self, id: MessageId) -> bool {
        if self.seen.contains(&id) {
            return true;
        }
        self.seen.insert(id.clone());
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        false
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }
}

/// Producer send-time options not carried by the message itself (spec §6's
/// connection option group, scoped down to what a single producer needs).
#[derive(Debug, Clone, Copy)]
pub struct ProducerOptions {
    pub always_sync_send: bool,
    pub use_async_send: bool,
    /// Milliseconds added to the send timestamp to compute `expiration_ms`
    /// when the message doesn't already carry one; 0 means never expire.
    pub time_to_live_ms: i64,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self { always_sync_send: false, use_async_send: false, time_to_live_ms: 0 }
    }
}

const MESSAGE_AUDIT_CAPACITY: usize = 1024;

pub struct Producer {
    core: Arc<ConnectionCore>,
    session: Arc<Session>,
    producer_id: ProducerId,
    destination: Option<Destination>,
    options: ProducerOptions,
    message_ids: IdCounter,
    window: Option<Arc<ProducerWindow>>,
    audit: Mutex<MessageAudit>,
    closed: AtomicBool,
}

impl Producer {
    pub(crate) fn new(
        core: Arc<ConnectionCore>,
        session: Arc<Session>,
        producer_id: ProducerId,
        destination: Option<Destination>,
        window_size: Option<u32>,
    ) -> Arc<Self> {
        Arc::new(Self {
            core,
            session,
            producer_id,
            destination,
            options: ProducerOptions::default(),
            message_ids: IdCounter::new(),
            window: window_size.map(|size| Arc::new(ProducerWindow::new(size))),
            audit: Mutex::new(MessageAudit::new(MESSAGE_AUDIT_CAPACITY)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    pub fn set_options(&mut self, options: ProducerOptions) {
        self.options = options;
    }

    /// Whether `id` was recorded as sent by this producer within the
    /// message-audit window (spec §6: application-queryable, not
    /// send-blocking).
    pub async fn is_duplicate(&self, id: &MessageId) -> bool {
        self.audit.lock().await.contains(id)
    }

    /// Send to this producer's fixed destination. Errors if the producer is
    /// anonymous (no fixed destination) and the message doesn't name one.
    pub async fn send(self: &Arc<Self>, message: Message) -> ClientResult<()> {
        self.send_to(self.destination.clone(), message, None).await
    }

    /// Send with an async-completion callback instead of blocking on the
    /// broker's ack (spec §4.6: "on async failure the callback receives the
    /// failure").
    pub async fn send_async(self: &Arc<Self>, message: Message, callback: SendCallback) -> ClientResult<()> {
        self.send_to(self.destination.clone(), message, Some(callback)).await
    }

    /// Send to an explicit destination, for an anonymous producer serving
    /// more than one destination.
    pub async fn send_to(
        self: &Arc<Self>,
        destination: Option<Destination>,
        mut message: Message,
        callback: Option<SendCallback>,
    ) -> ClientResult<()> {
        let destination = destination.ok_or_else(|| crate::error::ClientError::LocalUsage("no destination: producer is anonymous and none was supplied".into()))?;

        let message_id = MessageId { producer_id: self.producer_id.clone(), value: self.message_ids.next() };
        message.message_id = Some(message_id.clone());
        message.producer_id = Some(self.producer_id.clone());
        message.destination = Some(destination);
        message.priority = message.priority.min(9);
        message.transaction_id = self.session.current_transaction_id().await;

        if message.expiration_ms == 0 && self.options.time_to_live_ms > 0 {
            message.expiration_ms = now_millis() + self.options.time_to_live_ms;
        }

        message.mark_read_only();
        self.audit.lock().await.record(message_id.clone());

        let size = estimated_size(&message);
        if let Some(window) = &self.window {
            window.reserve(size).await;
        }

        let is_sync = self.should_send_sync(&message, callback.is_some());
        let command = Command::Message(message);

        if is_sync {
            let result = self.core.call(command).await.map(|_| ());
            if let Some(window) = &self.window {
                window.release(size).await;
            }
            result
        } else {
            let core = self.core.clone();
            let window = self.window.clone();
            let producer_id = self.producer_id.clone();
            tokio::spawn(async move {
                let result = core.call(command).await.map(|_| ());
                if let Some(window) = &window {
                    window.release(size).await;
                }
                match (&result, callback) {
                    (Err(err), None) => warn!(%producer_id, error = %err, "async send failed with no callback registered"),
                    (_, Some(callback)) => callback(result),
                    _ => {}
                }
            });
            Ok(())
        }
    }

    /// Decide sync vs async per spec §4.6: `alwaysSyncSend` wins outright;
    /// otherwise `useAsyncSend`, a configured window, or a supplied callback
    /// push the send async; failing all of those, delivery mode decides
    /// (persistent defaults sync, non-persistent defaults async).
    fn should_send_sync(&self, message: &Message, callback_supplied: bool) -> bool {
        if self.options.always_sync_send {
            return true;
        }
        if self.options.use_async_send || self.window.is_some() || callback_supplied {
            return false;
        }
        matches!(message.delivery_mode, DeliveryMode::Persistent)
    }

    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!(producer_id = %self.producer_id, "producer closed");
    }
}

fn estimated_size(message: &Message) -> u32 {
    use crate::model::Body;
    let body_len = match &message.body {
        Body::Bytes(data) => data.len(),
        Body::Text(text) => text.len(),
        Body::Map(_) | Body::List(_) | Body::Null => 64,
    };
    (body_len + 64).min(u32::MAX as usize) as u32
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_blocks_until_credit_is_released() {
        let window = Arc::new(ProducerWindow::new(100));
        window.reserve(80).await;

        let blocked_window = window.clone();
        let waiter = tokio::spawn(async move {
            blocked_window.reserve(50).await;
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        window.release(80).await;
        tokio::time::timeout(std::time::Duration::from_millis(200), waiter).await.expect("waiter should unblock after release").unwrap();
    }

    #[tokio::test]
    async fn window_admits_a_single_oversized_message_when_empty() {
        let window = ProducerWindow::new(10);
        window.reserve(1_000).await;
        assert_eq!(*window.in_flight.lock().await, 1_000);
    }

    #[test]
    fn message_audit_evicts_oldest_entry_past_capacity() {
        let mut audit = MessageAudit::new(2);
        let producer_id = ProducerId { session_id: crate::model::SessionId { connection_id: crate::model::ConnectionId("ID:c".into()), value: 1 }, value: 1 };
        let id = |v| MessageId { producer_id: producer_id.clone(), value: v };

        assert!(!audit.record(id(1)));
        assert!(!audit.record(id(2)));
        assert!(!audit.record(id(3)));
        assert!(!audit.contains(&id(1)), "oldest entry should have been evicted");
        assert!(audit.contains(&id(2)));
        assert!(audit.record(id(2)), "re-recording a still-present id reports a duplicate");
    }

    #[test]
    fn sync_send_decision_follows_delivery_mode_when_nothing_else_forces_async() {
        let options = ProducerOptions::default();
        let persistent = Message::text("x");
        let mut non_persistent = Message::text("x");
        non_persistent.delivery_mode = DeliveryMode::NonPersistent;

        assert!(decide(&options, None, &persistent, false));
        assert!(!decide(&options, None, &non_persistent, false));
    }

    fn decide(options: &ProducerOptions, window: Option<()>, message: &Message, callback_supplied: bool) -> bool {
        if options.always_sync_send {
            return true;
        }
        if options.use_async_send || window.is_some() || callback_supplied {
            return false;
        }
        matches!(message.delivery_mode, DeliveryMode::Persistent)
    }
}
