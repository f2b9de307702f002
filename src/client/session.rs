//! Session (C9, spec §4.6): the per-session serial dispatcher and the
//! acknowledgement-mode surface. A session owns its consumers and
//! producers; it is itself owned by a connection and known to the wider
//! world only by its [`SessionId`] (spec §9, "cyclic ownership" redesign).

use crate::client::connection::ConnectionCore;
use crate::client::consumer::Consumer;
use crate::client::dispatch::DedicatedTaskRunner;
use crate::client::producer::Producer;
use crate::client::redelivery::RedeliveryPolicy;
use crate::client::transaction::TransactionContext;
use crate::error::{ClientError, ClientResult};
use crate::model::{
    Command, ConsumerId, ConsumerInfo, Destination, IdCounter, LocalTransactionId, MessageDispatch, ProducerId,
    ProducerInfo, RemoveInfo, SessionId, TransactionId, TransactionInfo, TransactionOperation,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Acknowledgement strategy for a session's consumers (spec §4.6). The
/// first three follow standard JMS semantics; `Transacted` routes acks
/// through the current transaction instead of sending them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    DupsOk,
    Individual,
    Transacted,
}

/// Per-session resources: the ack mode, the dedicated dispatcher all
/// inbound dispatch for this session's consumers funnels through, and the
/// session's own view of the current transaction (local or XA).
pub struct Session {
    core: Arc<ConnectionCore>,
    session_id: SessionId,
    ack_mode: AckMode,
    is_xa: bool,
    producer_ids: IdCounter,
    consumer_ids: IdCounter,
    transaction_ids: IdCounter,
    consumers: Arc<Mutex<HashMap<ConsumerId, Arc<Consumer>>>>,
    producers: Mutex<HashMap<ProducerId, Arc<Producer>>>,
    transaction: Arc<Mutex<TransactionContext>>,
    redelivery_policy: RedeliveryPolicy,
    dispatcher: DedicatedTaskRunner<MessageDispatch>,
}

impl Session {
    /// Build a session and spawn its dispatcher. Not `async`: the
    /// dispatcher's worker task is spawned onto the runtime but nothing
    /// here needs to await.
    pub fn new(core: Arc<ConnectionCore>, session_id: SessionId, ack_mode: AckMode) -> Arc<Self> {
        Self::with_transaction(core, session_id, ack_mode, TransactionContext::local())
    }

    /// Build an XA session: the local-transaction surface (`commit_local`,
    /// `rollback_local`) becomes a no-op and the XA context drives
    /// begin/end/commit/rollback instead (spec §4.6).
    pub fn new_xa(core: Arc<ConnectionCore>, session_id: SessionId) -> Arc<Self> {
        Self::with_transaction(core, session_id, AckMode::Transacted, TransactionContext::xa())
    }

    fn with_transaction(core: Arc<ConnectionCore>, session_id: SessionId, ack_mode: AckMode, transaction: TransactionContext) -> Arc<Self> {
        let is_xa = matches!(transaction, TransactionContext::Xa(_));
        let consumers: Arc<Mutex<HashMap<ConsumerId, Arc<Consumer>>>> = Arc::new(Mutex::new(HashMap::new()));
        let dispatch_consumers = consumers.clone();
        let dispatcher = DedicatedTaskRunner::spawn(move |dispatch: MessageDispatch| {
            let consumers = dispatch_consumers.clone();
            async move {
                let consumer = consumers.lock().await.get(&dispatch.consumer_id).cloned();
                match consumer {
                    Some(consumer) => consumer.on_dispatch(dispatch).await,
                    None => warn!(consumer_id = %dispatch.consumer_id, "dispatch for unknown or already-closed consumer"),
                }
            }
        });

        Arc::new(Self {
            core,
            session_id,
            ack_mode,
            is_xa,
            producer_ids: IdCounter::new(),
            consumer_ids: IdCounter::new(),
            transaction_ids: IdCounter::new(),
            consumers,
            producers: Mutex::new(HashMap::new()),
            transaction: Arc::new(Mutex::new(transaction)),
            redelivery_policy: RedeliveryPolicy::default(),
            dispatcher,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Create a producer, optionally bound to a fixed destination (an
    /// anonymous producer supplies the destination per send instead).
    pub async fn create_producer(self: &Arc<Self>, destination: Option<Destination>, window_size: Option<u32>) -> ClientResult<Arc<Producer>> {
        let producer_id = ProducerId { session_id: self.session_id.clone(), value: self.producer_ids.next() };
        self.core
            .call(Command::ProducerInfo(ProducerInfo { producer_id: producer_id.clone(), window_size }))
            .await?;
        let producer = Producer::new(self.core.clone(), self.clone(), producer_id.clone(), destination, window_size);
        self.producers.lock().await.insert(producer_id, producer.clone());
        Ok(producer)
    }

    pub async fn close_producer(&self, producer_id: &ProducerId) -> ClientResult<()> {
        if self.producers.lock().await.remove(producer_id).is_some() {
            self.core
                .cast(Command::ProducerRemoveInfo(RemoveInfo { last_delivered_sequence_id: -1 }))
                .await?;
        }
        Ok(())
    }

    /// Create a consumer, strictly-increasing consumer id within this
    /// session (spec §3 invariant).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_consumer(
        self: &Arc<Self>,
        destination: Destination,
        prefetch_size: u32,
        no_local: bool,
        selector: Option<String>,
        exclusive: bool,
        priority: i8,
    ) -> ClientResult<Arc<Consumer>> {
        let consumer_id = ConsumerId { session_id: self.session_id.clone(), value: self.consumer_ids.next() };
        self.core
            .call(Command::ConsumerInfo(ConsumerInfo {
                consumer_id: consumer_id.clone(),
                destination: destination.clone(),
                prefetch_size,
                no_local,
                selector: selector.clone(),
                exclusive,
                priority,
            }))
            .await?;

        let consumer = Consumer::new(
            self.core.clone(),
            consumer_id.clone(),
            destination,
            prefetch_size,
            self.ack_mode,
            self.transaction.clone(),
            self.redelivery_policy,
        );
        self.consumers.lock().await.insert(consumer_id, consumer.clone());
        Ok(consumer)
    }

    pub async fn close_consumer(&self, consumer_id: &ConsumerId) -> ClientResult<()> {
        if let Some(consumer) = self.consumers.lock().await.remove(consumer_id) {
            consumer.close().await;
            self.core
                .cast(Command::ConsumerRemoveInfo(RemoveInfo { last_delivered_sequence_id: -1 }))
                .await?;
        }
        Ok(())
    }

    /// Route one inbound dispatch to this session's serial dispatcher
    /// (spec §5: "the per-session dispatcher is strictly FIFO ... and
    /// never parallelizes consumers").
    pub async fn on_dispatch(&self, dispatch: MessageDispatch) {
        self.dispatcher.push(dispatch).await;
    }

    /// Begin a local transaction (`SESSION_TRANSACTED` mode). A no-op on
    /// an XA session (spec §4.6): XA begin/end/commit/rollback go through
    /// [`Session::xa_start`] etc. instead.
    pub async fn begin_transaction(&self) -> ClientResult<()> {
        if self.is_xa {
            return Ok(());
        }
        let transaction_id = LocalTransactionId { connection_id: self.core.connection_id.clone(), value: self.transaction_ids.next() };
        {
            let mut ctx = self.transaction.lock().await;
            let TransactionContext::Local(local) = &mut *ctx else {
                return Err(ClientError::LocalUsage("begin_transaction called on an XA session".into()));
            };
            local.begin(transaction_id.clone())?;
        }
        self.core
            .call(Command::TransactionInfo(TransactionInfo {
                transaction_id: TransactionId::Local(transaction_id),
                operation: TransactionOperation::Begin,
            }))
            .await?;
        Ok(())
    }

    pub async fn commit_transaction(&self) -> ClientResult<()> {
        if self.is_xa {
            return Ok(());
        }
        let transaction_id = {
            let mut ctx = self.transaction.lock().await;
            let TransactionContext::Local(local) = &mut *ctx else {
                return Err(ClientError::LocalUsage("commit_transaction called on an XA session".into()));
            };
            let id = local.transaction_id.clone().ok_or_else(|| ClientError::LocalUsage("no transaction in progress".into()))?;
            local.start_commit()?;
            id
        };
        let result = self
            .core
            .call(Command::TransactionInfo(TransactionInfo { transaction_id: TransactionId::Local(transaction_id), operation: TransactionOperation::CommitOnePhase }))
            .await;
        self.transaction.lock().await.as_local_mut().map(|local| local.complete());
        result.map(|_| ())
    }

    pub async fn rollback_transaction(&self) -> ClientResult<()> {
        if self.is_xa {
            return Ok(());
        }
        let transaction_id = {
            let mut ctx = self.transaction.lock().await;
            let TransactionContext::Local(local) = &mut *ctx else {
                return Err(ClientError::LocalUsage("rollback_transaction called on an XA session".into()));
            };
            let id = local.transaction_id.clone().ok_or_else(|| ClientError::LocalUsage("no transaction in progress".into()))?;
            local.start_rollback()?;
            id
        };
        let result = self
            .core
            .call(Command::TransactionInfo(TransactionInfo { transaction_id: TransactionId::Local(transaction_id), operation: TransactionOperation::Rollback }))
            .await;
        self.transaction.lock().await.as_local_mut().map(|local| local.complete());
        let consumers: Vec<_> = self.consumers.lock().await.values().cloned().collect();
        for consumer in consumers {
            consumer.redeliver_pending().await;
        }
        result.map(|_| ())
    }

    /// The session's current transaction id, if any is in progress
    /// (local or XA); used by producers/consumers to stamp sends/acks.
    pub async fn current_transaction_id(&self) -> Option<TransactionId> {
        self.transaction.lock().await.current_transaction_id()
    }

    /// Close this session: close all consumers and producers, then drain
    /// the dispatcher (spec §5: "closing a session unblocks all its
    /// consumers and its dispatcher").
    pub async fn close(self: Arc<Self>) -> ClientResult<()> {
        let consumer_ids: Vec<_> = self.consumers.lock().await.keys().cloned().collect();
        for consumer_id in consumer_ids {
            self.close_consumer(&consumer_id).await?;
        }
        let producer_ids: Vec<_> = self.producers.lock().await.keys().cloned().collect();
        for producer_id in producer_ids {
            self.close_producer(&producer_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_mode_variants_are_distinct() {
        assert_ne!(AckMode::Auto, AckMode::Client);
        assert_ne!(AckMode::DupsOk, AckMode::Individual);
    }
}
