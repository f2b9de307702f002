//! Transaction context (C12, spec §4.7): the local-transaction state
//! machine, the XA state machine, and the synchronization callback
//! protocol. Supplemented from `original_source`'s
//! `ActiveMQXASessionKernel.cpp`, which keeps the XA path as a kernel object
//! distinct from the local-transaction path (spec SPEC_FULL §3).

use crate::error::ClientError;
use crate::model::{LocalTransactionId, XaTransactionId};

/// A callback registered by the application to observe transaction
/// boundaries (spec §4.7, "Synchronization protocol").
pub trait Synchronization: Send + Sync {
    fn before_commit(&self) {}
    fn after_commit(&self) {}
    fn after_rollback(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTxState {
    Idle,
    Begun,
    Committing,
    RollingBack,
}

/// Local transaction state machine: Idle -> Begun -> (Committing |
/// RollingBack) -> Idle.
pub struct LocalTransactionContext {
    pub transaction_id: Option<LocalTransactionId>,
    state: LocalTxState,
    synchronizations: Vec<Box<dyn Synchronization>>,
}

impl LocalTransactionContext {
    pub fn new() -> Self {
        Self { transaction_id: None, state: LocalTxState::Idle, synchronizations: Vec::new() }
    }

    pub fn state(&self) -> LocalTxState {
        self.state
    }

    pub fn register_synchronization(&mut self, sync: Box<dyn Synchronization>) {
        self.synchronizations.push(sync);
    }

    /// Transition Idle -> Begun. Errors if a transaction is already in
    /// progress (spec §7, `TransactionInProgress`).
    pub fn begin(&mut self, id: LocalTransactionId) -> Result<(), ClientError> {
        if self.state != LocalTxState::Idle {
            return Err(ClientError::TransactionInProgress);
        }
        self.transaction_id = Some(id);
        self.state = LocalTxState::Begun;
        Ok(())
    }

    /// Begun -> Committing, running before-commit synchronizations. The
    /// caller sends the one-phase commit transaction-info and, on response,
    /// calls [`Self::complete`].
    pub fn start_commit(&mut self) -> Result<(), ClientError> {
        self.require(LocalTxState::Begun)?;
        self.state = LocalTxState::Committing;
        for sync in &self.synchronizations {
            sync.before_commit();
        }
        Ok(())
    }

    pub fn start_rollback(&mut self) -> Result<(), ClientError> {
        self.require(LocalTxState::Begun)?;
        self.state = LocalTxState::RollingBack;
        Ok(())
    }

    /// Committing|RollingBack -> Idle, running the matching after-* hooks
    /// and clearing the transaction id so the next `begin` gets a fresh one.
    pub fn complete(&mut self) {
        let was_commit = self.state == LocalTxState::Committing;
        for sync in &self.synchronizations {
            if was_commit {
                sync.after_commit();
            } else {
                sync.after_rollback();
            }
        }
        self.synchronizations.clear();
        self.transaction_id = None;
        self.state = LocalTxState::Idle;
    }

    fn require(&self, expected: LocalTxState) -> Result<(), ClientError> {
        if self.state != expected {
            return Err(ClientError::Protocol(format!("local transaction in state {:?}, expected {expected:?}", self.state)));
        }
        Ok(())
    }
}

impl Default for LocalTransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// XA transaction states (spec §4.7): `Idle -> Active -> IdleAfterEnd ->
/// Prepared -> (Committed | RolledBack) -> Idle`, with `Forget` and
/// `Recover` paths and one-phase optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaState {
    Idle,
    Active,
    IdleAfterEnd,
    Prepared,
    Committed,
    RolledBack,
}

/// XA vote returned by a one-phase `prepare` that is actually executed as a
/// combined prepare+commit (spec §4.7, "one-phase optimization").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaVote {
    Ok,
    ReadOnly,
}

pub struct XaTransactionContext {
    state: XaState,
    xid: Option<XaTransactionId>,
}

impl XaTransactionContext {
    pub fn new() -> Self {
        Self { state: XaState::Idle, xid: None }
    }

    pub fn state(&self) -> XaState {
        self.state
    }

    pub fn xid(&self) -> Option<&XaTransactionId> {
        self.xid.as_ref()
    }

    pub fn start(&mut self, xid: XaTransactionId) -> Result<(), ClientError> {
        self.require(XaState::Idle)?;
        self.xid = Some(xid);
        self.state = XaState::Active;
        Ok(())
    }

    /// Suspend/resume transitions are only allowed from Active (spec §4.7).
    pub fn end(&mut self) -> Result<(), ClientError> {
        self.require(XaState::Active)?;
        self.state = XaState::IdleAfterEnd;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ClientError> {
        self.require(XaState::IdleAfterEnd)?;
        self.state = XaState::Active;
        Ok(())
    }

    pub fn prepare(&mut self) -> Result<XaVote, ClientError> {
        self.require(XaState::IdleAfterEnd)?;
        self.state = XaState::Prepared;
        Ok(XaVote::Ok)
    }

    pub fn commit_two_phase(&mut self) -> Result<(), ClientError> {
        self.require(XaState::Prepared)?;
        self.state = XaState::Committed;
        Ok(())
    }

    /// One-phase optimization: commit directly from `IdleAfterEnd` without
    /// a separate prepare round trip.
    pub fn commit_one_phase(&mut self) -> Result<(), ClientError> {
        self.require(XaState::IdleAfterEnd)?;
        self.state = XaState::Committed;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), ClientError> {
        if !matches!(self.state, XaState::IdleAfterEnd | XaState::Prepared) {
            return Err(protocol_error(self.state, "rollback"));
        }
        self.state = XaState::RolledBack;
        Ok(())
    }

    /// Forget a heuristically-completed transaction, returning to Idle.
    pub fn forget(&mut self) -> Result<(), ClientError> {
        if !matches!(self.state, XaState::Committed | XaState::RolledBack) {
            return Err(protocol_error(self.state, "forget"));
        }
        self.state = XaState::Idle;
        self.xid = None;
        Ok(())
    }

    fn require(&self, expected: XaState) -> Result<(), ClientError> {
        if self.state != expected {
            return Err(protocol_error(self.state, "transition"));
        }
        Ok(())
    }
}

impl Default for XaTransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

fn protocol_error(state: XaState, op: &str) -> ClientError {
    ClientError::Protocol(format!("XA {op} rejected: transaction in state {state:?}"))
}

/// A list of in-doubt XIDs returned by the broker (spec §4.7, "recover
/// path"); opaque to the client beyond carrying them back to the
/// application for manual resolution.
pub fn recoverable_xids() -> Vec<XaTransactionId> {
    Vec::new()
}

/// One connection's transaction surface: either the local path or the XA
/// path is active at a time, never both (spec §4.6: "an XA session treats
/// the local-transaction surface as a no-op").
pub enum TransactionContext {
    Local(LocalTransactionContext),
    Xa(XaTransactionContext),
}

impl TransactionContext {
    pub fn local() -> Self {
        Self::Local(LocalTransactionContext::new())
    }

    pub fn xa() -> Self {
        Self::Xa(XaTransactionContext::new())
    }

    pub fn is_in_progress(&self) -> bool {
        match self {
            Self::Local(ctx) => ctx.state() != LocalTxState::Idle,
            Self::Xa(ctx) => ctx.state() != XaState::Idle,
        }
    }

    pub fn as_local_mut(&mut self) -> Option<&mut LocalTransactionContext> {
        match self {
            Self::Local(ctx) => Some(ctx),
            Self::Xa(_) => None,
        }
    }

    /// The id of whichever transaction is currently in progress, if any;
    /// used to stamp sends and acks (spec §4.6).
    pub fn current_transaction_id(&self) -> Option<crate::model::TransactionId> {
        match self {
            Self::Local(ctx) => ctx.transaction_id.clone().map(crate::model::TransactionId::Local),
            Self::Xa(ctx) => ctx.xid().cloned().map(crate::model::TransactionId::Xa),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn local_tx_id() -> LocalTransactionId {
        LocalTransactionId { connection_id: crate::model::ConnectionId("ID:conn-1".into()), value: 1 }
    }

    fn an_xid() -> XaTransactionId {
        XaTransactionId { format_id: 1, global_transaction_id: vec![1, 2, 3], branch_qualifier: vec![4, 5] }
    }

    #[test]
    fn local_tx_rejects_begin_while_already_begun() {
        let mut ctx = LocalTransactionContext::new();
        ctx.begin(local_tx_id()).unwrap();
        assert!(matches!(ctx.begin(local_tx_id()), Err(ClientError::TransactionInProgress)));
    }

    #[test]
    fn local_tx_runs_synchronizations_on_commit() {
        struct Counting(Arc<AtomicUsize>);
        impl Synchronization for Counting {
            fn before_commit(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn after_commit(&self) {
                self.0.fetch_add(10, Ordering::SeqCst);
            }
        }
        let counter = Arc::new(AtomicUsize::new(0));
        let mut ctx = LocalTransactionContext::new();
        ctx.begin(local_tx_id()).unwrap();
        ctx.register_synchronization(Box::new(Counting(counter.clone())));
        ctx.start_commit().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        ctx.complete();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert_eq!(ctx.state(), LocalTxState::Idle);
        assert!(ctx.transaction_id.is_none());
    }

    #[test]
    fn xa_happy_path_two_phase() {
        let mut ctx = XaTransactionContext::new();
        ctx.start(an_xid()).unwrap();
        ctx.end().unwrap();
        assert_eq!(ctx.prepare().unwrap(), XaVote::Ok);
        ctx.commit_two_phase().unwrap();
        assert_eq!(ctx.state(), XaState::Committed);
        ctx.forget().unwrap();
        assert_eq!(ctx.state(), XaState::Idle);
    }

    #[test]
    fn xa_one_phase_commit_skips_prepare() {
        let mut ctx = XaTransactionContext::new();
        ctx.start(an_xid()).unwrap();
        ctx.end().unwrap();
        ctx.commit_one_phase().unwrap();
        assert_eq!(ctx.state(), XaState::Committed);
    }

    #[test]
    fn xa_rejects_out_of_order_commit_without_mutating_state() {
        let mut ctx = XaTransactionContext::new();
        ctx.start(an_xid()).unwrap();
        let result = ctx.commit_two_phase();
        assert!(result.is_err());
        assert_eq!(ctx.state(), XaState::Active, "rejected transition must not mutate state");
    }

    #[test]
    fn xa_suspend_resume_round_trips_through_active() {
        let mut ctx = XaTransactionContext::new();
        ctx.start(an_xid()).unwrap();
        ctx.end().unwrap();
        ctx.resume().unwrap();
        assert_eq!(ctx.state(), XaState::Active);
    }

    #[test]
    fn transaction_context_reports_in_progress_correctly() {
        let mut local = TransactionContext::local();
        assert!(!local.is_in_progress());
        if let TransactionContext::Local(ctx) = &mut local {
            ctx.begin(local_tx_id()).unwrap();
        }
        assert!(local.is_in_progress());
    }
}
