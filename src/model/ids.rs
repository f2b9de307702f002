//! Compound identifiers for connections, sessions, producers, consumers,
//! messages, and transactions.
//!
//! Every externally visible object carries a compound identifier that
//! preserves uniqueness across reconnects (spec §3). Identifiers are value
//! objects: equality is structural and they are cheap to clone.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A connection id is a client-chosen opaque string, immutable for the
/// lifetime of the logical connection even across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a fresh, process-unique connection id.
    pub fn generate() -> Self { Self(format!("ID:{}", uuid::Uuid::new_v4())) }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A monotonically increasing counter scoped to an owner, used to mint the
/// second component of every compound id below. Consumer ids within a
/// session are required to be strictly increasing (spec §3 invariants);
/// this counter enforces that for any owner that hands them out.
#[derive(Debug, Default)]
pub struct IdCounter(AtomicU64);

impl IdCounter {
    pub const fn new() -> Self { Self(AtomicU64::new(0)) }

    /// Return the next value in the sequence, starting at 1.
    pub fn next(&self) -> u64 { self.0.fetch_add(1, Ordering::SeqCst) + 1 }
}

/// A session id is (connection-id, 64-bit counter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    pub connection_id: ConnectionId,
    pub value: u64,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection_id, self.value)
    }
}

/// A producer/consumer id is (session-id, 64-bit counter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId {
    pub session_id: SessionId,
    pub value: u64,
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId {
    pub session_id: SessionId,
    pub value: u64,
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.value)
    }
}

/// A message id is (producer-id, 64-bit counter), assigned at send time by
/// the producer's session and never reused (spec §3 invariants).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    pub producer_id: ProducerId,
    pub value: u64,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.producer_id, self.value)
    }
}

/// A local transaction id is (connection-id, 64-bit counter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalTransactionId {
    pub connection_id: ConnectionId,
    pub value: u64,
}

/// An XA transaction id: (format id, global transaction id bytes, branch
/// qualifier bytes) per the GLOSSARY's XID definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XaTransactionId {
    pub format_id: i32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

/// Either kind of transaction id, as carried on outbound sends and acks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionId {
    Local(LocalTransactionId),
    Xa(XaTransactionId),
}

/// Every command carries a 32-bit command id assigned by whichever side
/// needs to correlate a response. Ids wrap after 2^31 (spec §4.4); the
/// counter below wraps explicitly rather than panicking on overflow.
#[derive(Debug, Default)]
pub struct CommandIdGenerator(AtomicU64);

impl CommandIdGenerator {
    pub const fn new() -> Self { Self(AtomicU64::new(0)) }

    /// Return the next command id in `[1, 2^31)`, wrapping back to 1.
    pub fn next(&self) -> u32 {
        loop {
            let current = self.0.load(Ordering::SeqCst);
            let next = if current >= (1u64 << 31) - 1 { 1 } else { current + 1 };
            if self
                .0
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next as u32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_counter_is_strictly_increasing() {
        let counter = IdCounter::new();
        let a = counter.next();
        let b = counter.next();
        assert!(b > a);
        assert_eq!(a, 1);
    }

    #[test]
    fn command_id_wraps_after_2_pow_31() {
        let gen = CommandIdGenerator::new();
        gen.0.store((1u64 << 31) - 1, Ordering::SeqCst);
        let next = gen.next();
        assert_eq!(next, 1, "command id must wrap rather than overflow u32");
    }

    #[test]
    fn connection_id_equality_is_structural() {
        let a = ConnectionId("ID:foo".to_string());
        let b = ConnectionId("ID:foo".to_string());
        assert_eq!(a, b);
    }
}
