//! The client state machines (C8-C12, spec §4.6-§4.7): connection, session,
//! producer, consumer, transaction context, the per-session dispatcher, and
//! the redelivery policy they share.

pub mod connection;
pub mod consumer;
pub mod dispatch;
pub mod producer;
pub mod redelivery;
pub mod session;
pub mod transaction;

pub use connection::{Channel, Connection, ConnectionState};
pub use consumer::Consumer;
pub use producer::{Producer, ProducerOptions, SendCallback};
pub use redelivery::RedeliveryPolicy;
pub use session::{AckMode, Session};
pub use transaction::{Synchronization, TransactionContext};
