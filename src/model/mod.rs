//! The data model: identifiers, destinations, messages, and commands
//! (spec §3).

pub mod command;
pub mod destination;
pub mod ids;
pub mod message;

pub use command::{
    AckType, Command, CommandTag, ConnectionControl, ConnectionInfo, ConsumerControl, ConsumerInfo,
    Envelope, ExceptionResponse, MessageAck, MessageDispatch, MessagePull, ProducerInfo, RemoveInfo,
    Response, SessionInfo, TransactionInfo, TransactionOperation, WireformatInfo,
};
pub use destination::{Destination, DestinationKind, SimpleDestination};
pub use ids::{
    CommandIdGenerator, ConnectionId, ConsumerId, IdCounter, LocalTransactionId, MessageId,
    ProducerId, SessionId, TransactionId, XaTransactionId,
};
pub use message::{Body, DeliveryMode, Message, PropertyValue};
