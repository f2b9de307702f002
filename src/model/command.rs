//! The command variant: the unit of exchange on the wire (spec §3, §4.1).

use super::destination::Destination;
use super::ids::{ConnectionId, ConsumerId, ProducerId, SessionId, TransactionId};
use super::message::Message;

/// Stable per-type tag byte, assigned in declaration order. Real OpenWire
/// assigns specific historical values per command type; this core only
/// needs tags to be stable and distinct within one build, which a
/// declaration-order enum discriminant satisfies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandTag {
    WireformatInfo = 1,
    ConnectionInfo = 2,
    ConnectionRemoveInfo = 3,
    SessionInfo = 4,
    SessionRemoveInfo = 5,
    ProducerInfo = 6,
    ProducerRemoveInfo = 7,
    ConsumerInfo = 8,
    ConsumerRemoveInfo = 9,
    DestinationInfo = 10,
    Message = 11,
    MessageAck = 12,
    MessageDispatch = 13,
    MessagePull = 14,
    TransactionInfo = 15,
    BrokerInfo = 16,
    ConnectionControl = 17,
    ConsumerControl = 18,
    ShutdownInfo = 19,
    KeepAliveInfo = 20,
    Response = 21,
    ExceptionResponse = 22,
}

/// Ack strategy/range carried by a `MessageAck` command (spec §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckType {
    /// Acknowledge a contiguous range ending at `last`.
    Delivered,
    /// Acknowledge exactly one message (INDIVIDUAL mode, spec §9 open
    /// question: no range coalescing).
    Individual,
    /// Redeliver/rollback: poison or expired ack.
    Poison,
    /// Acknowledge a contiguous range as part of a transaction commit.
    Transacted,
}

/// The transaction-info sub-operation (spec §3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOperation {
    Begin,
    CommitOnePhase,
    CommitTwoPhase,
    Prepare,
    Rollback,
    Recover,
    Forget,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireformatInfo {
    pub version: u32,
    pub tight_encoding_enabled: bool,
    pub cache_enabled: bool,
    pub cache_size: u32,
    pub max_inactivity_duration_ms: i64,
    pub max_inactivity_duration_initial_delay_ms: i64,
    pub stack_trace_enabled: bool,
    pub message_compression_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub client_id: Option<String>,
    pub username: Option<String>,
    /// Unique-per-reconnect marker used by failover replay (spec §4.5).
    pub failover_session_resumed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub window_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerInfo {
    pub consumer_id: ConsumerId,
    pub destination: Destination,
    pub prefetch_size: u32,
    pub no_local: bool,
    pub selector: Option<String>,
    pub exclusive: bool,
    pub priority: i8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveInfo {
    pub last_delivered_sequence_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageAck {
    pub consumer_id: ConsumerId,
    pub ack_type: AckType,
    pub first_message_id: Option<super::ids::MessageId>,
    pub last_message_id: super::ids::MessageId,
    pub message_count: u32,
    pub transaction_id: Option<TransactionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDispatch {
    pub consumer_id: ConsumerId,
    pub message: Message,
    /// Number of messages still outstanding to this consumer after this
    /// dispatch; used by dups-ok "half drained" ack timing (spec §4.6).
    pub redelivery_count_hint: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePull {
    pub consumer_id: ConsumerId,
    pub timeout_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub transaction_id: TransactionId,
    pub operation: TransactionOperation,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionControl {
    pub close: bool,
    pub exit: bool,
    pub fault_tolerant: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumerControl {
    pub consumer_id: Option<ConsumerId>,
    pub close: bool,
    pub prefetch: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub correlation_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub correlation_id: u32,
    pub exception_class: String,
    pub message: String,
}

/// The tagged command variant (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    WireformatInfo(WireformatInfo),
    ConnectionInfo(ConnectionInfo),
    ConnectionRemoveInfo(RemoveInfo),
    SessionInfo(SessionInfo),
    SessionRemoveInfo(RemoveInfo),
    ProducerInfo(ProducerInfo),
    ProducerRemoveInfo(RemoveInfo),
    ConsumerInfo(ConsumerInfo),
    ConsumerRemoveInfo(RemoveInfo),
    DestinationInfo(Destination),
    Message(Message),
    MessageAck(MessageAck),
    MessageDispatch(MessageDispatch),
    MessagePull(MessagePull),
    TransactionInfo(TransactionInfo),
    BrokerInfo,
    ConnectionControl(ConnectionControl),
    ConsumerControl(ConsumerControl),
    ShutdownInfo,
    KeepAliveInfo,
    Response(Response),
    ExceptionResponse(ExceptionResponse),
}

impl Command {
    pub const fn tag(&self) -> CommandTag {
        match self {
            Self::WireformatInfo(_) => CommandTag::WireformatInfo,
            Self::ConnectionInfo(_) => CommandTag::ConnectionInfo,
            Self::ConnectionRemoveInfo(_) => CommandTag::ConnectionRemoveInfo,
            Self::SessionInfo(_) => CommandTag::SessionInfo,
            Self::SessionRemoveInfo(_) => CommandTag::SessionRemoveInfo,
            Self::ProducerInfo(_) => CommandTag::ProducerInfo,
            Self::ProducerRemoveInfo(_) => CommandTag::ProducerRemoveInfo,
            Self::ConsumerInfo(_) => CommandTag::ConsumerInfo,
            Self::ConsumerRemoveInfo(_) => CommandTag::ConsumerRemoveInfo,
            Self::DestinationInfo(_) => CommandTag::DestinationInfo,
            Self::Message(_) => CommandTag::Message,
            Self::MessageAck(_) => CommandTag::MessageAck,
            Self::MessageDispatch(_) => CommandTag::MessageDispatch,
            Self::MessagePull(_) => CommandTag::MessagePull,
            Self::TransactionInfo(_) => CommandTag::TransactionInfo,
            Self::BrokerInfo => CommandTag::BrokerInfo,
            Self::ConnectionControl(_) => CommandTag::ConnectionControl,
            Self::ConsumerControl(_) => CommandTag::ConsumerControl,
            Self::ShutdownInfo => CommandTag::ShutdownInfo,
            Self::KeepAliveInfo => CommandTag::KeepAliveInfo,
            Self::Response(_) => CommandTag::Response,
            Self::ExceptionResponse(_) => CommandTag::ExceptionResponse,
        }
    }

    /// Whether this command type expects a correlated response (spec §4.4).
    pub const fn expects_response(&self) -> bool {
        !matches!(
            self,
            Self::KeepAliveInfo | Self::Response(_) | Self::ExceptionResponse(_) | Self::MessageDispatch(_)
        )
    }
}

/// An envelope pairing a command with its wire-level command id.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub command_id: u32,
    pub command: Command,
}
