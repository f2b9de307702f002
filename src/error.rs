//! Layered error types (spec §7, §9 REDESIGN FLAGS).
//!
//! Each subsystem boundary gets its own [`thiserror::Error`] enum instead of
//! threading `anyhow::Error` through the core; [`ClientError`] is the
//! top-level surface a caller (or the out-of-scope JMS-style API) matches
//! on, with `#[from]` conversions from every layer below it.

use std::io;

/// Failures in the wire codec (C1): malformed frames, length overflow,
/// truncated strings, unknown command tags.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame length {length} exceeds maximum {max}")]
    FrameTooLarge { length: u32, max: u32 },
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("unknown command tag {0}")]
    UnknownTag(u8),
    #[error("unknown primitive map value tag {0}")]
    UnknownValueTag(u8),
    #[error("malformed modified-UTF-8 string")]
    MalformedString,
    #[error("string exceeds 16-bit length prefix maximum of 65535 bytes")]
    StringTooLong,
    #[error("I/O error during marshal/unmarshal: {0}")]
    Io(#[from] io::Error),
}

/// Failures negotiating a wireformat (C5).
#[derive(Debug, thiserror::Error)]
pub enum WireformatError {
    #[error("peer sent no wireformat-info before other commands")]
    NoNegotiation,
    #[error("codec error during negotiation: {0}")]
    Codec(#[from] CodecError),
}

/// Transport-layer failures (C2/C3): socket, TLS, or codec failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {uri} failed: {source}")]
    Connect { uri: String, #[source] source: io::Error },
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("wireformat negotiation error: {0}")]
    Wireformat(#[from] WireformatError),
    #[error("read timed out: no frame received within the negotiated inactivity window")]
    ReadTimeout,
    #[error("transport is closed")]
    Closed,
}

/// Failures from the response correlator (C6).
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("wait for response to command {0} timed out")]
    Timeout(u32),
    #[error("wait for response to command {0} was cancelled")]
    Cancelled(u32),
    #[error("transport failed while awaiting response to command {0}: {1}")]
    TransportFailed(u32, #[source] TransportError),
}

/// Failures from the failover transport (C7).
#[derive(Debug, thiserror::Error)]
pub enum FailoverError {
    #[error("no broker URIs configured")]
    NoCandidates,
    #[error("all candidate brokers exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("timed out waiting {0:?} for reconnect")]
    Timeout(std::time::Duration),
    #[error("failover transport is closed")]
    Closed,
}

/// The top-level client error surface (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Failover(#[from] FailoverError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("broker sent a malformed or unexpected command: {0}")]
    Protocol(String),
    #[error("broker exception: {exception_class}: {message}")]
    BrokerException { exception_class: String, message: String },
    #[error("security error: {0}")]
    Security(String),
    #[error("invalid operation: {0}")]
    LocalUsage(String),
    #[error("a transaction is already in progress on this session")]
    TransactionInProgress,
    #[error("message exceeded maximum redeliveries and was routed to a dead-letter destination")]
    RedeliveryExhausted,
}

pub type ClientResult<T> = Result<T, ClientError>;
