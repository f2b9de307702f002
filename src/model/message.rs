//! Messages: header fields, typed property map, and payload (spec §3).

use super::destination::Destination;
use super::ids::{MessageId, ProducerId, TransactionId};
use std::collections::BTreeMap;

/// Delivery mode, carried in every message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    NonPersistent,
    Persistent,
}

/// A typed value in a message's property map or a `MapBody`/`ListBody`
/// payload. Mirrors the primitive map value tags of codec §4.1.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    ByteArray(Vec<u8>),
    Map(BTreeMap<String, PropertyValue>),
    List(Vec<PropertyValue>),
    Null,
}

/// Message payload, one of the kinds named in spec §3.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Bytes(Vec<u8>),
    Text(String),
    Map(BTreeMap<String, PropertyValue>),
    List(Vec<PropertyValue>),
    Null,
}

/// Well-known scheduled-delivery property names (spec §6). The client only
/// passes these through; it never interprets them.
pub const AMQ_SCHEDULED_DELAY: &str = "AMQ_SCHEDULED_DELAY";
pub const AMQ_SCHEDULED_PERIOD: &str = "AMQ_SCHEDULED_PERIOD";
pub const AMQ_SCHEDULED_REPEAT: &str = "AMQ_SCHEDULED_REPEAT";

/// Whether a message is still under construction or has been sent/received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Mutable,
    ReadOnly,
}

/// A message: header fields, property map, and payload.
///
/// Has two read/write modes (spec §3): *mutable* while being constructed,
/// *read-only* after send or on receive. A read-only body may still receive
/// property mutations (for application-injected trace tags) unless frozen.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: Option<MessageId>,
    pub correlation_id: Option<String>,
    pub destination: Option<Destination>,
    pub reply_to: Option<Destination>,
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    pub timestamp_ms: i64,
    /// Absolute expiration time in epoch ms; 0 means never.
    pub expiration_ms: i64,
    pub redelivery_counter: u32,
    pub group_id: Option<String>,
    pub group_sequence: i32,
    pub producer_id: Option<ProducerId>,
    pub transaction_id: Option<TransactionId>,
    pub properties: BTreeMap<String, PropertyValue>,
    pub body: Body,

    mode: Mode,
    frozen: bool,
    /// Marshalled bytes cached after send so failover replay can retransmit
    /// without re-marshaling (spec §3).
    pub(crate) cached_wire_bytes: Option<Vec<u8>>,
}

impl Message {
    /// Default priority, per spec §3 (`0-9, default 4`).
    pub const DEFAULT_PRIORITY: u8 = 4;

    pub fn new(body: Body) -> Self {
        Self {
            message_id: None,
            correlation_id: None,
            destination: None,
            reply_to: None,
            delivery_mode: DeliveryMode::Persistent,
            priority: Self::DEFAULT_PRIORITY,
            timestamp_ms: 0,
            expiration_ms: 0,
            redelivery_counter: 0,
            group_id: None,
            group_sequence: 0,
            producer_id: None,
            transaction_id: None,
            properties: BTreeMap::new(),
            body,
            mode: Mode::Mutable,
            frozen: false,
            cached_wire_bytes: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self { Self::new(Body::Text(text.into())) }
    pub fn bytes(data: Vec<u8>) -> Self { Self::new(Body::Bytes(data)) }
    pub fn map(values: BTreeMap<String, PropertyValue>) -> Self { Self::new(Body::Map(values)) }

    pub fn is_read_only(&self) -> bool { self.mode == Mode::ReadOnly }

    /// Transition to read-only. Called by the producer at send time and by
    /// the codec on receive.
    pub fn mark_read_only(&mut self) { self.mode = Mode::ReadOnly; }

    /// Freeze the message against further property mutation. Once frozen,
    /// even trace-tag injection is rejected.
    pub fn freeze(&mut self) { self.frozen = true; }

    /// Set a property, allowed on a mutable message, or on a read-only,
    /// unfrozen message (application-injected trace tags per spec §3).
    pub fn set_property(&mut self, name: impl Into<String>, value: PropertyValue) -> Result<(), PropertyMutationError> {
        if self.mode == Mode::ReadOnly && self.frozen {
            return Err(PropertyMutationError::Frozen);
        }
        self.properties.insert(name.into(), value);
        Ok(())
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> { self.properties.get(name) }

    pub fn text_body(&self) -> Option<&str> {
        match &self.body {
            Body::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PropertyMutationError {
    #[error("message is frozen and no longer accepts property mutations")]
    Frozen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_defaults_priority_to_four() {
        let msg = Message::text("hello");
        assert_eq!(msg.priority, 4);
        assert_eq!(msg.redelivery_counter, 0);
        assert!(!msg.is_read_only());
    }

    #[test]
    fn read_only_message_still_accepts_property_mutation_unless_frozen() {
        let mut msg = Message::text("hello");
        msg.mark_read_only();
        assert!(msg.set_property("trace", PropertyValue::String("tag".into())).is_ok());
        msg.freeze();
        assert!(matches!(
            msg.set_property("trace2", PropertyValue::String("tag".into())),
            Err(PropertyMutationError::Frozen)
        ));
    }
}
