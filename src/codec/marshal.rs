//! Tight and loose command marshalling (spec §4.1).
//!
//! Loose encoding writes a presence byte ahead of every nullable field, in
//! field order, with no lookahead. Tight encoding instead collects presence
//! bits into a leading bitmap and writes only the present fields after it,
//! trading a single bitmap-packing pass for a smaller frame. Both modes
//! share the same field order and the same primitive/string codecs; only
//! how "is this field present" gets recorded differs, so `Encoder`/`Decoder`
//! hide the difference behind `presence`/`presence` and everything else
//! reads identically regardless of mode.

use super::primitives::{read_map, write_map};
use super::string::{read_str16, write_str16};
use crate::error::CodecError;
use crate::model::command::*;
use crate::model::destination::{Destination, DestinationKind, SimpleDestination};
use crate::model::ids::{
    ConnectionId, ConsumerId, LocalTransactionId, MessageId, ProducerId, SessionId, TransactionId,
    XaTransactionId,
};
use crate::model::message::{Body, DeliveryMode, Message};
use crate::model::{Command, Envelope};
use std::collections::BTreeMap;

struct BitmapWriter {
    bits: Vec<bool>,
}

impl BitmapWriter {
    fn new() -> Self { Self { bits: Vec::new() } }

    fn push(&mut self, bit: bool) { self.bits.push(bit); }

    fn pack(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.bits.len().div_ceil(8)];
        for (i, bit) in self.bits.iter().enumerate() {
            if *bit {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        bytes
    }
}

struct BitmapReader<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> BitmapReader<'a> {
    fn new(bytes: &'a [u8]) -> Self { Self { bytes, index: 0 } }

    fn next(&mut self) -> Result<bool, CodecError> {
        let byte = *self
            .bytes
            .get(self.index / 8)
            .ok_or(CodecError::Truncated { expected: self.index / 8 + 1, actual: self.bytes.len() })?;
        let bit = (byte >> (7 - (self.index % 8))) & 1 != 0;
        self.index += 1;
        Ok(bit)
    }
}

/// Accumulates a command body, deferring nullable-field presence tracking
/// to either a trailing inline byte (loose) or a leading bitmap (tight).
struct Encoder {
    tight: bool,
    bits: BitmapWriter,
    body: Vec<u8>,
}

impl Encoder {
    fn new(tight: bool) -> Self { Self { tight, bits: BitmapWriter::new(), body: Vec::new() } }

    fn presence(&mut self, present: bool) {
        if self.tight {
            self.bits.push(present);
        } else {
            self.body.push(u8::from(present));
        }
    }

    fn opt_str(&mut self, value: &Option<String>) -> Result<(), CodecError> {
        self.presence(value.is_some());
        if let Some(s) = value {
            write_str16(&mut self.body, s)?;
        }
        Ok(())
    }

    fn str(&mut self, value: &str) -> Result<(), CodecError> { write_str16(&mut self.body, value) }

    fn u8(&mut self, value: u8) { self.body.push(value); }
    fn i8(&mut self, value: i8) { self.body.push(value as u8); }
    fn bool(&mut self, value: bool) { self.body.push(u8::from(value)); }
    fn u32(&mut self, value: u32) { self.body.extend_from_slice(&value.to_be_bytes()); }
    fn i32(&mut self, value: i32) { self.body.extend_from_slice(&value.to_be_bytes()); }
    fn i64(&mut self, value: i64) { self.body.extend_from_slice(&value.to_be_bytes()); }

    fn opt_u32(&mut self, value: Option<u32>) {
        self.presence(value.is_some());
        if let Some(v) = value {
            self.u32(v);
        }
    }

    fn bytes_with_len(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.body.extend_from_slice(bytes);
    }

    fn map(&mut self, map: &BTreeMap<String, crate::model::PropertyValue>) -> Result<(), CodecError> {
        write_map(&mut self.body, map)
    }

    fn finish(self) -> Vec<u8> {
        if self.tight {
            let mut out = self.bits.pack();
            out.extend(self.body);
            out
        } else {
            self.body
        }
    }
}

/// Mirrors [`Encoder`]: a tight decode reads presence bits from a bitmap
/// whose byte length is known up front (`bitmap_bytes`, computed by the
/// caller from the tag's fixed nullable-field count) and fixed/variable
/// fields from the body that immediately follows it. A loose decode reads
/// presence as an inline byte at the point of use instead.
struct Decoder<'a> {
    tight: bool,
    bits: BitmapReader<'a>,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8], tight: bool, bitmap_bytes: usize) -> Self {
        if tight {
            Self { tight, bits: BitmapReader::new(buf), buf, pos: bitmap_bytes }
        } else {
            Self { tight, bits: BitmapReader::new(&[]), buf, pos: 0 }
        }
    }

    fn presence(&mut self) -> Result<bool, CodecError> {
        if self.tight {
            self.bits.next()
        } else {
            Ok(self.take(1)?[0] != 0)
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(len).ok_or(CodecError::Truncated { expected: len, actual: 0 })?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(CodecError::Truncated { expected: end, actual: self.buf.len() })?;
        self.pos = end;
        Ok(slice)
    }

    fn opt_str(&mut self) -> Result<Option<String>, CodecError> {
        if self.presence()? { Ok(Some(read_str16(self.buf, &mut self.pos)?)) } else { Ok(None) }
    }

    fn str(&mut self) -> Result<String, CodecError> { read_str16(self.buf, &mut self.pos) }

    fn u8(&mut self) -> Result<u8, CodecError> { Ok(self.take(1)?[0]) }
    fn i8(&mut self) -> Result<i8, CodecError> { Ok(self.take(1)?[0] as i8) }
    fn bool(&mut self) -> Result<bool, CodecError> { Ok(self.u8()? != 0) }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes(b.try_into().expect("4 bytes")))
    }

    fn i32(&mut self) -> Result<i32, CodecError> { Ok(self.u32()? as i32) }

    fn i64(&mut self) -> Result<i64, CodecError> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes(b.try_into().expect("8 bytes")))
    }

    fn opt_u32(&mut self) -> Result<Option<u32>, CodecError> {
        if self.presence()? { Ok(Some(self.u32()?)) } else { Ok(None) }
    }

    fn bytes_with_len(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn map(&mut self) -> Result<BTreeMap<String, crate::model::PropertyValue>, CodecError> {
        read_map(self.buf, &mut self.pos)
    }
}

fn write_connection_id(enc: &mut Encoder, id: &ConnectionId) -> Result<(), CodecError> { enc.str(&id.0) }
fn read_connection_id(dec: &mut Decoder) -> Result<ConnectionId, CodecError> { Ok(ConnectionId(dec.str()?)) }

fn write_session_id(enc: &mut Encoder, id: &SessionId) -> Result<(), CodecError> {
    write_connection_id(enc, &id.connection_id)?;
    enc.i64(id.value as i64);
    Ok(())
}
fn read_session_id(dec: &mut Decoder) -> Result<SessionId, CodecError> {
    let connection_id = read_connection_id(dec)?;
    let value = dec.i64()? as u64;
    Ok(SessionId { connection_id, value })
}

fn write_producer_id(enc: &mut Encoder, id: &ProducerId) -> Result<(), CodecError> {
    write_session_id(enc, &id.session_id)?;
    enc.i64(id.value as i64);
    Ok(())
}
fn read_producer_id(dec: &mut Decoder) -> Result<ProducerId, CodecError> {
    let session_id = read_session_id(dec)?;
    let value = dec.i64()? as u64;
    Ok(ProducerId { session_id, value })
}

fn write_consumer_id(enc: &mut Encoder, id: &ConsumerId) -> Result<(), CodecError> {
    write_session_id(enc, &id.session_id)?;
    enc.i64(id.value as i64);
    Ok(())
}
fn read_consumer_id(dec: &mut Decoder) -> Result<ConsumerId, CodecError> {
    let session_id = read_session_id(dec)?;
    let value = dec.i64()? as u64;
    Ok(ConsumerId { session_id, value })
}

fn write_message_id(enc: &mut Encoder, id: &MessageId) -> Result<(), CodecError> {
    write_producer_id(enc, &id.producer_id)?;
    enc.i64(id.value as i64);
    Ok(())
}
fn read_message_id(dec: &mut Decoder) -> Result<MessageId, CodecError> {
    let producer_id = read_producer_id(dec)?;
    let value = dec.i64()? as u64;
    Ok(MessageId { producer_id, value })
}

const TX_TAG_LOCAL: u8 = 1;
const TX_TAG_XA: u8 = 2;

fn write_transaction_id(enc: &mut Encoder, id: &TransactionId) -> Result<(), CodecError> {
    match id {
        TransactionId::Local(local) => {
            enc.u8(TX_TAG_LOCAL);
            write_connection_id(enc, &local.connection_id)?;
            enc.i64(local.value as i64);
        }
        TransactionId::Xa(xa) => {
            enc.u8(TX_TAG_XA);
            enc.i32(xa.format_id);
            enc.bytes_with_len(&xa.global_transaction_id);
            enc.bytes_with_len(&xa.branch_qualifier);
        }
    }
    Ok(())
}

fn read_transaction_id(dec: &mut Decoder) -> Result<TransactionId, CodecError> {
    match dec.u8()? {
        TX_TAG_LOCAL => {
            let connection_id = read_connection_id(dec)?;
            let value = dec.i64()? as u64;
            Ok(TransactionId::Local(LocalTransactionId { connection_id, value }))
        }
        TX_TAG_XA => {
            let format_id = dec.i32()?;
            let global_transaction_id = dec.bytes_with_len()?;
            let branch_qualifier = dec.bytes_with_len()?;
            Ok(TransactionId::Xa(XaTransactionId { format_id, global_transaction_id, branch_qualifier }))
        }
        other => Err(CodecError::UnknownTag(other)),
    }
}

fn destination_kind_tag(kind: DestinationKind) -> u8 {
    match kind {
        DestinationKind::Queue => 0,
        DestinationKind::Topic => 1,
        DestinationKind::TemporaryQueue => 2,
        DestinationKind::TemporaryTopic => 3,
    }
}

fn destination_kind_from_tag(tag: u8) -> Result<DestinationKind, CodecError> {
    Ok(match tag {
        0 => DestinationKind::Queue,
        1 => DestinationKind::Topic,
        2 => DestinationKind::TemporaryQueue,
        3 => DestinationKind::TemporaryTopic,
        other => return Err(CodecError::UnknownTag(other)),
    })
}

fn write_simple_destination(enc: &mut Encoder, dest: &SimpleDestination) -> Result<(), CodecError> {
    enc.u8(destination_kind_tag(dest.kind));
    enc.str(&dest.physical_name)?;
    enc.u32(dest.options.len() as u32);
    for (k, v) in &dest.options {
        enc.str(k)?;
        enc.str(v)?;
    }
    Ok(())
}

fn read_simple_destination(dec: &mut Decoder) -> Result<SimpleDestination, CodecError> {
    let kind = destination_kind_from_tag(dec.u8()?)?;
    let physical_name = dec.str()?;
    let count = dec.u32()? as usize;
    let mut options = BTreeMap::new();
    for _ in 0..count {
        let k = dec.str()?;
        let v = dec.str()?;
        options.insert(k, v);
    }
    Ok(SimpleDestination { kind, physical_name, options })
}

const DEST_TAG_SIMPLE: u8 = 0;
const DEST_TAG_COMPOSITE: u8 = 1;

fn write_destination(enc: &mut Encoder, dest: &Destination) -> Result<(), CodecError> {
    match dest {
        Destination::Simple(simple) => {
            enc.u8(DEST_TAG_SIMPLE);
            write_simple_destination(enc, simple)?;
        }
        Destination::Composite(parts) => {
            enc.u8(DEST_TAG_COMPOSITE);
            enc.u32(parts.len() as u32);
            for part in parts {
                write_simple_destination(enc, part)?;
            }
        }
    }
    Ok(())
}

fn read_destination(dec: &mut Decoder) -> Result<Destination, CodecError> {
    match dec.u8()? {
        DEST_TAG_SIMPLE => Ok(Destination::Simple(read_simple_destination(dec)?)),
        DEST_TAG_COMPOSITE => {
            let count = dec.u32()? as usize;
            let mut parts = Vec::with_capacity(count);
            for _ in 0..count {
                parts.push(read_simple_destination(dec)?);
            }
            Ok(Destination::Composite(parts))
        }
        other => Err(CodecError::UnknownTag(other)),
    }
}

const BODY_TAG_BYTES: u8 = 0;
const BODY_TAG_TEXT: u8 = 1;
const BODY_TAG_MAP: u8 = 2;
const BODY_TAG_LIST: u8 = 3;
const BODY_TAG_NULL: u8 = 4;

fn write_body(enc: &mut Encoder, body: &Body) -> Result<(), CodecError> {
    match body {
        Body::Bytes(b) => {
            enc.u8(BODY_TAG_BYTES);
            enc.bytes_with_len(b);
        }
        Body::Text(t) => {
            enc.u8(BODY_TAG_TEXT);
            let encoded = super::string::encode_modified_utf8(t);
            enc.bytes_with_len(&encoded);
        }
        Body::Map(m) => {
            enc.u8(BODY_TAG_MAP);
            enc.map(m)?;
        }
        Body::List(items) => {
            enc.u8(BODY_TAG_LIST);
            enc.u32(items.len() as u32);
            for item in items {
                let mut buf = Vec::new();
                super::primitives::write_value(&mut buf, item)?;
                enc.bytes_with_len(&buf);
            }
        }
        Body::Null => enc.u8(BODY_TAG_NULL),
    }
    Ok(())
}

fn read_body(dec: &mut Decoder) -> Result<Body, CodecError> {
    Ok(match dec.u8()? {
        BODY_TAG_BYTES => Body::Bytes(dec.bytes_with_len()?),
        BODY_TAG_TEXT => {
            let raw = dec.bytes_with_len()?;
            Body::Text(super::string::decode_modified_utf8(&raw)?)
        }
        BODY_TAG_MAP => Body::Map(dec.map()?),
        BODY_TAG_LIST => {
            let count = dec.u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let raw = dec.bytes_with_len()?;
                let mut pos = 0;
                items.push(super::primitives::read_value(&raw, &mut pos)?);
            }
            Body::List(items)
        }
        BODY_TAG_NULL => Body::Null,
        other => return Err(CodecError::UnknownTag(other)),
    })
}

fn ack_type_tag(ack: AckType) -> u8 {
    match ack {
        AckType::Delivered => 0,
        AckType::Individual => 1,
        AckType::Poison => 2,
        AckType::Transacted => 3,
    }
}

fn ack_type_from_tag(tag: u8) -> Result<AckType, CodecError> {
    Ok(match tag {
        0 => AckType::Delivered,
        1 => AckType::Individual,
        2 => AckType::Poison,
        3 => AckType::Transacted,
        other => return Err(CodecError::UnknownTag(other)),
    })
}

fn tx_op_tag(op: TransactionOperation) -> u8 {
    match op {
        TransactionOperation::Begin => 0,
        TransactionOperation::CommitOnePhase => 1,
        TransactionOperation::CommitTwoPhase => 2,
        TransactionOperation::Prepare => 3,
        TransactionOperation::Rollback => 4,
        TransactionOperation::Recover => 5,
        TransactionOperation::Forget => 6,
        TransactionOperation::End => 7,
    }
}

fn tx_op_from_tag(tag: u8) -> Result<TransactionOperation, CodecError> {
    Ok(match tag {
        0 => TransactionOperation::Begin,
        1 => TransactionOperation::CommitOnePhase,
        2 => TransactionOperation::CommitTwoPhase,
        3 => TransactionOperation::Prepare,
        4 => TransactionOperation::Rollback,
        5 => TransactionOperation::Recover,
        6 => TransactionOperation::Forget,
        7 => TransactionOperation::End,
        other => return Err(CodecError::UnknownTag(other)),
    })
}

fn delivery_mode_tag(mode: DeliveryMode) -> u8 {
    match mode {
        DeliveryMode::NonPersistent => 0,
        DeliveryMode::Persistent => 1,
    }
}

fn delivery_mode_from_tag(tag: u8) -> Result<DeliveryMode, CodecError> {
    Ok(match tag {
        0 => DeliveryMode::NonPersistent,
        1 => DeliveryMode::Persistent,
        other => return Err(CodecError::UnknownTag(other)),
    })
}

/// Nullable-field presence calls a command's body makes, in order. Tight
/// decode needs this count up front to size the leading bitmap before it
/// can locate the start of the body.
fn nullable_field_count(tag: CommandTag) -> usize {
    match tag {
        CommandTag::ConnectionInfo => 2,      // client_id, username
        CommandTag::ProducerInfo => 1,        // window_size
        CommandTag::ConsumerInfo => 1,        // selector
        CommandTag::Message => 7,             // message_id, correlation_id, destination, reply_to, group_id, producer_id, transaction_id
        CommandTag::MessageAck => 2,          // first_message_id, transaction_id
        CommandTag::MessageDispatch => 7,     // embedded message's 7 presence bits
        CommandTag::ConsumerControl => 2,     // consumer_id, prefetch
        _ => 0,
    }
}

fn write_message(enc: &mut Encoder, msg: &Message) -> Result<(), CodecError> {
    enc.presence(msg.message_id.is_some());
    if let Some(id) = &msg.message_id {
        write_message_id(enc, id)?;
    }
    enc.opt_str(&msg.correlation_id)?;
    enc.presence(msg.destination.is_some());
    if let Some(dest) = &msg.destination {
        write_destination(enc, dest)?;
    }
    enc.presence(msg.reply_to.is_some());
    if let Some(dest) = &msg.reply_to {
        write_destination(enc, dest)?;
    }
    enc.u8(delivery_mode_tag(msg.delivery_mode));
    enc.u8(msg.priority);
    enc.i64(msg.timestamp_ms);
    enc.i64(msg.expiration_ms);
    enc.u32(msg.redelivery_counter);
    enc.opt_str(&msg.group_id)?;
    enc.i32(msg.group_sequence);
    enc.presence(msg.producer_id.is_some());
    if let Some(id) = &msg.producer_id {
        write_producer_id(enc, id)?;
    }
    enc.presence(msg.transaction_id.is_some());
    if let Some(tx) = &msg.transaction_id {
        write_transaction_id(enc, tx)?;
    }
    enc.map(&msg.properties)?;
    write_body(enc, &msg.body)?;
    Ok(())
}

fn read_message(dec: &mut Decoder) -> Result<Message, CodecError> {
    let message_id = if dec.presence()? { Some(read_message_id(dec)?) } else { None };
    let correlation_id = dec.opt_str()?;
    let destination = if dec.presence()? { Some(read_destination(dec)?) } else { None };
    let reply_to = if dec.presence()? { Some(read_destination(dec)?) } else { None };
    let delivery_mode = delivery_mode_from_tag(dec.u8()?)?;
    let priority = dec.u8()?;
    let timestamp_ms = dec.i64()?;
    let expiration_ms = dec.i64()?;
    let redelivery_counter = dec.u32()?;
    let group_id = dec.opt_str()?;
    let group_sequence = dec.i32()?;
    let producer_id = if dec.presence()? { Some(read_producer_id(dec)?) } else { None };
    let transaction_id = if dec.presence()? { Some(read_transaction_id(dec)?) } else { None };
    let properties = dec.map()?;
    let body = read_body(dec)?;
    let mut msg = Message::new(body);
    msg.message_id = message_id;
    msg.correlation_id = correlation_id;
    msg.destination = destination;
    msg.reply_to = reply_to;
    msg.delivery_mode = delivery_mode;
    msg.priority = priority;
    msg.timestamp_ms = timestamp_ms;
    msg.expiration_ms = expiration_ms;
    msg.redelivery_counter = redelivery_counter;
    msg.group_id = group_id;
    msg.group_sequence = group_sequence;
    msg.producer_id = producer_id;
    msg.transaction_id = transaction_id;
    msg.properties = properties;
    Ok(msg)
}

/// Encode a command body (no tag, no command id) in the given mode.
pub fn encode_command(command: &Command, tight: bool) -> Result<Vec<u8>, CodecError> {
    let mut enc = Encoder::new(tight);
    match command {
        Command::WireformatInfo(info) => {
            enc.u32(info.version);
            enc.bool(info.tight_encoding_enabled);
            enc.bool(info.cache_enabled);
            enc.u32(info.cache_size);
            enc.i64(info.max_inactivity_duration_ms);
            enc.i64(info.max_inactivity_duration_initial_delay_ms);
            enc.bool(info.stack_trace_enabled);
            enc.bool(info.message_compression_enabled);
        }
        Command::ConnectionInfo(info) => {
            write_connection_id(&mut enc, &info.connection_id)?;
            enc.opt_str(&info.client_id)?;
            enc.opt_str(&info.username)?;
            enc.bool(info.failover_session_resumed);
        }
        Command::ConnectionRemoveInfo(info) | Command::SessionRemoveInfo(info) | Command::ProducerRemoveInfo(info) => {
            enc.i64(info.last_delivered_sequence_id);
        }
        Command::SessionInfo(info) => write_session_id(&mut enc, &info.session_id)?,
        Command::ProducerInfo(info) => {
            write_producer_id(&mut enc, &info.producer_id)?;
            enc.opt_u32(info.window_size);
        }
        Command::ConsumerInfo(info) => {
            write_consumer_id(&mut enc, &info.consumer_id)?;
            write_destination(&mut enc, &info.destination)?;
            enc.u32(info.prefetch_size);
            enc.bool(info.no_local);
            enc.opt_str(&info.selector)?;
            enc.bool(info.exclusive);
            enc.i8(info.priority);
        }
        Command::ConsumerRemoveInfo(info) => enc.i64(info.last_delivered_sequence_id),
        Command::DestinationInfo(dest) => write_destination(&mut enc, dest)?,
        Command::Message(msg) => write_message(&mut enc, msg)?,
        Command::MessageAck(ack) => {
            write_consumer_id(&mut enc, &ack.consumer_id)?;
            enc.u8(ack_type_tag(ack.ack_type));
            enc.presence(ack.first_message_id.is_some());
            if let Some(id) = &ack.first_message_id {
                write_message_id(&mut enc, id)?;
            }
            write_message_id(&mut enc, &ack.last_message_id)?;
            enc.u32(ack.message_count);
            enc.presence(ack.transaction_id.is_some());
            if let Some(tx) = &ack.transaction_id {
                write_transaction_id(&mut enc, tx)?;
            }
        }
        Command::MessageDispatch(dispatch) => {
            write_consumer_id(&mut enc, &dispatch.consumer_id)?;
            write_message(&mut enc, &dispatch.message)?;
            enc.u32(dispatch.redelivery_count_hint);
        }
        Command::MessagePull(pull) => {
            write_consumer_id(&mut enc, &pull.consumer_id)?;
            enc.i64(pull.timeout_ms);
        }
        Command::TransactionInfo(info) => {
            write_transaction_id(&mut enc, &info.transaction_id)?;
            enc.u8(tx_op_tag(info.operation));
        }
        Command::BrokerInfo | Command::ShutdownInfo | Command::KeepAliveInfo => {}
        Command::ConnectionControl(ctl) => {
            enc.bool(ctl.close);
            enc.bool(ctl.exit);
            enc.bool(ctl.fault_tolerant);
        }
        Command::ConsumerControl(ctl) => {
            enc.presence(ctl.consumer_id.is_some());
            if let Some(id) = &ctl.consumer_id {
                write_consumer_id(&mut enc, id)?;
            }
            enc.bool(ctl.close);
            enc.opt_u32(ctl.prefetch);
        }
        Command::Response(resp) => enc.u32(resp.correlation_id),
        Command::ExceptionResponse(resp) => {
            enc.u32(resp.correlation_id);
            enc.str(&resp.exception_class)?;
            enc.str(&resp.message)?;
        }
    }
    Ok(enc.finish())
}

/// Decode a command body given its tag and encoding mode.
pub fn decode_command(tag: CommandTag, buf: &[u8], tight: bool) -> Result<Command, CodecError> {
    let bitmap_bytes = if tight { nullable_field_count(tag).div_ceil(8) } else { 0 };
    let mut dec = Decoder::new(buf, tight, bitmap_bytes);
    Ok(match tag {
        CommandTag::WireformatInfo => Command::WireformatInfo(WireformatInfo {
            version: dec.u32()?,
            tight_encoding_enabled: dec.bool()?,
            cache_enabled: dec.bool()?,
            cache_size: dec.u32()?,
            max_inactivity_duration_ms: dec.i64()?,
            max_inactivity_duration_initial_delay_ms: dec.i64()?,
            stack_trace_enabled: dec.bool()?,
            message_compression_enabled: dec.bool()?,
        }),
        CommandTag::ConnectionInfo => {
            let connection_id = read_connection_id(&mut dec)?;
            let client_id = dec.opt_str()?;
            let username = dec.opt_str()?;
            let failover_session_resumed = dec.bool()?;
            Command::ConnectionInfo(ConnectionInfo { connection_id, client_id, username, failover_session_resumed })
        }
        CommandTag::ConnectionRemoveInfo => {
            Command::ConnectionRemoveInfo(RemoveInfo { last_delivered_sequence_id: dec.i64()? })
        }
        CommandTag::SessionRemoveInfo => {
            Command::SessionRemoveInfo(RemoveInfo { last_delivered_sequence_id: dec.i64()? })
        }
        CommandTag::ProducerRemoveInfo => {
            Command::ProducerRemoveInfo(RemoveInfo { last_delivered_sequence_id: dec.i64()? })
        }
        CommandTag::SessionInfo => Command::SessionInfo(SessionInfo { session_id: read_session_id(&mut dec)? }),
        CommandTag::ProducerInfo => {
            let producer_id = read_producer_id(&mut dec)?;
            let window_size = dec.opt_u32()?;
            Command::ProducerInfo(ProducerInfo { producer_id, window_size })
        }
        CommandTag::ConsumerInfo => {
            let consumer_id = read_consumer_id(&mut dec)?;
            let destination = read_destination(&mut dec)?;
            let prefetch_size = dec.u32()?;
            let no_local = dec.bool()?;
            let selector = dec.opt_str()?;
            let exclusive = dec.bool()?;
            let priority = dec.i8()?;
            Command::ConsumerInfo(ConsumerInfo {
                consumer_id, destination, prefetch_size, no_local, selector, exclusive, priority,
            })
        }
        CommandTag::ConsumerRemoveInfo => {
            Command::ConsumerRemoveInfo(RemoveInfo { last_delivered_sequence_id: dec.i64()? })
        }
        CommandTag::DestinationInfo => Command::DestinationInfo(read_destination(&mut dec)?),
        CommandTag::Message => Command::Message(read_message(&mut dec)?),
        CommandTag::MessageAck => {
            let consumer_id = read_consumer_id(&mut dec)?;
            let ack_type = ack_type_from_tag(dec.u8()?)?;
            let first_message_id = if dec.presence()? { Some(read_message_id(&mut dec)?) } else { None };
            let last_message_id = read_message_id(&mut dec)?;
            let message_count = dec.u32()?;
            let transaction_id = if dec.presence()? { Some(read_transaction_id(&mut dec)?) } else { None };
            Command::MessageAck(MessageAck { consumer_id, ack_type, first_message_id, last_message_id, message_count, transaction_id })
        }
        CommandTag::MessageDispatch => {
            let consumer_id = read_consumer_id(&mut dec)?;
            let message = read_message(&mut dec)?;
            let redelivery_count_hint = dec.u32()?;
            Command::MessageDispatch(MessageDispatch { consumer_id, message, redelivery_count_hint })
        }
        CommandTag::MessagePull => {
            let consumer_id = read_consumer_id(&mut dec)?;
            let timeout_ms = dec.i64()?;
            Command::MessagePull(MessagePull { consumer_id, timeout_ms })
        }
        CommandTag::TransactionInfo => {
            let transaction_id = read_transaction_id(&mut dec)?;
            let operation = tx_op_from_tag(dec.u8()?)?;
            Command::TransactionInfo(TransactionInfo { transaction_id, operation })
        }
        CommandTag::BrokerInfo => Command::BrokerInfo,
        CommandTag::ConnectionControl => Command::ConnectionControl(ConnectionControl {
            close: dec.bool()?,
            exit: dec.bool()?,
            fault_tolerant: dec.bool()?,
        }),
        CommandTag::ConsumerControl => {
            let consumer_id = if dec.presence()? { Some(read_consumer_id(&mut dec)?) } else { None };
            let close = dec.bool()?;
            let prefetch = dec.opt_u32()?;
            Command::ConsumerControl(ConsumerControl { consumer_id, close, prefetch })
        }
        CommandTag::ShutdownInfo => Command::ShutdownInfo,
        CommandTag::KeepAliveInfo => Command::KeepAliveInfo,
        CommandTag::Response => Command::Response(Response { correlation_id: dec.u32()? }),
        CommandTag::ExceptionResponse => Command::ExceptionResponse(ExceptionResponse {
            correlation_id: dec.u32()?,
            exception_class: dec.str()?,
            message: dec.str()?,
        }),
    })
}

/// Encode a full envelope: 1-byte tag, then the command body.
pub fn encode_envelope(envelope: &Envelope, tight: bool) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    out.push(envelope.command.tag() as u8);
    out.extend_from_slice(&encode_command(&envelope.command, tight)?);
    Ok(out)
}

/// Decode a full envelope body (tag-prefixed) given a command id already
/// read off the frame by the caller (spec §4.1: the command id is carried
/// outside the per-command body, in the fixed envelope header).
pub fn decode_envelope(command_id: u32, buf: &[u8], tight: bool) -> Result<Envelope, CodecError> {
    let tag_byte = *buf.first().ok_or(CodecError::Truncated { expected: 1, actual: 0 })?;
    let tag = tag_from_byte(tag_byte)?;
    let command = decode_command(tag, &buf[1..], tight)?;
    Ok(Envelope { command_id, command })
}

fn tag_from_byte(byte: u8) -> Result<CommandTag, CodecError> {
    Ok(match byte {
        1 => CommandTag::WireformatInfo,
        2 => CommandTag::ConnectionInfo,
        3 => CommandTag::ConnectionRemoveInfo,
        4 => CommandTag::SessionInfo,
        5 => CommandTag::SessionRemoveInfo,
        6 => CommandTag::ProducerInfo,
        7 => CommandTag::ProducerRemoveInfo,
        8 => CommandTag::ConsumerInfo,
        9 => CommandTag::ConsumerRemoveInfo,
        10 => CommandTag::DestinationInfo,
        11 => CommandTag::Message,
        12 => CommandTag::MessageAck,
        13 => CommandTag::MessageDispatch,
        14 => CommandTag::MessagePull,
        15 => CommandTag::TransactionInfo,
        16 => CommandTag::BrokerInfo,
        17 => CommandTag::ConnectionControl,
        18 => CommandTag::ConsumerControl,
        19 => CommandTag::ShutdownInfo,
        20 => CommandTag::KeepAliveInfo,
        21 => CommandTag::Response,
        22 => CommandTag::ExceptionResponse,
        other => return Err(CodecError::UnknownTag(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ids::{CommandIdGenerator, IdCounter};

    fn sample_connection_id() -> ConnectionId { ConnectionId("ID:test-conn-1".to_string()) }

    fn sample_session_id() -> SessionId { SessionId { connection_id: sample_connection_id(), value: 1 } }

    fn sample_producer_id() -> ProducerId { ProducerId { session_id: sample_session_id(), value: 1 } }

    fn round_trip(command: Command, tight: bool) {
        let tag = command.tag();
        let encoded = encode_command(&command, tight).unwrap();
        let decoded = decode_command(tag, &encoded, tight).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn wireformat_info_round_trips_both_modes() {
        let info = Command::WireformatInfo(WireformatInfo {
            version: 12,
            tight_encoding_enabled: true,
            cache_enabled: false,
            cache_size: 1024,
            max_inactivity_duration_ms: 30000,
            max_inactivity_duration_initial_delay_ms: 10000,
            stack_trace_enabled: false,
            message_compression_enabled: false,
        });
        round_trip(info.clone(), true);
        round_trip(info, false);
    }

    #[test]
    fn connection_info_with_all_optionals_present_round_trips() {
        let info = Command::ConnectionInfo(ConnectionInfo {
            connection_id: sample_connection_id(),
            client_id: Some("client-1".into()),
            username: Some("alice".into()),
            failover_session_resumed: true,
        });
        round_trip(info.clone(), true);
        round_trip(info, false);
    }

    #[test]
    fn connection_info_with_all_optionals_absent_round_trips() {
        let info = Command::ConnectionInfo(ConnectionInfo {
            connection_id: sample_connection_id(),
            client_id: None,
            username: None,
            failover_session_resumed: false,
        });
        round_trip(info.clone(), true);
        round_trip(info, false);
    }

    #[test]
    fn message_with_full_header_round_trips_tight_and_loose() {
        let mut msg = Message::text("hello");
        msg.message_id = Some(MessageId { producer_id: sample_producer_id(), value: 1 });
        msg.correlation_id = Some("corr-1".into());
        msg.destination = Some(Destination::parse("queue://orders"));
        msg.group_id = Some("group-a".into());
        msg.producer_id = Some(sample_producer_id());
        msg.transaction_id = Some(TransactionId::Local(LocalTransactionId {
            connection_id: sample_connection_id(),
            value: 9,
        }));
        msg.set_property("k".into(), crate::model::PropertyValue::Int(5)).unwrap();
        let command = Command::Message(msg);
        round_trip(command.clone(), true);
        round_trip(command, false);
    }

    #[test]
    fn message_with_minimal_header_round_trips() {
        let msg = Message::bytes(vec![1, 2, 3]);
        let command = Command::Message(msg);
        round_trip(command.clone(), true);
        round_trip(command, false);
    }

    #[test]
    fn message_dispatch_round_trips_with_embedded_message_presence_bits() {
        let mut msg = Message::text("payload");
        msg.reply_to = Some(Destination::parse("topic://replies"));
        let command = Command::MessageDispatch(MessageDispatch {
            consumer_id: ConsumerId { session_id: sample_session_id(), value: 2 },
            message: msg,
            redelivery_count_hint: 0,
        });
        round_trip(command.clone(), true);
        round_trip(command, false);
    }

    #[test]
    fn message_ack_round_trips_with_and_without_first_message_id() {
        let consumer_id = ConsumerId { session_id: sample_session_id(), value: 1 };
        let ack_with_range = Command::MessageAck(MessageAck {
            consumer_id: consumer_id.clone(),
            ack_type: AckType::Delivered,
            first_message_id: Some(MessageId { producer_id: sample_producer_id(), value: 1 }),
            last_message_id: MessageId { producer_id: sample_producer_id(), value: 5 },
            message_count: 5,
            transaction_id: None,
        });
        round_trip(ack_with_range.clone(), true);
        round_trip(ack_with_range, false);

        let ack_individual = Command::MessageAck(MessageAck {
            consumer_id,
            ack_type: AckType::Individual,
            first_message_id: None,
            last_message_id: MessageId { producer_id: sample_producer_id(), value: 9 },
            message_count: 1,
            transaction_id: Some(TransactionId::Local(LocalTransactionId {
                connection_id: sample_connection_id(),
                value: 3,
            })),
        });
        round_trip(ack_individual.clone(), true);
        round_trip(ack_individual, false);
    }

    #[test]
    fn consumer_control_round_trips_with_all_fields_absent_and_present() {
        let empty = Command::ConsumerControl(ConsumerControl::default());
        round_trip(empty.clone(), true);
        round_trip(empty, false);

        let full = Command::ConsumerControl(ConsumerControl {
            consumer_id: Some(ConsumerId { session_id: sample_session_id(), value: 4 }),
            close: true,
            prefetch: Some(100),
        });
        round_trip(full.clone(), true);
        round_trip(full, false);
    }

    #[test]
    fn xa_transaction_id_round_trips_in_transaction_info() {
        let info = Command::TransactionInfo(TransactionInfo {
            transaction_id: TransactionId::Xa(XaTransactionId {
                format_id: 1,
                global_transaction_id: vec![1, 2, 3],
                branch_qualifier: vec![4, 5],
            }),
            operation: TransactionOperation::Prepare,
        });
        round_trip(info.clone(), true);
        round_trip(info, false);
    }

    #[test]
    fn envelope_round_trips_tag_and_command_id_separately() {
        let envelope = Envelope { command_id: 42, command: Command::KeepAliveInfo };
        let encoded = encode_envelope(&envelope, true).unwrap();
        let decoded = decode_envelope(envelope.command_id, &encoded, true).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn command_id_generator_and_id_counter_stay_independent_of_marshalling() {
        let gen = CommandIdGenerator::new();
        let counter = IdCounter::new();
        assert_eq!(gen.next(), 1);
        assert_eq!(counter.next(), 1);
    }
}
