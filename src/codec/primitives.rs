//! The primitive map codec (spec §4.1): a length-prefixed count of entries,
//! each a name and a value tagged by a single byte. Underlies typed message
//! payloads and many command fields.

use super::string::{decode_modified_utf8, encode_modified_utf8, read_str16, write_str16};
use crate::error::CodecError;
use crate::model::message::PropertyValue;
use std::collections::BTreeMap;

#[repr(u8)]
enum ValueTag {
    Boolean = 1,
    Byte = 2,
    Char = 3,
    Short = 4,
    Int = 5,
    Long = 6,
    Float = 7,
    Double = 8,
    String = 9,
    ByteArray = 10,
    Map = 11,
    List = 12,
    BigString = 13,
    Null = 14,
}

fn tag_from_byte(byte: u8) -> Result<ValueTag, CodecError> {
    Ok(match byte {
        1 => ValueTag::Boolean,
        2 => ValueTag::Byte,
        3 => ValueTag::Char,
        4 => ValueTag::Short,
        5 => ValueTag::Int,
        6 => ValueTag::Long,
        7 => ValueTag::Float,
        8 => ValueTag::Double,
        9 => ValueTag::String,
        10 => ValueTag::ByteArray,
        11 => ValueTag::Map,
        12 => ValueTag::List,
        13 => ValueTag::BigString,
        14 => ValueTag::Null,
        other => return Err(CodecError::UnknownValueTag(other)),
    })
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], CodecError> {
    let end = pos.checked_add(len).ok_or(CodecError::Truncated { expected: len, actual: 0 })?;
    let slice = buf
        .get(*pos..end)
        .ok_or(CodecError::Truncated { expected: end, actual: buf.len() })?;
    *pos = end;
    Ok(slice)
}

fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8, CodecError> { Ok(take(buf, pos, 1)?[0]) }

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, CodecError> {
    let b = take(buf, pos, 4)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn write_value(out: &mut Vec<u8>, value: &PropertyValue) -> Result<(), CodecError> {
    match value {
        PropertyValue::Boolean(v) => {
            out.push(ValueTag::Boolean as u8);
            out.push(u8::from(*v));
        }
        PropertyValue::Byte(v) => {
            out.push(ValueTag::Byte as u8);
            out.push(*v as u8);
        }
        PropertyValue::Char(v) => {
            out.push(ValueTag::Char as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::Short(v) => {
            out.push(ValueTag::Short as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::Int(v) => {
            out.push(ValueTag::Int as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::Long(v) => {
            out.push(ValueTag::Long as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::Float(v) => {
            out.push(ValueTag::Float as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::Double(v) => {
            out.push(ValueTag::Double as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::String(v) => {
            let encoded = encode_modified_utf8(v);
            if encoded.len() > u16::MAX as usize {
                out.push(ValueTag::BigString as u8);
                out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
                out.extend_from_slice(&encoded);
            } else {
                out.push(ValueTag::String as u8);
                write_str16(out, v)?;
            }
        }
        PropertyValue::ByteArray(bytes) => {
            out.push(ValueTag::ByteArray as u8);
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        PropertyValue::Map(map) => {
            out.push(ValueTag::Map as u8);
            write_map(out, map)?;
        }
        PropertyValue::List(list) => {
            out.push(ValueTag::List as u8);
            out.extend_from_slice(&(list.len() as u32).to_be_bytes());
            for item in list {
                write_value(out, item)?;
            }
        }
        PropertyValue::Null => out.push(ValueTag::Null as u8),
    }
    Ok(())
}

pub fn read_value(buf: &[u8], pos: &mut usize) -> Result<PropertyValue, CodecError> {
    let tag = tag_from_byte(read_u8(buf, pos)?)?;
    Ok(match tag {
        ValueTag::Boolean => PropertyValue::Boolean(read_u8(buf, pos)? != 0),
        ValueTag::Byte => PropertyValue::Byte(read_u8(buf, pos)? as i8),
        ValueTag::Char => {
            let b = take(buf, pos, 2)?;
            PropertyValue::Char(u16::from_be_bytes([b[0], b[1]]))
        }
        ValueTag::Short => {
            let b = take(buf, pos, 2)?;
            PropertyValue::Short(i16::from_be_bytes([b[0], b[1]]))
        }
        ValueTag::Int => PropertyValue::Int(read_u32(buf, pos)? as i32),
        ValueTag::Long => {
            let b = take(buf, pos, 8)?;
            PropertyValue::Long(i64::from_be_bytes(b.try_into().expect("8 bytes")))
        }
        ValueTag::Float => {
            let b = take(buf, pos, 4)?;
            PropertyValue::Float(f32::from_be_bytes(b.try_into().expect("4 bytes")))
        }
        ValueTag::Double => {
            let b = take(buf, pos, 8)?;
            PropertyValue::Double(f64::from_be_bytes(b.try_into().expect("8 bytes")))
        }
        ValueTag::String => PropertyValue::String(read_str16(buf, pos)?),
        ValueTag::BigString => {
            let len = read_u32(buf, pos)? as usize;
            let bytes = take(buf, pos, len)?;
            PropertyValue::String(decode_modified_utf8(bytes)?)
        }
        ValueTag::ByteArray => {
            let len = read_u32(buf, pos)? as usize;
            PropertyValue::ByteArray(take(buf, pos, len)?.to_vec())
        }
        ValueTag::Map => PropertyValue::Map(read_map(buf, pos)?),
        ValueTag::List => {
            let count = read_u32(buf, pos)? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_value(buf, pos)?);
            }
            PropertyValue::List(items)
        }
        ValueTag::Null => PropertyValue::Null,
    })
}

pub fn write_map(out: &mut Vec<u8>, map: &BTreeMap<String, PropertyValue>) -> Result<(), CodecError> {
    out.extend_from_slice(&(map.len() as u32).to_be_bytes());
    for (key, value) in map {
        write_str16(out, key)?;
        write_value(out, value)?;
    }
    Ok(())
}

pub fn read_map(buf: &[u8], pos: &mut usize) -> Result<BTreeMap<String, PropertyValue>, CodecError> {
    let count = read_u32(buf, pos)? as usize;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = read_str16(buf, pos)?;
        let value = read_value(buf, pos)?;
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: PropertyValue) {
        let mut buf = Vec::new();
        write_value(&mut buf, &value).unwrap();
        let mut pos = 0;
        assert_eq!(read_value(&buf, &mut pos).unwrap(), value);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn round_trips_every_scalar_tag() {
        round_trip(PropertyValue::Boolean(true));
        round_trip(PropertyValue::Byte(-5));
        round_trip(PropertyValue::Char(0x41));
        round_trip(PropertyValue::Short(-1000));
        round_trip(PropertyValue::Int(-70000));
        round_trip(PropertyValue::Long(i64::MIN));
        round_trip(PropertyValue::Float(1.5));
        round_trip(PropertyValue::Double(-2.25));
        round_trip(PropertyValue::String("hi".into()));
        round_trip(PropertyValue::ByteArray(vec![1, 2, 3]));
        round_trip(PropertyValue::Null);
    }

    #[test]
    fn round_trips_zero_length_byte_array_and_empty_string() {
        round_trip(PropertyValue::ByteArray(Vec::new()));
        round_trip(PropertyValue::String(String::new()));
    }

    #[test]
    fn round_trips_nested_map_and_list() {
        let mut nested = BTreeMap::new();
        nested.insert("inner".to_string(), PropertyValue::Int(42));
        round_trip(PropertyValue::Map(nested));
        round_trip(PropertyValue::List(vec![
            PropertyValue::Int(1),
            PropertyValue::String("two".into()),
            PropertyValue::List(vec![PropertyValue::Null]),
        ]));
    }

    #[test]
    fn unknown_tag_is_a_fatal_codec_error() {
        let buf = [0xFFu8];
        let mut pos = 0;
        assert!(matches!(read_value(&buf, &mut pos), Err(CodecError::UnknownValueTag(0xFF))));
    }

    #[test]
    fn full_map_round_trips() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), PropertyValue::Int(1));
        map.insert("b".to_string(), PropertyValue::String("x".into()));
        let mut buf = Vec::new();
        write_map(&mut buf, &map).unwrap();
        let mut pos = 0;
        assert_eq!(read_map(&buf, &mut pos).unwrap(), map);
    }
}
