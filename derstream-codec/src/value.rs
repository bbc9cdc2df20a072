//! TLV event ⇄ ASN.1 value codec
//!
//! [`ValueDecoder`] consumes exactly the events belonging to one complete
//! value per pull, recursing into constructed values until their closing
//! marker. [`ReprDecoder`] is the decorated variant, pairing each decoded
//! value with the events it was parsed from. [`ValueEncoder`] is the
//! mirror, expanding each value into its canonical event sequence.
//!
//! # Primitive Content
//!
//! The universal primitives the codec interprets are BOOLEAN, INTEGER,
//! OCTET STRING, NULL and OBJECT IDENTIFIER. Content codecs follow ITU-T
//! X.690: single-octet booleans (`0x00`/`0xFF` under DER), minimal
//! big-endian two's complement integers, and base-128 object identifier
//! subidentifiers with the first two components packed into one.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use derstream_core::{
    Asn1Error, Asn1Result, Asn1Value, DecoratedValue, TagClass, TlvEvent, TlvHeader, TlvLength,
};

use crate::pipeline::{Pull, Stage, Transducer};
use crate::transcode::{length_octets, tag_octets};

/// Decoder from TLV events to ASN.1 values, one value per pull
pub struct ValueDecoder;

impl ValueDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ValueDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transducer<TlvEvent> for ValueDecoder {
    type Output = Asn1Value;

    fn pull_from<S: Stage<Item = TlvEvent>>(&mut self, upstream: &mut S) -> Pull<Asn1Value> {
        match upstream.pull() {
            Pull::Done => Pull::Done,
            Pull::Fail(err) => Pull::Fail(err),
            Pull::Item(TlvEvent::Header(header)) => match decode_value(&header, upstream) {
                Ok(value) => Pull::Item(value),
                Err(err) => Pull::Fail(err),
            },
            Pull::Item(other) => Pull::Fail(Asn1Error::Parse(format!(
                "expected a header event, got {:?}",
                other
            ))),
        }
    }
}

/// Decorated decoder, retaining the events each value was parsed from
pub struct ReprDecoder;

impl ReprDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReprDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transducer<TlvEvent> for ReprDecoder {
    type Output = DecoratedValue;

    fn pull_from<S: Stage<Item = TlvEvent>>(&mut self, upstream: &mut S) -> Pull<DecoratedValue> {
        match upstream.pull() {
            Pull::Done => Pull::Done,
            Pull::Fail(err) => Pull::Fail(err),
            Pull::Item(TlvEvent::Header(header)) => {
                let mut events = vec![TlvEvent::Header(header)];
                let mut recorder = Recorder {
                    upstream,
                    events: &mut events,
                };
                match decode_value(&header, &mut recorder) {
                    Ok(value) => Pull::Item(DecoratedValue { value, events }),
                    Err(err) => Pull::Fail(err),
                }
            }
            Pull::Item(other) => Pull::Fail(Asn1Error::Parse(format!(
                "expected a header event, got {:?}",
                other
            ))),
        }
    }
}

/// Pass-through stage recording every pulled event.
struct Recorder<'a, S> {
    upstream: &'a mut S,
    events: &'a mut Vec<TlvEvent>,
}

impl<S: Stage<Item = TlvEvent>> Stage for Recorder<'_, S> {
    type Item = TlvEvent;

    fn pull(&mut self) -> Pull<TlvEvent> {
        let step = self.upstream.pull();
        if let Pull::Item(event) = &step {
            self.events.push(event.clone());
        }
        step
    }
}

/// Decode the value whose header was just pulled, consuming exactly its
/// remaining events from `upstream`.
fn decode_value<S: Stage<Item = TlvEvent>>(
    header: &TlvHeader,
    upstream: &mut S,
) -> Asn1Result<Asn1Value> {
    if header.constructed {
        let mut items = Vec::new();
        loop {
            match upstream.pull() {
                Pull::Item(TlvEvent::Header(child)) => items.push(decode_value(&child, upstream)?),
                Pull::Item(TlvEvent::ConstructedEnd) => break,
                Pull::Item(TlvEvent::Primitive(_)) => {
                    return Err(Asn1Error::Parse(
                        "primitive content without a header".to_string(),
                    ));
                }
                Pull::Done => {
                    return Err(Asn1Error::Parse(
                        "stream ended inside a constructed value".to_string(),
                    ));
                }
                Pull::Fail(err) => return Err(err),
            }
        }
        Ok(match (header.class, header.number) {
            (TagClass::Universal, 16) => Asn1Value::Sequence(items),
            (TagClass::Universal, 17) => Asn1Value::Set(items),
            (class, number) => Asn1Value::Container {
                class,
                number,
                items,
            },
        })
    } else {
        let content = match upstream.pull() {
            Pull::Item(TlvEvent::Primitive(content)) => content,
            Pull::Item(other) => {
                return Err(Asn1Error::Parse(format!(
                    "expected primitive content, got {:?}",
                    other
                )));
            }
            Pull::Done => {
                return Err(Asn1Error::Parse(
                    "stream ended before primitive content".to_string(),
                ));
            }
            Pull::Fail(err) => return Err(err),
        };
        decode_primitive(header, content)
    }
}

fn decode_primitive(header: &TlvHeader, content: Bytes) -> Asn1Result<Asn1Value> {
    if header.class != TagClass::Universal {
        return Ok(Asn1Value::Unknown {
            class: header.class,
            number: header.number,
            content,
        });
    }
    match header.number {
        1 => decode_boolean(&content),
        2 => Ok(Asn1Value::Integer(decode_integer(&content)?)),
        4 => Ok(Asn1Value::OctetString(content)),
        5 => {
            if content.is_empty() {
                Ok(Asn1Value::Null)
            } else {
                Err(Asn1Error::Parse("null value with content".to_string()))
            }
        }
        6 => Ok(Asn1Value::ObjectIdentifier(decode_oid(&content)?)),
        number => Ok(Asn1Value::Unknown {
            class: TagClass::Universal,
            number,
            content,
        }),
    }
}

fn decode_boolean(content: &[u8]) -> Asn1Result<Asn1Value> {
    match content {
        [0x00] => Ok(Asn1Value::Boolean(false)),
        [0xFF] => Ok(Asn1Value::Boolean(true)),
        [_] => Err(Asn1Error::Parse(
            "boolean content must be 0x00 or 0xFF".to_string(),
        )),
        _ => Err(Asn1Error::Parse(
            "boolean content must be a single octet".to_string(),
        )),
    }
}

/// Big-endian two's complement to `i64`, sign-extending from the first
/// content octet.
fn decode_integer(content: &[u8]) -> Asn1Result<i64> {
    if content.is_empty() {
        return Err(Asn1Error::Parse("empty integer content".to_string()));
    }
    if content.len() > 8 {
        return Err(Asn1Error::Parse(format!(
            "integer of {} octets is not supported",
            content.len()
        )));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &byte in content {
        value = (value << 8) | i64::from(byte);
    }
    Ok(value)
}

fn decode_oid(content: &[u8]) -> Asn1Result<Vec<u32>> {
    if content.is_empty() {
        return Err(Asn1Error::Parse(
            "empty object identifier content".to_string(),
        ));
    }
    let mut subidentifiers = Vec::new();
    let mut subidentifier: u64 = 0;
    let mut in_progress = false;
    for &byte in content {
        in_progress = true;
        subidentifier = subidentifier
            .checked_mul(128)
            .and_then(|n| n.checked_add(u64::from(byte & 0x7F)))
            .ok_or_else(|| {
                Asn1Error::Parse("object identifier component overflow".to_string())
            })?;
        if byte & 0x80 == 0 {
            subidentifiers.push(subidentifier);
            subidentifier = 0;
            in_progress = false;
        }
    }
    if in_progress {
        return Err(Asn1Error::Parse("truncated object identifier".to_string()));
    }
    // The first subidentifier packs the first two components as 40*X + Y.
    let first = subidentifiers[0];
    let mut components = Vec::with_capacity(subidentifiers.len() + 1);
    if first < 40 {
        components.push(0);
        components.push(first as u32);
    } else if first < 80 {
        components.push(1);
        components.push((first - 40) as u32);
    } else {
        components.push(2);
        components.push(
            u32::try_from(first - 80).map_err(|_| {
                Asn1Error::Parse("object identifier component overflow".to_string())
            })?,
        );
    }
    for &subidentifier in &subidentifiers[1..] {
        components.push(u32::try_from(subidentifier).map_err(|_| {
            Asn1Error::Parse("object identifier component overflow".to_string())
        })?);
    }
    Ok(components)
}

/// Encoder from ASN.1 values to TLV events, one event per pull
///
/// A pulled value is expanded into its full event sequence with minimal
/// (canonical) length descriptors; subsequent pulls drain the expansion
/// before the next value is requested from upstream.
pub struct ValueEncoder {
    queue: VecDeque<TlvEvent>,
}

impl ValueEncoder {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl Default for ValueEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transducer<Asn1Value> for ValueEncoder {
    type Output = TlvEvent;

    fn pull_from<S: Stage<Item = Asn1Value>>(&mut self, upstream: &mut S) -> Pull<TlvEvent> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Pull::Item(event);
            }
            match upstream.pull() {
                Pull::Item(value) => {
                    let mut events = Vec::new();
                    if let Err(err) = encode_value(&value, &mut events) {
                        return Pull::Fail(err);
                    }
                    self.queue.extend(events);
                }
                Pull::Done => return Pull::Done,
                Pull::Fail(err) => return Pull::Fail(err),
            }
        }
    }
}

/// Append the event sequence for `value`, returning its serialized size
/// in bytes (needed for enclosing definite lengths).
fn encode_value(value: &Asn1Value, out: &mut Vec<TlvEvent>) -> Asn1Result<usize> {
    match value {
        Asn1Value::Boolean(flag) => {
            let content = Bytes::from_static(if *flag { &[0xFF] } else { &[0x00] });
            Ok(primitive_events(out, TagClass::Universal, 1, content))
        }
        Asn1Value::Integer(value) => Ok(primitive_events(
            out,
            TagClass::Universal,
            2,
            integer_content(*value),
        )),
        Asn1Value::OctetString(content) => Ok(primitive_events(
            out,
            TagClass::Universal,
            4,
            content.clone(),
        )),
        Asn1Value::Null => Ok(primitive_events(out, TagClass::Universal, 5, Bytes::new())),
        Asn1Value::ObjectIdentifier(components) => Ok(primitive_events(
            out,
            TagClass::Universal,
            6,
            oid_content(components)?,
        )),
        Asn1Value::Sequence(items) => constructed_events(out, TagClass::Universal, 16, items),
        Asn1Value::Set(items) => constructed_events(out, TagClass::Universal, 17, items),
        Asn1Value::Container {
            class,
            number,
            items,
        } => constructed_events(out, *class, *number, items),
        Asn1Value::Unknown {
            class,
            number,
            content,
        } => Ok(primitive_events(out, *class, *number, content.clone())),
    }
}

fn primitive_events(out: &mut Vec<TlvEvent>, class: TagClass, number: u32, content: Bytes) -> usize {
    let length = TlvLength::of(content.len());
    let size = tag_octets(number) + length_octets(&length) + content.len();
    out.push(TlvEvent::Header(TlvHeader::new(class, false, number, length)));
    out.push(TlvEvent::Primitive(content));
    size
}

fn constructed_events(
    out: &mut Vec<TlvEvent>,
    class: TagClass,
    number: u32,
    items: &[Asn1Value],
) -> Asn1Result<usize> {
    let mut inner = Vec::new();
    let mut content_len = 0;
    for item in items {
        content_len += encode_value(item, &mut inner)?;
    }
    let length = TlvLength::of(content_len);
    out.push(TlvEvent::Header(TlvHeader::new(class, true, number, length)));
    out.append(&mut inner);
    out.push(TlvEvent::ConstructedEnd);
    Ok(tag_octets(number) + length_octets(&length) + content_len)
}

/// Minimal big-endian two's complement content for `value`.
fn integer_content(value: i64) -> Bytes {
    let raw = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let lead = raw[start];
        let next = raw[start + 1];
        let redundant = (lead == 0x00 && next & 0x80 == 0) || (lead == 0xFF && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    Bytes::copy_from_slice(&raw[start..])
}

fn oid_content(components: &[u32]) -> Asn1Result<Bytes> {
    if components.len() < 2 {
        return Err(Asn1Error::Encoding(
            "object identifier needs at least two components".to_string(),
        ));
    }
    if components[0] > 2 || (components[0] < 2 && components[1] >= 40) {
        return Err(Asn1Error::Encoding(
            "invalid object identifier prefix".to_string(),
        ));
    }
    let mut buffer = BytesMut::new();
    let first = 40 * u64::from(components[0]) + u64::from(components[1]);
    put_base128(&mut buffer, first);
    for &component in &components[2..] {
        put_base128(&mut buffer, u64::from(component));
    }
    Ok(buffer.freeze())
}

fn put_base128(buffer: &mut BytesMut, value: u64) {
    let mut groups = [0u8; 10];
    let mut count = 0;
    let mut rest = value;
    loop {
        groups[count] = (rest & 0x7F) as u8;
        count += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for index in (0..count).rev() {
        let group = groups[index];
        buffer.put_u8(if index == 0 { group } else { group | 0x80 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{chain, run_to_end, SourceStage};

    fn decode(events: Vec<TlvEvent>) -> Asn1Result<Vec<Asn1Value>> {
        run_to_end(chain(SourceStage::new(events), ValueDecoder::new()))
    }

    fn encode(values: Vec<Asn1Value>) -> Asn1Result<Vec<TlvEvent>> {
        run_to_end(chain(SourceStage::new(values), ValueEncoder::new()))
    }

    #[test]
    fn test_decode_integer_value() {
        let events = vec![
            TlvEvent::Header(TlvHeader::universal(false, 2, TlvLength::Short(1))),
            TlvEvent::Primitive(Bytes::from_static(&[0x2A])),
        ];
        assert_eq!(decode(events).unwrap(), vec![Asn1Value::Integer(42)]);
    }

    #[test]
    fn test_decode_rejects_bad_boolean() {
        let events = vec![
            TlvEvent::Header(TlvHeader::universal(false, 1, TlvLength::Short(1))),
            TlvEvent::Primitive(Bytes::from_static(&[0x01])),
        ];
        let err = decode(events).unwrap_err();
        assert_eq!(
            err,
            Asn1Error::Parse("boolean content must be 0x00 or 0xFF".to_string())
        );
    }

    #[test]
    fn test_decode_truncated_constructed_fails() {
        let events = vec![TlvEvent::Header(TlvHeader::universal(
            true,
            16,
            TlvLength::Short(3),
        ))];
        let err = decode(events).unwrap_err();
        assert_eq!(
            err,
            Asn1Error::Parse("stream ended inside a constructed value".to_string())
        );
    }

    #[test]
    fn test_integer_content_is_minimal() {
        assert_eq!(integer_content(0), Bytes::from_static(&[0x00]));
        assert_eq!(integer_content(127), Bytes::from_static(&[0x7F]));
        assert_eq!(integer_content(128), Bytes::from_static(&[0x00, 0x80]));
        assert_eq!(integer_content(-1), Bytes::from_static(&[0xFF]));
        assert_eq!(integer_content(-129), Bytes::from_static(&[0xFF, 0x7F]));
    }

    #[test]
    fn test_integer_round_trip() {
        for value in [0i64, 1, -1, 127, 128, -128, -129, 65536, i64::MAX, i64::MIN] {
            let content = integer_content(value);
            assert_eq!(decode_integer(&content).unwrap(), value);
        }
    }

    #[test]
    fn test_oid_round_trip() {
        for oid in [
            vec![1u32, 2, 840, 113549],
            vec![0, 39],
            vec![2, 999, 3],
            vec![2, 5, 4, 3],
        ] {
            let content = oid_content(&oid).unwrap();
            assert_eq!(decode_oid(&content).unwrap(), oid);
        }
    }

    #[test]
    fn test_oid_rejects_bad_prefix() {
        assert!(oid_content(&[1]).is_err());
        assert!(oid_content(&[3, 1]).is_err());
        assert!(oid_content(&[1, 40]).is_err());
    }

    #[test]
    fn test_encode_produces_canonical_lengths() {
        let events = encode(vec![Asn1Value::OctetString(Bytes::from(vec![0u8; 200]))]).unwrap();
        assert_eq!(
            events[0],
            TlvEvent::Header(TlvHeader::universal(
                false,
                4,
                TlvLength::Long {
                    octets: 1,
                    value: 200
                }
            ))
        );
    }

    #[test]
    fn test_value_round_trip_through_events() {
        let values = vec![
            Asn1Value::Sequence(vec![
                Asn1Value::Integer(-300),
                Asn1Value::Boolean(true),
                Asn1Value::Set(vec![Asn1Value::Null]),
                Asn1Value::ObjectIdentifier(vec![1, 2, 840, 113549]),
            ]),
            Asn1Value::Container {
                class: TagClass::ContextSpecific,
                number: 3,
                items: vec![Asn1Value::OctetString(Bytes::from_static(b"payload"))],
            },
            Asn1Value::Unknown {
                class: TagClass::Application,
                number: 7,
                content: Bytes::from_static(&[0xDE, 0xAD]),
            },
        ];
        let events = encode(values.clone()).unwrap();
        assert_eq!(decode(events).unwrap(), values);
    }

    #[test]
    fn test_repr_decoder_retains_events() {
        let events = vec![
            TlvEvent::Header(TlvHeader::universal(true, 16, TlvLength::Short(3))),
            TlvEvent::Header(TlvHeader::universal(false, 2, TlvLength::Short(1))),
            TlvEvent::Primitive(Bytes::from_static(&[0x05])),
            TlvEvent::ConstructedEnd,
        ];
        let decorated = run_to_end(chain(SourceStage::new(events.clone()), ReprDecoder::new()))
            .unwrap();
        assert_eq!(decorated.len(), 1);
        assert_eq!(
            decorated[0].value,
            Asn1Value::Sequence(vec![Asn1Value::Integer(5)])
        );
        assert_eq!(decorated[0].events, events);
    }
}
