//! Decoded ASN.1 value tree

use bytes::Bytes;

use crate::tlv::{TagClass, TlvEvent};

/// A decoded ASN.1 value
///
/// Universal primitives the codec understands are decoded into typed
/// variants; any other primitive is kept as `Unknown` with its raw content,
/// and any non-SEQUENCE/SET constructed value as `Container`, so that
/// re-encoding reproduces the original stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asn1Value {
    Boolean(bool),
    Integer(i64),
    OctetString(Bytes),
    Null,
    ObjectIdentifier(Vec<u32>),
    Sequence(Vec<Asn1Value>),
    Set(Vec<Asn1Value>),
    /// Constructed value other than SEQUENCE/SET
    Container {
        class: TagClass,
        number: u32,
        items: Vec<Asn1Value>,
    },
    /// Primitive value with a tag the codec does not interpret
    Unknown {
        class: TagClass,
        number: u32,
        content: Bytes,
    },
}

/// A decoded value paired with the TLV events it was parsed from
///
/// The events carry the raw content octets, so the exact byte span the
/// value occupied can be reproduced by re-serializing them. Used for
/// round-trip verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedValue {
    pub value: Asn1Value,
    pub events: Vec<TlvEvent>,
}
