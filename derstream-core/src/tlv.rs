//! TLV event model (tag class, length descriptor, header, event)

use bytes::Bytes;

/// ASN.1 tag class
///
/// ASN.1 defines four tag classes:
/// - **Universal**: Standard ASN.1 types (INTEGER, OCTET STRING, etc.)
/// - **Application**: Application-specific types
/// - **Context-specific**: Context-dependent types (used in SEQUENCE/SET)
/// - **Private**: Private/implementation-specific types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagClass {
    /// Universal class (00)
    Universal = 0,
    /// Application class (01)
    Application = 1,
    /// Context-specific class (10)
    ContextSpecific = 2,
    /// Private class (11)
    Private = 3,
}

impl TagClass {
    /// Get tag class from the top two bits of an identifier octet
    pub fn from_bits(byte: u8) -> Self {
        match (byte >> 6) & 0x03 {
            0 => TagClass::Universal,
            1 => TagClass::Application,
            2 => TagClass::ContextSpecific,
            _ => TagClass::Private,
        }
    }

    /// Convert tag class to identifier octet bits (for encoding)
    pub fn to_bits(self) -> u8 {
        (self as u8) << 6
    }
}

/// TLV length descriptor
///
/// A length can be encoded in three forms:
/// - **Indefinite**: length determined by a later end-of-contents marker.
///   Legal in BER, never canonical under DER.
/// - **Short form** (1 byte): lengths 0-127, bit 7 clear.
/// - **Long form**: first byte carries bit 7 set and the octet count in
///   bits 6-0, followed by that many big-endian magnitude octets.
///
/// The long form keeps both the octet count and the magnitude as parsed,
/// rather than a normalized length, so a redundant encoding (for example a
/// two-octet long form holding a magnitude below 256) is still visible to
/// the canonicality checker downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlvLength {
    /// Indefinite length, terminated by an end-of-contents marker
    Indefinite,
    /// Short form: length 0-127 in a single octet
    Short(u8),
    /// Long form: magnitude encoded across `octets` subsequent octets
    Long { octets: u8, value: u64 },
}

impl TlvLength {
    /// Build the minimal (canonical) definite-length descriptor for `len`.
    pub fn of(len: usize) -> Self {
        if len < 128 {
            TlvLength::Short(len as u8)
        } else {
            let value = len as u64;
            let octets = ((64 - value.leading_zeros()).div_ceil(8)) as u8;
            TlvLength::Long { octets, value }
        }
    }

    /// Get the content length in bytes, if definite.
    pub fn definite(&self) -> Option<u64> {
        match *self {
            TlvLength::Indefinite => None,
            TlvLength::Short(len) => Some(len as u64),
            TlvLength::Long { value, .. } => Some(value),
        }
    }
}

/// TLV header: identifier octets plus length descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvHeader {
    /// Tag class
    pub class: TagClass,
    /// Whether the value is constructed (contains nested TLVs)
    pub constructed: bool,
    /// Tag number
    pub number: u32,
    /// Length descriptor as it appeared on the wire
    pub length: TlvLength,
}

impl TlvHeader {
    pub fn new(class: TagClass, constructed: bool, number: u32, length: TlvLength) -> Self {
        Self {
            class,
            constructed,
            number,
            length,
        }
    }

    /// Universal-class header, the common case in tests and fixtures.
    pub fn universal(constructed: bool, number: u32, length: TlvLength) -> Self {
        Self::new(TagClass::Universal, constructed, number, length)
    }
}

/// One unit of the TLV event stream
///
/// A primitive value appears as a `Header` followed by one `Primitive`
/// chunk; a constructed value as a `Header`, the events of its children,
/// and a closing `ConstructedEnd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvEvent {
    /// Start of a value: identifier and length octets
    Header(TlvHeader),
    /// Content octets of a primitive value
    Primitive(Bytes),
    /// End of a constructed value
    ConstructedEnd,
}
