//! Core types for the derstream streaming ASN.1 codec
//!
//! This crate provides the types shared by every pipeline stage: the error
//! type, the TLV event model (tag class, length descriptor, header, event),
//! and the decoded ASN.1 value tree.

pub mod error;
pub mod tlv;
pub mod value;

pub use error::{Asn1Error, Asn1Result};
pub use tlv::{TagClass, TlvEvent, TlvHeader, TlvLength};
pub use value::{Asn1Value, DecoratedValue};
