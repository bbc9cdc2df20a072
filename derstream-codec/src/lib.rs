//! DER canonicality filter and codec pipelines for streaming ASN.1
//!
//! This crate assembles the public encode/decode entry points by chaining
//! pull-based pipeline stages: a byte ⇄ TLV event transcoder, a DER
//! canonicality filter over length encodings, and a TLV event ⇄ value
//! codec. Decode pipelines insert the filter between the event source and
//! the value decoder, so the first non-canonical length aborts the run
//! with a descriptive policy error; encode pipelines produce canonical
//! lengths by construction and run unfiltered.
//!
//! Every entry point drives a complete pipeline over a finite input and
//! returns either a fully-validated result or exactly one error; partial
//! results are never returned.

pub mod filter;
pub mod pipeline;
pub mod policy;
pub mod transcode;
pub mod value;

pub use derstream_core::{
    Asn1Error, Asn1Result, Asn1Value, DecoratedValue, TagClass, TlvEvent, TlvHeader, TlvLength,
};
pub use filter::DerFilter;
pub use policy::check_length;
pub use transcode::{EventReader, EventWriter};
pub use value::{ReprDecoder, ValueDecoder, ValueEncoder};

use bytes::Bytes;
use pipeline::{chain, run_guarded, run_to_end, SourceStage};

/// Decode a finite TLV event stream into ASN.1 values.
///
/// Events flow through the DER canonicality filter and then the value
/// decoder; the first non-canonical length or structural error aborts the
/// run.
pub fn decode_events(events: Vec<TlvEvent>) -> Asn1Result<Vec<Asn1Value>> {
    run_guarded(move || {
        let filtered = chain(SourceStage::new(events), DerFilter::new());
        run_to_end(chain(filtered, ValueDecoder::new()))
    })
}

/// Decode a finite TLV event stream, retaining the events each value was
/// parsed from.
pub fn decode_events_decorated(events: Vec<TlvEvent>) -> Asn1Result<Vec<DecoratedValue>> {
    run_guarded(move || {
        let filtered = chain(SourceStage::new(events), DerFilter::new());
        run_to_end(chain(filtered, ReprDecoder::new()))
    })
}

/// Decode a DER byte buffer into ASN.1 values.
pub fn decode_bytes(bytes: &[u8]) -> Asn1Result<Vec<Asn1Value>> {
    log::debug!("decoding {} bytes", bytes.len());
    let input = Bytes::copy_from_slice(bytes);
    run_guarded(move || {
        let filtered = chain(EventReader::new(input), DerFilter::new());
        run_to_end(chain(filtered, ValueDecoder::new()))
    })
}

/// Decode a DER byte buffer, retaining the events each value was parsed
/// from.
pub fn decode_bytes_decorated(bytes: &[u8]) -> Asn1Result<Vec<DecoratedValue>> {
    let input = Bytes::copy_from_slice(bytes);
    run_guarded(move || {
        let filtered = chain(EventReader::new(input), DerFilter::new());
        run_to_end(chain(filtered, ReprDecoder::new()))
    })
}

/// Encode ASN.1 values into a TLV event stream.
///
/// The encoder emits minimal length descriptors, so its output is
/// canonical by construction and is not re-validated.
pub fn encode_events(values: Vec<Asn1Value>) -> Asn1Result<Vec<TlvEvent>> {
    run_guarded(move || run_to_end(chain(SourceStage::new(values), ValueEncoder::new())))
}

/// Encode ASN.1 values into a DER byte buffer.
pub fn encode_bytes(values: Vec<Asn1Value>) -> Asn1Result<Bytes> {
    run_guarded(move || {
        let events = run_to_end(chain(SourceStage::new(values), ValueEncoder::new()))?;
        let mut writer = EventWriter::new();
        for event in &events {
            writer.write(event)?;
        }
        Ok(writer.into_bytes())
    })
}
