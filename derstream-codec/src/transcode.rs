//! Byte ⇄ TLV event transcoding
//!
//! [`EventReader`] turns a byte buffer into a stream of TLV events,
//! understanding short, long and indefinite length forms, extended tag
//! numbers, and nesting of constructed values. It is deliberately
//! permissive about length canonicality: a redundant long form is parsed
//! and handed downstream as-is, so enforcement stays with the DER filter.
//!
//! [`EventWriter`] is the mirror, serializing events back to bytes and
//! emitting each length descriptor exactly as given.

use bytes::{BufMut, Bytes, BytesMut};
use derstream_core::{Asn1Error, Asn1Result, TagClass, TlvEvent, TlvHeader, TlvLength};

use crate::pipeline::{Pull, Stage};

/// Streaming TLV event reader over a byte buffer
///
/// Produces one event per pull. Malformed framing (truncated content, a
/// primitive value with indefinite length, an inner value overrunning its
/// enclosing constructed length) fails the stream with a parse error.
pub struct EventReader {
    input: Bytes,
    pos: usize,
    /// Primitive content chunk queued behind its header.
    pending: Option<TlvEvent>,
    /// Open constructed values: `Some(end offset)` for definite lengths,
    /// `None` for indefinite ones awaiting an end-of-contents marker.
    scopes: Vec<Option<usize>>,
    failed: bool,
}

impl EventReader {
    pub fn new(input: Bytes) -> Self {
        Self {
            input,
            pos: 0,
            pending: None,
            scopes: Vec::new(),
            failed: false,
        }
    }

    fn take_byte(&mut self) -> Asn1Result<u8> {
        if self.pos >= self.input.len() {
            return Err(Asn1Error::Parse("unexpected end of input".to_string()));
        }
        let byte = self.input[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Decode the identifier octets at the cursor.
    fn read_tag(&mut self) -> Asn1Result<(TagClass, bool, u32)> {
        let first = self.take_byte()?;
        let class = TagClass::from_bits(first);
        let constructed = first & 0x20 != 0;
        let low = first & 0x1F;
        if low < 31 {
            return Ok((class, constructed, u32::from(low)));
        }
        // Extended form: base-128 continuation octets, high bit set on
        // all but the last.
        let mut number: u32 = 0;
        loop {
            let byte = self.take_byte()?;
            number = number
                .checked_mul(128)
                .and_then(|n| n.checked_add(u32::from(byte & 0x7F)))
                .ok_or_else(|| Asn1Error::Parse("tag number overflow".to_string()))?;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok((class, constructed, number))
    }

    /// Decode the length octets at the cursor, preserving the form on the
    /// wire rather than normalizing it.
    fn read_length(&mut self) -> Asn1Result<TlvLength> {
        let first = self.take_byte()?;
        if first & 0x80 == 0 {
            return Ok(TlvLength::Short(first));
        }
        let octets = first & 0x7F;
        if octets == 0 {
            return Ok(TlvLength::Indefinite);
        }
        if octets > 8 {
            return Err(Asn1Error::Parse(format!(
                "length of {} octets is not supported",
                octets
            )));
        }
        let mut value: u64 = 0;
        for _ in 0..octets {
            value = (value << 8) | u64::from(self.take_byte()?);
        }
        Ok(TlvLength::Long { octets, value })
    }

    /// End offset for `content` bytes starting at the cursor, checked
    /// against the buffer and the enclosing constructed value.
    fn bounded_end(&self, content: u64) -> Asn1Result<usize> {
        let content = usize::try_from(content)
            .map_err(|_| Asn1Error::Parse("content length overflow".to_string()))?;
        let end = self
            .pos
            .checked_add(content)
            .ok_or_else(|| Asn1Error::Parse("content length overflow".to_string()))?;
        if end > self.input.len() {
            return Err(Asn1Error::Parse(format!(
                "content of {} bytes overruns input",
                content
            )));
        }
        if let Some(&Some(scope_end)) = self.scopes.last() {
            if end > scope_end {
                return Err(Asn1Error::Parse(
                    "value overruns enclosing constructed value".to_string(),
                ));
            }
        }
        Ok(end)
    }

    fn next_event(&mut self) -> Asn1Result<Option<TlvEvent>> {
        // Close any definite-length constructed value ending here.
        if let Some(&Some(end)) = self.scopes.last() {
            if self.pos == end {
                self.scopes.pop();
                return Ok(Some(TlvEvent::ConstructedEnd));
            }
            if self.pos > end {
                return Err(Asn1Error::Parse(
                    "value overruns enclosing constructed value".to_string(),
                ));
            }
        }
        if self.pos >= self.input.len() {
            if self.scopes.is_empty() {
                return Ok(None);
            }
            return Err(Asn1Error::Parse(
                "input ended inside a constructed value".to_string(),
            ));
        }
        // An end-of-contents marker closes the innermost indefinite scope.
        if self.input[self.pos] == 0x00 && self.scopes.last() == Some(&None) {
            self.pos += 1;
            if self.take_byte()? != 0x00 {
                return Err(Asn1Error::Parse(
                    "malformed end-of-contents marker".to_string(),
                ));
            }
            self.scopes.pop();
            return Ok(Some(TlvEvent::ConstructedEnd));
        }
        let (class, constructed, number) = self.read_tag()?;
        let length = self.read_length()?;
        let header = TlvHeader::new(class, constructed, number, length);
        if constructed {
            match length.definite() {
                None => self.scopes.push(None),
                Some(content) => {
                    let end = self.bounded_end(content)?;
                    self.scopes.push(Some(end));
                }
            }
        } else {
            let content = length.definite().ok_or_else(|| {
                Asn1Error::Parse("indefinite length on a primitive value".to_string())
            })?;
            let end = self.bounded_end(content)?;
            self.pending = Some(TlvEvent::Primitive(self.input.slice(self.pos..end)));
            self.pos = end;
        }
        Ok(Some(TlvEvent::Header(header)))
    }
}

impl Stage for EventReader {
    type Item = TlvEvent;

    fn pull(&mut self) -> Pull<TlvEvent> {
        if self.failed {
            return Pull::Done;
        }
        if let Some(event) = self.pending.take() {
            return Pull::Item(event);
        }
        match self.next_event() {
            Ok(Some(event)) => Pull::Item(event),
            Ok(None) => Pull::Done,
            Err(err) => {
                self.failed = true;
                Pull::Fail(err)
            }
        }
    }
}

/// TLV event writer accumulating serialized bytes
pub struct EventWriter {
    buffer: BytesMut,
    /// Open constructed values; `true` marks an indefinite length that
    /// needs an end-of-contents marker on close.
    scopes: Vec<bool>,
}

impl EventWriter {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            scopes: Vec::new(),
        }
    }

    /// Serialize one event.
    pub fn write(&mut self, event: &TlvEvent) -> Asn1Result<()> {
        match event {
            TlvEvent::Header(header) => {
                if !header.constructed && header.length == TlvLength::Indefinite {
                    return Err(Asn1Error::Encoding(
                        "indefinite length on a primitive value".to_string(),
                    ));
                }
                write_tag(
                    &mut self.buffer,
                    header.class,
                    header.constructed,
                    header.number,
                );
                write_length(&mut self.buffer, &header.length)?;
                if header.constructed {
                    self.scopes.push(header.length == TlvLength::Indefinite);
                }
                Ok(())
            }
            TlvEvent::Primitive(content) => {
                self.buffer.extend_from_slice(content);
                Ok(())
            }
            TlvEvent::ConstructedEnd => match self.scopes.pop() {
                Some(true) => {
                    self.buffer.put_u8(0x00);
                    self.buffer.put_u8(0x00);
                    Ok(())
                }
                Some(false) => Ok(()),
                None => Err(Asn1Error::Encoding(
                    "constructed end without an open constructed value".to_string(),
                )),
            },
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

impl Default for EventWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_tag(buffer: &mut BytesMut, class: TagClass, constructed: bool, number: u32) {
    let lead = class.to_bits() | if constructed { 0x20 } else { 0x00 };
    if number < 31 {
        buffer.put_u8(lead | number as u8);
        return;
    }
    buffer.put_u8(lead | 0x1F);
    let mut groups = [0u8; 5];
    let mut count = 0;
    let mut rest = number;
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

fn write_length(buffer: &mut BytesMut, length: &TlvLength) -> Asn1Result<()> {
    match *length {
        TlvLength::Indefinite => {
            buffer.put_u8(0x80);
            Ok(())
        }
        TlvLength::Short(len) => {
            if len > 127 {
                return Err(Asn1Error::Encoding(format!(
                    "short form length {} exceeds 127",
                    len
                )));
            }
            buffer.put_u8(len);
            Ok(())
        }
        TlvLength::Long { octets, value } => {
            if octets == 0 {
                return Err(Asn1Error::Encoding(
                    "long form needs at least one length octet".to_string(),
                ));
            }
            let bits = u32::from(octets) * 8;
            if bits < 64 && value >> bits != 0 {
                return Err(Asn1Error::Encoding(format!(
                    "length {} does not fit in {} octets",
                    value, octets
                )));
            }
            buffer.put_u8(0x80 | octets);
            for index in (0..octets).rev() {
                let shift = u32::from(index) * 8;
                let byte = if shift >= 64 { 0 } else { (value >> shift) as u8 };
                buffer.put_u8(byte);
            }
            Ok(())
        }
    }
}

/// Serialized size of the identifier octets for `number`.
pub(crate) fn tag_octets(number: u32) -> usize {
    if number < 31 {
        return 1;
    }
    let mut count = 1;
    let mut rest = number;
    loop {
        count += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    count
}

/// Serialized size of the length octets for `length`.
pub(crate) fn length_octets(length: &TlvLength) -> usize {
    match *length {
        TlvLength::Indefinite => 1,
        TlvLength::Short(_) => 1,
        TlvLength::Long { octets, .. } => 1 + octets as usize,
    }
}
