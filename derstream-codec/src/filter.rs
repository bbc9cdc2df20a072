//! DER canonicality filter stage
//!
//! A structurally transparent transducer over TLV events: every event is
//! passed through unchanged, except that each header's length descriptor
//! is checked against the DER policy and the first violation terminates
//! the stream with that error. The filter holds no buffer beyond the event
//! in flight; its only state is whether it has already failed.

use derstream_core::TlvEvent;

use crate::pipeline::{Pull, Stage, Transducer};
use crate::policy::check_length;

/// Canonicality filter over a TLV event stream
pub struct DerFilter {
    failed: bool,
}

impl DerFilter {
    pub fn new() -> Self {
        Self { failed: false }
    }
}

impl Default for DerFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Transducer<TlvEvent> for DerFilter {
    type Output = TlvEvent;

    fn pull_from<S: Stage<Item = TlvEvent>>(&mut self, upstream: &mut S) -> Pull<TlvEvent> {
        if self.failed {
            return Pull::Done;
        }
        match upstream.pull() {
            Pull::Item(TlvEvent::Header(header)) => match check_length(&header.length) {
                Ok(()) => Pull::Item(TlvEvent::Header(header)),
                Err(err) => {
                    log::debug!("rejecting header {:?}: {}", header, err);
                    self.failed = true;
                    Pull::Fail(err)
                }
            },
            Pull::Item(event) => Pull::Item(event),
            Pull::Done => Pull::Done,
            Pull::Fail(err) => {
                self.failed = true;
                Pull::Fail(err)
            }
        }
    }
}
