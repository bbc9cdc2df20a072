//! Pull-based stream pipeline composition
//!
//! A pipeline is built from *stages* chained end-to-end. Each stage exposes
//! a single `pull` operation returning the next item, end-of-stream, or a
//! terminal error. Demand therefore propagates downstream-to-upstream (a
//! stage only draws from its upstream when it is itself pulled), and a
//! consumer that stops pulling stops all upstream production within the
//! same step.
//!
//! # Error Handling
//!
//! Errors propagate upstream-to-downstream as `Pull::Fail` and are
//! terminal: `Chain` fuses after the first `Done` or `Fail`, so nothing
//! flows past a failure and no spurious end-of-stream can mask it.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use derstream_core::{Asn1Error, Asn1Result};

/// One step of a pull-based stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<T> {
    /// The next item
    Item(T),
    /// Normal end of stream
    Done,
    /// Terminal failure; no further items follow
    Fail(Asn1Error),
}

/// A pull-based stream stage
pub trait Stage {
    type Item;

    /// Pull the next item, end-of-stream, or error.
    fn pull(&mut self) -> Pull<Self::Item>;
}

/// A stream transducer from items of type `I` to items of type `Output`
///
/// A transducer draws from the upstream stage it is handed only as needed
/// to produce its next output, so it composes with any upstream without
/// assuming all input is available upfront.
pub trait Transducer<I> {
    type Output;

    /// Pull the next output, drawing from `upstream` on demand.
    fn pull_from<S: Stage<Item = I>>(&mut self, upstream: &mut S) -> Pull<Self::Output>;
}

/// Composition of an upstream stage with a transducer
///
/// Behaves as if the transducer were driven directly by the upstream's
/// output. Chaining is left-nested, so composing three or more stages in
/// any grouping yields the same observable sequence.
pub struct Chain<S, T> {
    upstream: S,
    transducer: T,
    finished: bool,
}

/// Chain a transducer onto an upstream stage.
pub fn chain<S, T>(upstream: S, transducer: T) -> Chain<S, T>
where
    S: Stage,
    T: Transducer<S::Item>,
{
    Chain {
        upstream,
        transducer,
        finished: false,
    }
}

impl<S, T> Stage for Chain<S, T>
where
    S: Stage,
    T: Transducer<S::Item>,
{
    type Item = T::Output;

    fn pull(&mut self) -> Pull<T::Output> {
        if self.finished {
            return Pull::Done;
        }
        match self.transducer.pull_from(&mut self.upstream) {
            Pull::Item(item) => Pull::Item(item),
            Pull::Done => {
                self.finished = true;
                Pull::Done
            }
            Pull::Fail(err) => {
                self.finished = true;
                Pull::Fail(err)
            }
        }
    }
}

/// Stage over finite, already-materialized input
pub struct SourceStage<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> SourceStage<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

impl<T> Stage for SourceStage<T> {
    type Item = T;

    fn pull(&mut self) -> Pull<T> {
        match self.items.next() {
            Some(item) => Pull::Item(item),
            None => Pull::Done,
        }
    }
}

/// Stage over an incrementally fed queue of chunks
///
/// Chunks may be pushed between pulls; `close` marks the end of input.
/// The driver that feeds the queue is also the one pulling the pipeline,
/// so pulling an open, empty queue is a driver error and fails rather
/// than fabricating an end-of-stream.
pub struct ChunkStage<T> {
    queue: VecDeque<T>,
    closed: bool,
}

impl<T> ChunkStage<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            closed: false,
        }
    }

    /// Feed one more chunk of input.
    pub fn push(&mut self, item: T) {
        self.queue.push_back(item);
    }

    /// Mark the end of input.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl<T> Default for ChunkStage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Stage for ChunkStage<T> {
    type Item = T;

    fn pull(&mut self) -> Pull<T> {
        match self.queue.pop_front() {
            Some(item) => Pull::Item(item),
            None if self.closed => Pull::Done,
            None => Pull::Fail(Asn1Error::Parse(
                "chunk source pulled while awaiting input".to_string(),
            )),
        }
    }
}

/// Drive a stage to completion, collecting every item or the first error.
pub fn run_to_end<S: Stage>(mut stage: S) -> Asn1Result<Vec<S::Item>> {
    let mut items = Vec::new();
    loop {
        match stage.pull() {
            Pull::Item(item) => items.push(item),
            Pull::Done => return Ok(items),
            Pull::Fail(err) => return Err(err),
        }
    }
}

/// Fallible-call boundary around a pipeline run
///
/// Any fault escaping a stage invocation is caught here and normalized
/// into [`Asn1Error::Parse`], so no foreign failure representation leaks
/// past the public entry points.
pub fn run_guarded<T, F>(f: F) -> Asn1Result<T>
where
    F: FnOnce() -> Asn1Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Asn1Error::Parse(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected failure in codec stage".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Passes items through, counting how many were pulled from upstream.
    struct CountingPass {
        pulled: usize,
    }

    impl Transducer<u32> for CountingPass {
        type Output = u32;

        fn pull_from<S: Stage<Item = u32>>(&mut self, upstream: &mut S) -> Pull<u32> {
            let step = upstream.pull();
            if matches!(step, Pull::Item(_)) {
                self.pulled += 1;
            }
            step
        }
    }

    /// Fails on the first item greater than the limit.
    struct FailAbove {
        limit: u32,
    }

    impl Transducer<u32> for FailAbove {
        type Output = u32;

        fn pull_from<S: Stage<Item = u32>>(&mut self, upstream: &mut S) -> Pull<u32> {
            match upstream.pull() {
                Pull::Item(n) if n > self.limit => {
                    Pull::Fail(Asn1Error::Parse(format!("item {} above limit", n)))
                }
                step => step,
            }
        }
    }

    #[test]
    fn test_source_stage_drains_in_order() {
        let collected = run_to_end(SourceStage::new(vec![1u32, 2, 3])).unwrap();
        assert_eq!(collected, vec![1, 2, 3]);
    }

    #[test]
    fn test_chain_passes_items_through() {
        let stage = chain(SourceStage::new(vec![1u32, 2, 3]), CountingPass { pulled: 0 });
        assert_eq!(run_to_end(stage).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_chain_surfaces_upstream_error() {
        let inner = chain(SourceStage::new(vec![1u32, 9, 3]), FailAbove { limit: 5 });
        let outer = chain(inner, CountingPass { pulled: 0 });
        let err = run_to_end(outer).unwrap_err();
        assert!(matches!(err, Asn1Error::Parse(_)));
    }

    #[test]
    fn test_chain_fuses_after_failure() {
        let mut stage = chain(SourceStage::new(vec![9u32, 1]), FailAbove { limit: 5 });
        assert!(matches!(stage.pull(), Pull::Fail(_)));
        // No item after the failure, even though upstream has one left.
        assert_eq!(stage.pull(), Pull::Done);
        assert_eq!(stage.pull(), Pull::Done);
    }

    #[test]
    fn test_demand_propagates_only_on_pull() {
        let mut stage = chain(SourceStage::new(vec![1u32, 2, 3]), CountingPass { pulled: 0 });
        assert_eq!(stage.pull(), Pull::Item(1));
        // Downstream stopped pulling; upstream must not have been driven
        // past the single requested item.
        assert_eq!(stage.transducer.pulled, 1);
    }

    #[test]
    fn test_composition_grouping_is_observably_equal() {
        let nested_left = chain(
            chain(SourceStage::new(vec![1u32, 2, 3]), CountingPass { pulled: 0 }),
            CountingPass { pulled: 0 },
        );
        let flat = chain(SourceStage::new(vec![1u32, 2, 3]), CountingPass { pulled: 0 });
        assert_eq!(run_to_end(nested_left).unwrap(), run_to_end(flat).unwrap());
    }

    #[test]
    fn test_chunk_stage_feeds_incrementally() {
        let mut source = ChunkStage::new();
        source.push(1u32);
        source.push(2);
        assert_eq!(source.pull(), Pull::Item(1));
        source.push(3);
        assert_eq!(source.pull(), Pull::Item(2));
        assert_eq!(source.pull(), Pull::Item(3));
        source.close();
        assert_eq!(source.pull(), Pull::Done);
    }

    #[test]
    fn test_run_guarded_passes_results_through() {
        assert_eq!(run_guarded(|| Ok(7u32)).unwrap(), 7);
        let err = run_guarded::<u32, _>(|| Err(Asn1Error::Parse("bad".into()))).unwrap_err();
        assert_eq!(err, Asn1Error::Parse("bad".into()));
    }

    #[test]
    fn test_run_guarded_normalizes_panics() {
        let err = run_guarded::<u32, _>(|| panic!("stage blew up")).unwrap_err();
        assert_eq!(err, Asn1Error::Parse("stage blew up".into()));
    }
}
