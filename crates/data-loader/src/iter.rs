//! Iterator adapter over one epoch of batches

use crate::controller::{Advance, IterationController};
use crate::observer::IterationObserver;
use crate::source::BatchSource;
use runtime_core::{Result, StopReason};
use std::iter::FusedIterator;

/// Yields batches until the controller signals a stop or an error occurs
///
/// Borrow it with `by_ref()` (or `&mut`) to read [`stop_reason`](Self::stop_reason)
/// after the loop.
pub struct EpochBatches<'a, S, O> {
    controller: &'a mut IterationController<S, O>,
    stop: Option<StopReason>,
    failed: bool,
}

impl<'a, S: BatchSource, O: IterationObserver> EpochBatches<'a, S, O> {
    pub(crate) fn new(controller: &'a mut IterationController<S, O>) -> Self {
        Self {
            controller,
            stop: None,
            failed: false,
        }
    }

    /// The stop signal that ended iteration, if any
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }
}

impl<S: BatchSource, O: IterationObserver> Iterator for EpochBatches<'_, S, O> {
    type Item = Result<S::Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() || self.failed {
            return None;
        }

        match self.controller.advance() {
            Ok(Advance::Batch(batch)) => Some(Ok(batch)),
            Ok(stop) => {
                self.stop = stop.stop_reason();
                None
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl<S: BatchSource, O: IterationObserver> FusedIterator for EpochBatches<'_, S, O> {}
