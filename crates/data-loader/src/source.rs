//! Batch source capability
//!
//! Any backend that produces a finite, restartable sequence of batches per
//! epoch can be driven by the iteration controller.

use runtime_core::{Epoch, Step};

/// A restartable producer of batches
///
/// Implementations own their traversal cursor. `start` begins a fresh pass over
/// the data for the given epoch, skipping the first `start_step` batches so a
/// resumed epoch picks up where the checkpoint left it. `next_batch` returns
/// `Ok(None)` once that pass is exhausted. Fetching may block (e.g. waiting on a
/// background prefetcher).
pub trait BatchSource {
    /// Item yielded per step
    type Batch;

    /// Error raised while starting, fetching or resetting
    type Error: std::error::Error + Send + Sync + 'static;

    /// Total number of samples in one epoch, or None if the source cannot report it
    fn total_items(&self) -> Option<u64>;

    /// Samples per batch, if the source batches on its own
    ///
    /// The controller derives the epoch length from its own batch size, so a
    /// source that reports one must agree with it.
    fn batch_size(&self) -> Option<u64> {
        None
    }

    /// Begin a fresh traversal for `epoch`, positioned after `start_step` batches
    fn start(&mut self, epoch: Epoch, start_step: Step) -> Result<(), Self::Error>;

    /// Fetch the next batch, `Ok(None)` when the traversal is exhausted
    fn next_batch(&mut self) -> Result<Option<Self::Batch>, Self::Error>;

    /// Whether `reset` is supported
    fn can_reset(&self) -> bool {
        false
    }

    /// Rewind the current traversal. Only called when `can_reset` returns true.
    fn reset(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<S: BatchSource + ?Sized> BatchSource for Box<S> {
    type Batch = S::Batch;
    type Error = S::Error;

    fn total_items(&self) -> Option<u64> {
        (**self).total_items()
    }

    fn batch_size(&self) -> Option<u64> {
        (**self).batch_size()
    }

    fn start(&mut self, epoch: Epoch, start_step: Step) -> Result<(), Self::Error> {
        (**self).start(epoch, start_step)
    }

    fn next_batch(&mut self) -> Result<Option<Self::Batch>, Self::Error> {
        (**self).next_batch()
    }

    fn can_reset(&self) -> bool {
        (**self).can_reset()
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        (**self).reset()
    }
}

impl<S: BatchSource + ?Sized> BatchSource for &mut S {
    type Batch = S::Batch;
    type Error = S::Error;

    fn total_items(&self) -> Option<u64> {
        (**self).total_items()
    }

    fn batch_size(&self) -> Option<u64> {
        (**self).batch_size()
    }

    fn start(&mut self, epoch: Epoch, start_step: Step) -> Result<(), Self::Error> {
        (**self).start(epoch, start_step)
    }

    fn next_batch(&mut self) -> Result<Option<Self::Batch>, Self::Error> {
        (**self).next_batch()
    }

    fn can_reset(&self) -> bool {
        (**self).can_reset()
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        (**self).reset()
    }
}
