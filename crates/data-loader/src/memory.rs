//! In-memory batch source
//!
//! Batches a `Vec` of samples, optionally reshuffled every epoch with a
//! deterministic seed so a resumed run sees the same order it was interrupted in.

use crate::source::BatchSource;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use runtime_core::{Epoch, Step};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by [`InMemorySource`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InMemorySourceError {
    #[error("batch size must be positive")]
    ZeroBatchSize,

    #[error("traversal has not been started")]
    NotStarted,
}

/// Batch source over samples held in memory
#[derive(Debug, Clone)]
pub struct InMemorySource<T> {
    samples: Arc<Vec<T>>,
    batch_size: usize,
    shuffle_seed: Option<u64>,

    /// Sample order for the current traversal
    order: Vec<usize>,
    /// Where the current traversal began
    origin: usize,
    cursor: usize,
    started: bool,
}

impl<T: Clone> InMemorySource<T> {
    /// Create a source yielding batches of `batch_size` samples in their original order
    pub fn new(samples: Vec<T>, batch_size: usize) -> Result<Self, InMemorySourceError> {
        if batch_size == 0 {
            return Err(InMemorySourceError::ZeroBatchSize);
        }

        Ok(Self {
            samples: Arc::new(samples),
            batch_size,
            shuffle_seed: None,
            order: Vec::new(),
            origin: 0,
            cursor: 0,
            started: false,
        })
    }

    /// Reshuffle samples every epoch, deterministically from `seed` and the epoch
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of samples not yet yielded in the current traversal
    pub fn remaining(&self) -> usize {
        if !self.started {
            return 0;
        }
        self.order.len() - self.cursor
    }

    fn epoch_order(&self, epoch: Epoch) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();

        if let Some(seed) = self.shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(epoch_seed(seed, epoch));
            order.shuffle(&mut rng);
        }

        order
    }
}

/// Combine base seed and epoch into a per-epoch seed
fn epoch_seed(base_seed: u64, epoch: Epoch) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    base_seed.hash(&mut hasher);
    epoch.hash(&mut hasher);
    hasher.finish()
}

impl<T: Clone> BatchSource for InMemorySource<T> {
    type Batch = Vec<T>;
    type Error = InMemorySourceError;

    fn total_items(&self) -> Option<u64> {
        Some(self.samples.len() as u64)
    }

    fn batch_size(&self) -> Option<u64> {
        Some(self.batch_size as u64)
    }

    fn start(&mut self, epoch: Epoch, start_step: Step) -> Result<(), Self::Error> {
        self.order = self.epoch_order(epoch);

        let skip = usize::try_from(start_step)
            .ok()
            .and_then(|steps| steps.checked_mul(self.batch_size))
            .unwrap_or(usize::MAX);
        self.origin = skip.min(self.order.len());
        self.cursor = self.origin;
        self.started = true;

        tracing::debug!(
            epoch = epoch,
            start_step = start_step,
            samples = self.order.len(),
            shuffled = self.shuffle_seed.is_some(),
            "Started in-memory traversal"
        );
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<Self::Batch>, Self::Error> {
        if !self.started {
            return Err(InMemorySourceError::NotStarted);
        }
        if self.cursor >= self.order.len() {
            return Ok(None);
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end]
            .iter()
            .map(|&idx| self.samples[idx].clone())
            .collect();
        self.cursor = end;

        Ok(Some(batch))
    }

    fn can_reset(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        if !self.started {
            return Err(InMemorySourceError::NotStarted);
        }
        self.cursor = self.origin;
        Ok(())
    }
}
