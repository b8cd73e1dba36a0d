//! Checkpoint-aware data loading for preemptible ML training
//!
//! This crate provides:
//! - **Iteration control** that tracks epoch and global progress and hands
//!   control back to the training loop for checkpoints, run bounds and epoch ends
//! - **Batch sources**: a capability trait plus in-memory and prefetching sources
//! - **Observers** for structured diagnostics without hidden I/O
//!
//! # Example
//!
//! ```rust
//! use data_loader::{Advance, InMemorySource, IterationController, ResumeState};
//!
//! let source = InMemorySource::new((0..10u32).collect(), 4).unwrap();
//! let mut controller = IterationController::new(
//!     source,
//!     4,                      // batch size
//!     ResumeState::new(0, 0), // restored position
//!     0,                      // no periodic checkpoints
//!     -1,                     // unbounded run
//!     "worker-0",
//! )
//! .unwrap();
//!
//! controller.start_epoch().unwrap();
//! loop {
//!     match controller.advance().unwrap() {
//!         Advance::Batch(batch) => assert!(batch.len() <= 4),
//!         Advance::StopForEpochEnd => break,
//!         Advance::StopForCheckpoint | Advance::StopForRunBound => unreachable!(),
//!     }
//! }
//! assert_eq!(controller.epoch(), 1);
//! ```

mod controller;
mod iter;
mod memory;
mod observer;
mod prefetch;
mod source;

pub use controller::{Advance, ControllerBuilder, IterationController, RunSummary};
pub use iter::EpochBatches;
pub use memory::{InMemorySource, InMemorySourceError};
pub use observer::{IterationObserver, NoopObserver, RecordingObserver, TracingObserver};
pub use prefetch::{PrefetchError, PrefetchSource};
pub use source::BatchSource;

// Re-export types from runtime-core for convenience
pub use runtime_core::{
    Epoch, Error, IterationProgress, Result, ResumeState, RunLimit, Step, StopEvent, StopReason,
    WorkerId,
};
