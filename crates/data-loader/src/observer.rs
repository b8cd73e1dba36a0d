//! Observers for iteration diagnostics
//!
//! The controller performs no I/O of its own; every diagnostic goes through an
//! [`IterationObserver`]. [`TracingObserver`] is the default and turns events into
//! `tracing` records.

use crate::controller::RunSummary;
use parking_lot::Mutex;
use runtime_core::{IterationProgress, StopEvent, StopReason};
use std::sync::Arc;
use tracing::{debug, info};

/// Receives controller lifecycle events
pub trait IterationObserver {
    /// Called once after construction with the resolved configuration
    fn on_configured(&mut self, _summary: &RunSummary) {}

    /// Called after a fresh traversal was acquired for an epoch
    fn on_epoch_start(&mut self, _progress: &IterationProgress) {}

    /// Called for every stop signal handed back to the caller
    fn on_stop(&mut self, _event: &StopEvent) {}
}

impl<O: IterationObserver + ?Sized> IterationObserver for Box<O> {
    fn on_configured(&mut self, summary: &RunSummary) {
        (**self).on_configured(summary)
    }

    fn on_epoch_start(&mut self, progress: &IterationProgress) {
        (**self).on_epoch_start(progress)
    }

    fn on_stop(&mut self, event: &StopEvent) {
        (**self).on_stop(event)
    }
}

/// Emits events as structured `tracing` records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl IterationObserver for TracingObserver {
    fn on_configured(&mut self, summary: &RunSummary) {
        info!(
            worker = %summary.worker_id,
            batch_size = summary.batch_size,
            dataset_size = summary.dataset_size,
            max_steps_per_epoch = summary.max_steps_per_epoch,
            checkpoint_interval = summary.checkpoint_interval,
            run_limit = %summary.run_limit,
            epoch = summary.resume.epoch,
            steps_this_epoch = summary.resume.steps_this_epoch,
            total_steps = summary.total_steps,
            "Iteration controller configured"
        );
    }

    fn on_epoch_start(&mut self, progress: &IterationProgress) {
        debug!(
            worker = %progress.worker_id,
            epoch = progress.epoch,
            steps_this_epoch = progress.steps_this_epoch,
            "Started epoch traversal"
        );
    }

    fn on_stop(&mut self, event: &StopEvent) {
        let p = &event.progress;
        let message = match event.reason {
            StopReason::Checkpoint => "Stopping for checkpoint",
            StopReason::RunBound => "Run bound reached",
            StopReason::EpochEnd => "Epoch finished",
        };
        info!(
            worker = %p.worker_id,
            reason = %event.reason,
            epoch = p.epoch,
            steps_this_epoch = p.steps_this_epoch,
            samples_this_epoch = p.samples_this_epoch,
            epoch_fraction = p.epoch_fraction(),
            total_steps = p.total_steps,
            steps_this_run = p.steps_this_run,
            "{}",
            message
        );
    }
}

/// Discards all events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl IterationObserver for NoopObserver {}

/// Keeps every stop event in memory behind a shared handle
///
/// Clones share the same log, so a clone can be handed to the controller while
/// the original is kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<StopEvent>>>,
    summary: Arc<Mutex<Option<RunSummary>>>,
    epochs_started: Arc<Mutex<Vec<u64>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stop events recorded so far
    pub fn events(&self) -> Vec<StopEvent> {
        self.events.lock().clone()
    }

    /// Stop reasons in the order they were signalled
    pub fn reasons(&self) -> Vec<StopReason> {
        self.events.lock().iter().map(|e| e.reason).collect()
    }

    /// Number of stops with the given reason
    pub fn count(&self, reason: StopReason) -> usize {
        self.events.lock().iter().filter(|e| e.reason == reason).count()
    }

    /// The construction summary, once configured
    pub fn summary(&self) -> Option<RunSummary> {
        self.summary.lock().clone()
    }

    /// Epochs for which a traversal was started
    pub fn epochs_started(&self) -> Vec<u64> {
        self.epochs_started.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.epochs_started.lock().clear();
    }
}

impl IterationObserver for RecordingObserver {
    fn on_configured(&mut self, summary: &RunSummary) {
        *self.summary.lock() = Some(summary.clone());
    }

    fn on_epoch_start(&mut self, progress: &IterationProgress) {
        self.epochs_started.lock().push(progress.epoch);
    }

    fn on_stop(&mut self, event: &StopEvent) {
        self.events.lock().push(event.clone());
    }
}
