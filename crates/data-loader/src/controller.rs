//! Iteration controller
//!
//! Wraps a [`BatchSource`] and decides, on every call to
//! [`IterationController::advance`], whether to hand out the next batch or stop
//! so the training loop can checkpoint, finish the run, or move to the next epoch.

use crate::iter::EpochBatches;
use crate::observer::{IterationObserver, TracingObserver};
use crate::source::BatchSource;
use runtime_core::{
    Epoch, Error, IterationConfig, IterationProgress, Result, ResumeState, RunLimit,
    RuntimeConfig, Step, StopEvent, StopReason, WorkerId,
};
use serde::{Deserialize, Serialize};

/// Outcome of a single [`IterationController::advance`] call
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance<B> {
    /// The next batch; all counters have been advanced
    Batch(B),

    /// A periodic checkpoint is due. Checkpoint, then keep calling `advance`.
    StopForCheckpoint,

    /// The run bound was reached. `should_exit` is now set.
    StopForRunBound,

    /// The epoch is exhausted. Call `start_epoch` before advancing again.
    StopForEpochEnd,
}

impl<B> Advance<B> {
    fn stop(reason: StopReason) -> Self {
        match reason {
            StopReason::Checkpoint => Advance::StopForCheckpoint,
            StopReason::RunBound => Advance::StopForRunBound,
            StopReason::EpochEnd => Advance::StopForEpochEnd,
        }
    }

    /// The stop reason, or None for a batch
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Advance::Batch(_) => None,
            Advance::StopForCheckpoint => Some(StopReason::Checkpoint),
            Advance::StopForRunBound => Some(StopReason::RunBound),
            Advance::StopForEpochEnd => Some(StopReason::EpochEnd),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Advance::Batch(_))
    }

    /// Take the batch, discarding any stop signal
    pub fn into_batch(self) -> Option<B> {
        match self {
            Advance::Batch(batch) => Some(batch),
            _ => None,
        }
    }
}

/// Resolved controller configuration, reported once at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub worker_id: WorkerId,
    pub batch_size: u64,
    pub dataset_size: u64,
    pub max_steps_per_epoch: Step,
    pub checkpoint_interval: u64,
    pub run_limit: RunLimit,
    pub resume: ResumeState,
    pub total_steps: Step,
}

/// Builder for [`IterationController`]
pub struct ControllerBuilder<S, O = TracingObserver> {
    source: S,
    observer: O,
    batch_size: u64,
    resume: ResumeState,
    checkpoint_interval: u64,
    run_limit: RunLimit,
    worker_id: Option<WorkerId>,
}

impl<S: BatchSource> ControllerBuilder<S> {
    /// Create a builder with no checkpointing, no run bound, starting at epoch 0
    ///
    /// `batch_size` must match the number of samples the source packs per
    /// batch; a source that reports its own batch size is checked in `build`.
    pub fn new(source: S, batch_size: u64) -> Self {
        Self {
            source,
            observer: TracingObserver,
            batch_size,
            resume: ResumeState::default(),
            checkpoint_interval: 0,
            run_limit: RunLimit::Unbounded,
            worker_id: None,
        }
    }
}

impl<S: BatchSource, O: IterationObserver> ControllerBuilder<S, O> {
    /// Apply batch size, checkpoint interval and run bound from a config section
    pub fn config(mut self, config: &IterationConfig) -> Self {
        self.batch_size = config.batch_size;
        self.checkpoint_interval = config.checkpoint_interval;
        self.run_limit = config.run_limit();
        self
    }

    /// Resume from a position restored by an external checkpoint procedure
    pub fn resume(mut self, resume: ResumeState) -> Self {
        self.resume = resume;
        self
    }

    /// Interrupt for a checkpoint every `interval` global steps (0 disables)
    pub fn checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Bound the run; any negative value means unbounded
    pub fn steps_to_run(mut self, steps_to_run: i64) -> Self {
        self.run_limit = RunLimit::from_steps(steps_to_run);
        self
    }

    pub fn run_limit(mut self, run_limit: RunLimit) -> Self {
        self.run_limit = run_limit;
        self
    }

    pub fn worker_id(mut self, worker_id: impl Into<WorkerId>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Replace the diagnostics observer
    pub fn observer<O2: IterationObserver>(self, observer: O2) -> ControllerBuilder<S, O2> {
        ControllerBuilder {
            source: self.source,
            observer,
            batch_size: self.batch_size,
            resume: self.resume,
            checkpoint_interval: self.checkpoint_interval,
            run_limit: self.run_limit,
            worker_id: self.worker_id,
        }
    }

    /// Validate the configuration and derive the initial counters
    pub fn build(self) -> Result<IterationController<S, O>> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig {
                message: "batch_size must be positive".to_string(),
            });
        }

        let dataset_size = self.source.total_items().ok_or_else(|| Error::InvalidSource {
            message: "source does not report its total item count".to_string(),
        })?;

        if let Some(source_batch_size) = self.source.batch_size() {
            if source_batch_size != self.batch_size {
                return Err(Error::InvalidConfig {
                    message: format!(
                        "batch_size {} does not match the source's batch size {}",
                        self.batch_size, source_batch_size
                    ),
                });
            }
        }

        let max_steps_per_epoch = dataset_size.div_ceil(self.batch_size);

        if self.resume.steps_this_epoch > max_steps_per_epoch {
            return Err(Error::InvalidConfig {
                message: format!(
                    "resume step {} exceeds the {} steps in an epoch",
                    self.resume.steps_this_epoch, max_steps_per_epoch
                ),
            });
        }

        let total_steps = self
            .resume
            .total_steps(max_steps_per_epoch)
            .ok_or_else(|| Error::InvalidConfig {
                message: format!("resume epoch {} overflows the step counter", self.resume.epoch),
            })?;

        // steps_this_epoch <= max_steps_per_epoch, so this only overflows for absurd sizes
        let samples_this_epoch = self
            .resume
            .steps_this_epoch
            .checked_mul(self.batch_size)
            .ok_or_else(|| Error::InvalidConfig {
                message: "resume position overflows the sample counter".to_string(),
            })?;

        let worker_id = self
            .worker_id
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

        let mut controller = IterationController {
            source: self.source,
            observer: self.observer,
            worker_id,
            batch_size: self.batch_size,
            dataset_size,
            epoch: self.resume.epoch,
            steps_this_epoch: self.resume.steps_this_epoch,
            samples_this_epoch,
            total_steps,
            max_steps_per_epoch,
            checkpoint_interval: self.checkpoint_interval,
            run_limit: self.run_limit,
            steps_this_run: 0,
            should_exit: false,
            epoch_started: false,
            last_checkpoint_at: None,
            initial_resume: self.resume,
        };

        let summary = controller.summary();
        controller.observer.on_configured(&summary);

        Ok(controller)
    }
}

/// Checkpoint-aware iteration state machine over a batch source
///
/// One instance per training worker. Driven by a single thread through
/// [`start_epoch`](Self::start_epoch) and [`advance`](Self::advance).
pub struct IterationController<S, O = TracingObserver> {
    source: S,
    observer: O,
    worker_id: WorkerId,
    batch_size: u64,
    dataset_size: u64,

    epoch: Epoch,
    steps_this_epoch: Step,
    samples_this_epoch: u64,
    total_steps: Step,
    max_steps_per_epoch: Step,

    checkpoint_interval: u64,
    run_limit: RunLimit,
    steps_this_run: Step,
    should_exit: bool,

    epoch_started: bool,
    /// total_steps at which the last checkpoint stop was handed out
    last_checkpoint_at: Option<Step>,
    initial_resume: ResumeState,
}

impl<S: BatchSource> IterationController<S> {
    /// Construct with the default tracing observer
    ///
    /// `steps_to_run` follows the signed convention: negative means unbounded.
    pub fn new(
        source: S,
        batch_size: u64,
        resume: ResumeState,
        checkpoint_interval: u64,
        steps_to_run: i64,
        worker_id: impl Into<WorkerId>,
    ) -> Result<Self> {
        ControllerBuilder::new(source, batch_size)
            .resume(resume)
            .checkpoint_interval(checkpoint_interval)
            .steps_to_run(steps_to_run)
            .worker_id(worker_id)
            .build()
    }

    /// Construct from a runtime configuration
    pub fn from_config(source: S, config: &RuntimeConfig, resume: ResumeState) -> Result<Self> {
        config.validate()?;
        ControllerBuilder::new(source, config.iteration.batch_size)
            .config(&config.iteration)
            .resume(resume)
            .worker_id(config.worker.resolve_worker_id())
            .build()
    }

    pub fn builder(source: S, batch_size: u64) -> ControllerBuilder<S> {
        ControllerBuilder::new(source, batch_size)
    }
}

impl<S: BatchSource, O: IterationObserver> IterationController<S, O> {
    /// Acquire a fresh traversal of the source for the current epoch
    ///
    /// Counters are left untouched; the source is positioned after the
    /// `steps_this_epoch` batches already consumed. Must be called before the
    /// first `advance` of every epoch, including epoch 0.
    pub fn start_epoch(&mut self) -> Result<()> {
        self.source
            .start(self.epoch, self.steps_this_epoch)
            .map_err(Error::from_source)?;
        self.epoch_started = true;

        let progress = self.progress();
        self.observer.on_epoch_start(&progress);
        Ok(())
    }

    /// Produce the next batch or signal a stop
    ///
    /// Checks, in order: checkpoint due, run bound reached, then fetches from the
    /// source. Source errors are returned unchanged inside [`Error::Source`].
    pub fn advance(&mut self) -> Result<Advance<S::Batch>> {
        if self.checkpoint_due() {
            self.last_checkpoint_at = Some(self.total_steps);
            return Ok(self.signal(StopReason::Checkpoint));
        }

        if self.run_limit.is_reached(self.steps_this_run) {
            self.should_exit = true;
            return Ok(self.signal(StopReason::RunBound));
        }

        if !self.epoch_started {
            return Err(Error::EpochNotStarted { epoch: self.epoch });
        }

        match self.source.next_batch().map_err(Error::from_source)? {
            None => {
                self.epoch += 1;
                self.steps_this_epoch = 0;
                self.samples_this_epoch = 0;
                self.epoch_started = false;
                Ok(self.signal(StopReason::EpochEnd))
            }
            Some(batch) => {
                if self.steps_this_epoch >= self.max_steps_per_epoch {
                    tracing::warn!(
                        worker = %self.worker_id,
                        epoch = self.epoch,
                        max_steps_per_epoch = self.max_steps_per_epoch,
                        "Source yielded more batches than its reported size allows"
                    );
                    return Err(Error::SourceOverrun {
                        epoch: self.epoch,
                        max_steps_per_epoch: self.max_steps_per_epoch,
                    });
                }

                self.total_steps += 1;
                self.steps_this_epoch += 1;
                self.steps_this_run += 1;
                self.samples_this_epoch += self.batch_size;
                Ok(Advance::Batch(batch))
            }
        }
    }

    /// Iterate over the remaining batches of the current epoch
    ///
    /// The iterator ends at the first stop signal; see
    /// [`EpochBatches::stop_reason`].
    pub fn batches(&mut self) -> EpochBatches<'_, S, O> {
        EpochBatches::new(self)
    }

    /// Rewind the source's current traversal. Counters are not touched.
    pub fn reset(&mut self) -> Result<()> {
        if !self.source.can_reset() {
            return Err(Error::ResetUnsupported);
        }
        self.source.reset().map_err(Error::from_source)
    }

    fn checkpoint_due(&self) -> bool {
        self.checkpoint_interval > 0
            && self.total_steps % self.checkpoint_interval == 0
            && self.last_checkpoint_at != Some(self.total_steps)
    }

    fn signal(&mut self, reason: StopReason) -> Advance<S::Batch> {
        let event = StopEvent::new(reason, self.progress());
        self.observer.on_stop(&event);
        Advance::stop(reason)
    }
}

impl<S, O> IterationController<S, O> {
    /// Whether the run bound has been reached
    pub fn should_exit(&self) -> bool {
        self.should_exit
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn steps_this_epoch(&self) -> Step {
        self.steps_this_epoch
    }

    pub fn samples_this_epoch(&self) -> u64 {
        self.samples_this_epoch
    }

    pub fn total_steps(&self) -> Step {
        self.total_steps
    }

    pub fn steps_this_run(&self) -> Step {
        self.steps_this_run
    }

    pub fn max_steps_per_epoch(&self) -> Step {
        self.max_steps_per_epoch
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn checkpoint_interval(&self) -> u64 {
        self.checkpoint_interval
    }

    pub fn run_limit(&self) -> RunLimit {
        self.run_limit
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Whether a traversal is active for the current epoch
    pub fn is_epoch_started(&self) -> bool {
        self.epoch_started
    }

    /// Snapshot of all counters
    pub fn progress(&self) -> IterationProgress {
        IterationProgress {
            worker_id: self.worker_id.clone(),
            epoch: self.epoch,
            steps_this_epoch: self.steps_this_epoch,
            samples_this_epoch: self.samples_this_epoch,
            total_steps: self.total_steps,
            steps_this_run: self.steps_this_run,
            max_steps_per_epoch: self.max_steps_per_epoch,
            should_exit: self.should_exit,
        }
    }

    /// Position an external checkpoint procedure should persist
    pub fn resume_state(&self) -> ResumeState {
        ResumeState::new(self.epoch, self.steps_this_epoch)
    }

    /// The resolved configuration this controller was built with
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            worker_id: self.worker_id.clone(),
            batch_size: self.batch_size,
            dataset_size: self.dataset_size,
            max_steps_per_epoch: self.max_steps_per_epoch,
            checkpoint_interval: self.checkpoint_interval,
            run_limit: self.run_limit,
            resume: self.initial_resume,
            total_steps: self
                .initial_resume
                .total_steps(self.max_steps_per_epoch)
                .unwrap_or_default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Release the wrapped source
    pub fn into_source(self) -> S {
        self.source
    }
}
