//! Core type definitions for the training iteration runtime

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier types
pub type WorkerId = String;

/// Training step and epoch counters
pub type Step = u64;
pub type Epoch = u64;

/// Position to resume iteration from, supplied by an external checkpoint-restore procedure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    /// Epoch to resume in
    pub epoch: Epoch,

    /// Batches already consumed in that epoch
    pub steps_this_epoch: Step,
}

impl ResumeState {
    /// Create a resume state
    pub fn new(epoch: Epoch, steps_this_epoch: Step) -> Self {
        Self {
            epoch,
            steps_this_epoch,
        }
    }

    /// Global step count implied by this position for a given epoch length.
    /// Returns None on overflow.
    pub fn total_steps(&self, max_steps_per_epoch: Step) -> Option<Step> {
        self.epoch
            .checked_mul(max_steps_per_epoch)?
            .checked_add(self.steps_this_epoch)
    }
}

/// How many batches a single run may consume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLimit {
    /// No bound, run until the caller stops iterating
    #[default]
    Unbounded,

    /// Stop after exactly this many batches
    Steps(Step),
}

impl RunLimit {
    /// Interpret a signed step count, where any negative value means unbounded
    pub fn from_steps(steps_to_run: i64) -> Self {
        if steps_to_run < 0 {
            RunLimit::Unbounded
        } else {
            RunLimit::Steps(steps_to_run as Step)
        }
    }

    /// Signed form, `-1` for unbounded
    pub fn as_steps(&self) -> i64 {
        match self {
            RunLimit::Unbounded => -1,
            RunLimit::Steps(n) => i64::try_from(*n).unwrap_or(i64::MAX),
        }
    }

    /// Returns true if `steps_this_run` has reached the bound
    pub fn is_reached(&self, steps_this_run: Step) -> bool {
        match self {
            RunLimit::Unbounded => false,
            RunLimit::Steps(n) => steps_this_run >= *n,
        }
    }
}

impl fmt::Display for RunLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunLimit::Unbounded => write!(f, "unbounded"),
            RunLimit::Steps(n) => write!(f, "{} steps", n),
        }
    }
}

/// Why iteration handed control back to the training loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A periodic checkpoint is due; checkpoint then continue
    Checkpoint,

    /// The run bound was reached; terminate the run
    RunBound,

    /// The source is exhausted; start the next epoch and continue
    EpochEnd,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Checkpoint => "checkpoint",
            StopReason::RunBound => "run_bound",
            StopReason::EpochEnd => "epoch_end",
        };
        f.write_str(s)
    }
}

/// Snapshot of all iteration counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationProgress {
    /// Worker the counters belong to
    pub worker_id: WorkerId,

    /// Current epoch
    pub epoch: Epoch,

    /// Batches consumed since epoch start
    pub steps_this_epoch: Step,

    /// Samples consumed since epoch start
    pub samples_this_epoch: u64,

    /// Batches consumed since training began
    pub total_steps: Step,

    /// Batches consumed since this run started
    pub steps_this_run: Step,

    /// Batches in one full epoch
    pub max_steps_per_epoch: Step,

    /// Whether the run bound has been reached
    pub should_exit: bool,
}

impl IterationProgress {
    /// Position an external checkpoint must record to resume here
    pub fn resume_state(&self) -> ResumeState {
        ResumeState::new(self.epoch, self.steps_this_epoch)
    }

    /// Fraction of the current epoch completed (0.0 - 1.0)
    pub fn epoch_fraction(&self) -> f64 {
        if self.max_steps_per_epoch == 0 {
            return 0.0;
        }
        self.steps_this_epoch as f64 / self.max_steps_per_epoch as f64
    }
}

/// A stop signal together with the counters at the time it was raised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopEvent {
    /// Which stop was signalled
    pub reason: StopReason,

    /// Counters when the stop was signalled
    pub progress: IterationProgress,

    /// When the stop was signalled
    pub timestamp: DateTime<Utc>,
}

impl StopEvent {
    /// Create a stop event stamped with the current time
    pub fn new(reason: StopReason, progress: IterationProgress) -> Self {
        Self {
            reason,
            progress,
            timestamp: Utc::now(),
        }
    }
}
