//! Integration tests for iteration control across crates

use anyhow::Result;
use data_loader::{
    Advance, BatchSource, Epoch, Error, InMemorySource, IterationController, NoopObserver,
    PrefetchError, PrefetchSource, RecordingObserver, ResumeState, Step, StopReason,
};
use runtime_core::RuntimeConfig;
use std::io::Write;

/// Source that fails on a chosen fetch
struct FailingSource {
    items: u64,
    fail_at: u64,
    fetched: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("shard {shard} unreadable")]
struct ShardError {
    shard: u64,
}

impl BatchSource for FailingSource {
    type Batch = u64;
    type Error = ShardError;

    fn total_items(&self) -> Option<u64> {
        Some(self.items)
    }

    fn start(&mut self, _epoch: Epoch, start_step: Step) -> std::result::Result<(), ShardError> {
        self.fetched = start_step;
        Ok(())
    }

    fn next_batch(&mut self) -> std::result::Result<Option<u64>, ShardError> {
        if self.fetched == self.fail_at {
            return Err(ShardError {
                shard: self.fetched,
            });
        }
        if self.fetched == self.items {
            return Ok(None);
        }
        self.fetched += 1;
        Ok(Some(self.fetched))
    }
}

#[test]
fn test_source_error_propagates_unchanged() -> Result<()> {
    let source = FailingSource {
        items: 10,
        fail_at: 3,
        fetched: 0,
    };
    let mut controller = IterationController::builder(source, 1)
        .observer(NoopObserver)
        .build()?;
    controller.start_epoch()?;

    for _ in 0..3 {
        assert!(controller.advance()?.is_batch());
    }

    let err = controller.advance().unwrap_err();
    assert!(err.is_source_error());
    assert!(!err.is_fatal());
    assert_eq!(err.source_error::<ShardError>().map(|e| e.shard), Some(3));

    // Counters untouched by the failed fetch
    assert_eq!(controller.total_steps(), 3);
    assert_eq!(controller.steps_this_epoch(), 3);
    assert_eq!(controller.epoch(), 0);
    Ok(())
}

#[test]
fn test_prefetched_source_error_keeps_original() -> Result<()> {
    let source = FailingSource {
        items: 10,
        fail_at: 2,
        fetched: 0,
    };
    let mut controller = IterationController::builder(PrefetchSource::new(source, 4), 1)
        .observer(NoopObserver)
        .build()?;
    controller.start_epoch()?;

    assert!(controller.advance()?.is_batch());
    assert!(controller.advance()?.is_batch());

    let err = controller.advance().unwrap_err();
    let prefetch_err = err
        .source_error::<PrefetchError<ShardError>>()
        .expect("prefetch error");
    assert!(matches!(prefetch_err, PrefetchError::Source(ShardError { shard: 2 })));
    Ok(())
}

#[test]
fn test_prefetched_source_error_never_reads_as_epoch_end() -> Result<()> {
    let source = FailingSource {
        items: 10,
        fail_at: 2,
        fetched: 0,
    };
    let mut controller = IterationController::builder(PrefetchSource::new(source, 4), 1)
        .observer(NoopObserver)
        .build()?;
    controller.start_epoch()?;

    assert!(controller.advance()?.is_batch());
    assert!(controller.advance()?.is_batch());
    assert!(controller.advance().is_err());

    for _ in 0..3 {
        let err = controller.advance().unwrap_err();
        assert!(matches!(
            err.source_error::<PrefetchError<ShardError>>(),
            Some(PrefetchError::Failed)
        ));
        assert_eq!(controller.epoch(), 0);
        assert_eq!(controller.steps_this_epoch(), 2);
    }
    Ok(())
}

#[test]
fn test_boxed_dyn_source() -> Result<()> {
    let inner = InMemorySource::new((0..9u8).collect(), 3)?;
    let boxed: Box<dyn BatchSource<Batch = Vec<u8>, Error = data_loader::InMemorySourceError>> =
        Box::new(inner);

    let mut controller = IterationController::builder(boxed, 3)
        .observer(NoopObserver)
        .build()?;
    controller.start_epoch()?;

    let batches: Vec<Vec<u8>> = controller.batches().collect::<data_loader::Result<_>>()?;
    assert_eq!(batches.len(), 3);
    assert_eq!(controller.epoch(), 1);
    Ok(())
}

#[test]
fn test_config_file_drives_controller() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"{{
            "iteration": {{ "batch_size": 4, "checkpoint_interval": 0, "steps_to_run": 5 }},
            "worker": {{ "worker_id": "worker-9" }}
        }}"#
    )?;

    let config = RuntimeConfig::from_json_file(file.path())?;
    let source = InMemorySource::new((0..100u32).collect(), 4)?;
    let recorder = RecordingObserver::new();
    let mut controller = IterationController::builder(source, config.iteration.batch_size)
        .config(&config.iteration)
        .worker_id(config.worker.resolve_worker_id())
        .observer(recorder.clone())
        .build()?;

    assert_eq!(controller.max_steps_per_epoch(), 25);
    assert_eq!(controller.run_limit().as_steps(), 5);
    controller.start_epoch()?;

    let mut batches = 0;
    while controller.advance()?.is_batch() {
        batches += 1;
    }

    assert_eq!(batches, 5);
    assert!(controller.should_exit());
    assert_eq!(recorder.reasons(), vec![StopReason::RunBound]);
    assert_eq!(recorder.events()[0].progress.worker_id, "worker-9");
    Ok(())
}

#[test]
fn test_invalid_config_is_fatal() {
    let source = InMemorySource::new((0..10u32).collect(), 4).unwrap();
    let err = IterationController::new(source, 0, ResumeState::default(), 0, -1, "worker-0")
        .err()
        .expect("zero batch size must fail");
    assert!(err.is_fatal());
    assert!(matches!(err, Error::InvalidConfig { .. }));
}

#[test]
fn test_resume_state_round_trips_through_json() -> Result<()> {
    let source = InMemorySource::new((0..50u32).collect(), 5)?;
    let mut controller = IterationController::builder(source, 5)
        .checkpoint_interval(7)
        .observer(NoopObserver)
        .build()?;

    controller.start_epoch()?;
    let mut saved = None;
    loop {
        match controller.advance()? {
            Advance::Batch(_) => {}
            Advance::StopForCheckpoint if controller.total_steps() > 0 => {
                saved = Some(serde_json::to_string(&controller.resume_state())?);
                break;
            }
            Advance::StopForCheckpoint => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    let restored: ResumeState = serde_json::from_str(&saved.expect("checkpoint taken"))?;
    assert_eq!(restored, ResumeState::new(0, 7));

    // Resuming exactly on a checkpoint boundary stops immediately
    let source = InMemorySource::new((0..50u32).collect(), 5)?;
    let mut resumed = IterationController::builder(source, 5)
        .checkpoint_interval(7)
        .resume(restored)
        .observer(NoopObserver)
        .build()?;
    assert_eq!(resumed.total_steps(), 7);
    assert_eq!(resumed.advance()?, Advance::StopForCheckpoint);

    resumed.start_epoch()?;
    assert_eq!(resumed.advance()?, Advance::Batch(vec![35, 36, 37, 38, 39]));
    Ok(())
}
