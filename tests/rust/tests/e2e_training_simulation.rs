//! End-to-end training simulation test
//!
//! This test simulates preemptible distributed training with:
//! - Multiple workers, each iterating its own data partition
//! - Short leases (bounded runs) that end mid-epoch
//! - Periodic checkpoints that commit progress
//! - Restarts that resume from the last committed position
//!
//! Work done after the last checkpoint of a lease is lost, exactly like a real
//! preemption. At the end every epoch must have committed each sample once.

use anyhow::Result;
use data_loader::{
    Advance, InMemorySource, IterationController, NoopObserver, PrefetchSource,
    RecordingObserver, ResumeState, StopReason,
};
use std::collections::BTreeMap;

const SAMPLES_PER_WORKER: u32 = 103;
const BATCH_SIZE: u64 = 4;
const CHECKPOINT_INTERVAL: u64 = 3;
const LEASE_STEPS: i64 = 8;
const EPOCHS: u64 = 3;

/// Outcome of one simulated worker
struct WorkerReport {
    committed: BTreeMap<u64, Vec<u32>>,
    leases: u32,
    final_state: ResumeState,
}

fn run_worker(rank: u32) -> Result<WorkerReport> {
    let shard: Vec<u32> =
        (rank * SAMPLES_PER_WORKER..(rank + 1) * SAMPLES_PER_WORKER).collect();

    let mut state = ResumeState::default();
    let mut committed: BTreeMap<u64, Vec<u32>> = BTreeMap::new();
    let mut leases = 0;

    while state.epoch < EPOCHS {
        leases += 1;

        // A fresh process per lease, resuming from the last checkpoint
        let dataset = InMemorySource::new(shard.clone(), BATCH_SIZE as usize)?
            .with_shuffle(1000 + rank as u64);
        let mut controller = IterationController::builder(PrefetchSource::new(dataset, 2), BATCH_SIZE)
            .checkpoint_interval(CHECKPOINT_INTERVAL)
            .steps_to_run(LEASE_STEPS)
            .resume(state)
            .worker_id(format!("worker-{}", rank))
            .observer(NoopObserver)
            .build()?;

        controller.start_epoch()?;
        let mut pending: Vec<u32> = vec![];

        loop {
            match controller.advance()? {
                Advance::Batch(batch) => pending.extend(batch),
                Advance::StopForCheckpoint => {
                    committed
                        .entry(controller.epoch())
                        .or_default()
                        .append(&mut pending);
                    state = controller.resume_state();
                }
                Advance::StopForEpochEnd => {
                    committed
                        .entry(controller.epoch() - 1)
                        .or_default()
                        .append(&mut pending);
                    state = controller.resume_state();
                    if controller.epoch() >= EPOCHS {
                        break;
                    }
                    controller.start_epoch()?;
                }
                Advance::StopForRunBound => {
                    assert!(controller.should_exit());
                    assert_eq!(controller.steps_this_run(), LEASE_STEPS as u64);
                    // Preempted: uncommitted work is lost
                    break;
                }
            }
        }
    }

    Ok(WorkerReport {
        committed,
        leases,
        final_state: state,
    })
}

#[test]
fn test_preemptible_multi_worker_training() -> Result<()> {
    let world_size = 4u32;

    let reports: Vec<WorkerReport> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..world_size)
            .map(|rank| scope.spawn(move || run_worker(rank)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker thread panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    for (rank, report) in reports.iter().enumerate() {
        let rank = rank as u32;
        let expected: Vec<u32> =
            (rank * SAMPLES_PER_WORKER..(rank + 1) * SAMPLES_PER_WORKER).collect();

        assert_eq!(report.final_state, ResumeState::new(EPOCHS, 0));
        assert_eq!(report.committed.len(), EPOCHS as usize);

        for (epoch, samples) in &report.committed {
            let mut samples = samples.clone();
            samples.sort();
            assert_eq!(samples, expected, "worker {} epoch {}", rank, epoch);
        }

        // 26 steps per epoch cannot fit in one 8-step lease
        assert!(report.leases > EPOCHS as u32, "only {} leases", report.leases);
    }

    Ok(())
}

#[test]
fn test_stop_signals_observed_in_order() -> Result<()> {
    // 10 samples / batch 4 = 3 steps per epoch
    let recorder = RecordingObserver::new();
    let dataset = InMemorySource::new((0..10u32).collect(), 4)?;
    let mut controller = IterationController::builder(dataset, 4)
        .checkpoint_interval(2)
        .steps_to_run(5)
        .worker_id("worker-0")
        .observer(recorder.clone())
        .build()?;

    controller.start_epoch()?;
    loop {
        match controller.advance()? {
            Advance::Batch(_) | Advance::StopForCheckpoint => {}
            Advance::StopForEpochEnd => controller.start_epoch()?,
            Advance::StopForRunBound => break,
        }
    }

    // total_steps: ckpt@0, 1, 2, ckpt@2, 3, end(epoch 0), 4, ckpt@4, 5, run bound
    assert_eq!(
        recorder.reasons(),
        vec![
            StopReason::Checkpoint,
            StopReason::Checkpoint,
            StopReason::EpochEnd,
            StopReason::Checkpoint,
            StopReason::RunBound,
        ]
    );

    let events = recorder.events();
    let steps: Vec<u64> = events.iter().map(|e| e.progress.total_steps).collect();
    assert_eq!(steps, vec![0, 2, 3, 4, 5]);

    // Checkpoint at total step 2 sits two thirds into epoch 0
    assert!((events[1].progress.epoch_fraction() - 2.0 / 3.0).abs() < 1e-9);
    // Epoch end resets the epoch counters
    assert_eq!(events[2].progress.epoch_fraction(), 0.0);
    assert_eq!(recorder.epochs_started(), vec![0, 1]);
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    Ok(())
}
