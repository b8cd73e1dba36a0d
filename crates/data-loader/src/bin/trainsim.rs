//! Training simulation entry point
//!
//! Drives a simulated training loop over an in-memory dataset, reacting to
//! every stop signal the iteration controller raises.
//!
//! Usage: `trainsim [config.json] [resume.json]`
//!
//! Dataset shape comes from `TRAINSIM_SAMPLES` (default 1000),
//! `TRAINSIM_EPOCHS` (default 3) and `TRAINSIM_SEED` (default 42).

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use data_loader::{Advance, InMemorySource, IterationController, PrefetchSource, ResumeState};
use runtime_core::RuntimeConfig;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => RuntimeConfig::default(),
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let resume = match std::env::args().nth(2) {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading resume state from {}", path))?;
            serde_json::from_str::<ResumeState>(&contents)?
        }
        None => ResumeState::default(),
    };

    let num_samples: u64 = env_or("TRAINSIM_SAMPLES", 1000);
    let num_epochs: u64 = env_or("TRAINSIM_EPOCHS", 3);
    let seed: u64 = env_or("TRAINSIM_SEED", 42);

    let batch_size = usize::try_from(config.iteration.batch_size)?;
    let dataset = InMemorySource::new((0..num_samples).collect(), batch_size)?.with_shuffle(seed);
    let source = PrefetchSource::new(dataset, config.worker.prefetch_buffer_size);

    let mut controller = IterationController::from_config(source, &config, resume)?;
    let mut checksum = 0u64;
    let mut checkpoints = 0u32;

    'run: while controller.epoch() < num_epochs {
        controller.start_epoch()?;

        loop {
            match controller.advance()? {
                Advance::Batch(batch) => {
                    // Stand-in for a forward/backward pass
                    checksum = batch.iter().fold(checksum, |acc, x| acc.wrapping_add(*x));
                }
                Advance::StopForCheckpoint => {
                    checkpoints += 1;
                    let state = serde_json::to_string(&controller.resume_state())?;
                    tracing::info!(resume = %state, "Checkpoint written");
                }
                Advance::StopForEpochEnd => break,
                Advance::StopForRunBound => break 'run,
            }
        }
    }

    let progress = controller.progress();
    tracing::info!(
        worker = %progress.worker_id,
        epoch = progress.epoch,
        total_steps = progress.total_steps,
        steps_this_run = progress.steps_this_run,
        steps_to_run = controller.run_limit().as_steps(),
        checkpoints = checkpoints,
        should_exit = controller.should_exit(),
        checksum = checksum,
        "Training simulation finished"
    );

    println!("{}", serde_json::to_string_pretty(&progress)?);
    Ok(())
}
