//! Background prefetching for batch sources
//!
//! [`PrefetchSource`] moves fetching onto a dedicated thread that stays up to
//! `buffer_size` batches ahead of the training loop. The controller still sees a
//! blocking `next_batch` call.
//!
//! The channel is used with `blocking_send` / `blocking_recv`, so the consumer
//! must not call into a prefetching source from inside an async runtime.

use crate::source::BatchSource;
use parking_lot::Mutex;
use runtime_core::{Epoch, Step};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Errors raised by [`PrefetchSource`]
#[derive(Debug, Error)]
pub enum PrefetchError<E: std::error::Error + 'static> {
    #[error("prefetch traversal has not been started")]
    NotStarted,

    #[error(transparent)]
    Source(E),

    #[error("failed to spawn prefetch thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("prefetch traversal failed earlier, restart or reset the source")]
    Failed,

    #[error("prefetch thread panicked")]
    WorkerPanicked,
}

impl<E: std::error::Error + 'static> PrefetchError<E> {
    /// The wrapped source's error, if this is one
    pub fn into_source(self) -> Option<E> {
        match self {
            PrefetchError::Source(e) => Some(e),
            _ => None,
        }
    }
}

/// Message from the producer thread; `Ok(None)` marks the end of the traversal
type Message<B, E> = Result<Option<B>, E>;

/// How the current traversal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    /// End marker received
    Exhausted,
    /// Source error delivered to the consumer
    Failed,
}

/// Wraps a source and fetches ahead on a background thread
pub struct PrefetchSource<S: BatchSource> {
    inner: Arc<Mutex<S>>,
    buffer_size: usize,
    rx: Option<mpsc::Receiver<Message<S::Batch, S::Error>>>,
    worker: Option<JoinHandle<()>>,
    finished: Option<Finished>,
}

impl<S> PrefetchSource<S>
where
    S: BatchSource + Send + 'static,
    S::Batch: Send + 'static,
{
    /// Wrap `source`, keeping at most `buffer_size` batches in flight
    pub fn new(source: S, buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
            buffer_size: buffer_size.max(1),
            rx: None,
            worker: None,
            finished: None,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether a producer thread is currently attached
    pub fn is_running(&self) -> bool {
        self.rx.is_some()
    }

    fn spawn_producer(&mut self) -> Result<(), PrefetchError<S::Error>> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let inner = Arc::clone(&self.inner);

        let handle = thread::Builder::new()
            .name("prefetch-worker".to_string())
            .spawn(move || produce(inner, tx))
            .map_err(PrefetchError::Spawn)?;

        self.rx = Some(rx);
        self.worker = Some(handle);
        self.finished = None;
        Ok(())
    }

    /// Detach the producer and wait for it to exit. Buffered batches are dropped.
    fn stop_producer(&mut self) -> Result<(), PrefetchError<S::Error>> {
        // Dropping the receiver fails the producer's next send
        self.rx = None;
        if let Some(handle) = self.worker.take() {
            handle.join().map_err(|_| PrefetchError::WorkerPanicked)?;
        }
        Ok(())
    }
}

fn produce<S: BatchSource>(source: Arc<Mutex<S>>, tx: mpsc::Sender<Message<S::Batch, S::Error>>) {
    let mut produced = 0u64;
    loop {
        let message = source.lock().next_batch();
        let last = !matches!(message, Ok(Some(_)));

        if tx.blocking_send(message).is_err() {
            debug!(produced = produced, "Prefetch consumer detached");
            return;
        }
        if last {
            debug!(produced = produced, "Prefetch traversal finished");
            return;
        }
        produced += 1;
    }
}

impl<S> BatchSource for PrefetchSource<S>
where
    S: BatchSource + Send + 'static,
    S::Batch: Send + 'static,
{
    type Batch = S::Batch;
    type Error = PrefetchError<S::Error>;

    fn total_items(&self) -> Option<u64> {
        self.inner.lock().total_items()
    }

    fn batch_size(&self) -> Option<u64> {
        self.inner.lock().batch_size()
    }

    fn start(&mut self, epoch: Epoch, start_step: Step) -> Result<(), Self::Error> {
        self.stop_producer()?;
        self.inner
            .lock()
            .start(epoch, start_step)
            .map_err(PrefetchError::Source)?;
        self.spawn_producer()
    }

    fn next_batch(&mut self) -> Result<Option<Self::Batch>, Self::Error> {
        let rx = self.rx.as_mut().ok_or(PrefetchError::NotStarted)?;

        match self.finished {
            Some(Finished::Exhausted) => return Ok(None),
            Some(Finished::Failed) => return Err(PrefetchError::Failed),
            None => {}
        }

        match rx.blocking_recv() {
            Some(Ok(Some(batch))) => Ok(Some(batch)),
            Some(Ok(None)) => {
                self.finished = Some(Finished::Exhausted);
                Ok(None)
            }
            Some(Err(e)) => {
                self.finished = Some(Finished::Failed);
                Err(PrefetchError::Source(e))
            }
            None => {
                // Channel closed without an end marker
                warn!("Prefetch thread exited unexpectedly");
                self.rx = None;
                if let Some(handle) = self.worker.take() {
                    let _ = handle.join();
                }
                Err(PrefetchError::WorkerPanicked)
            }
        }
    }

    fn can_reset(&self) -> bool {
        self.inner.lock().can_reset()
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        let was_running = self.is_running();
        self.stop_producer()?;
        self.inner.lock().reset().map_err(PrefetchError::Source)?;
        if was_running {
            self.spawn_producer()?;
        }
        Ok(())
    }
}

impl<S: BatchSource> Drop for PrefetchSource<S> {
    fn drop(&mut self) {
        self.rx = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Prefetch thread panicked before shutdown");
            }
        }
    }
}
