//! Fixed-size worker pool consuming the work queue.
//!
//! Each worker pops one frame at a time and hands it to the shared
//! [`FrameHandler`]. A failing or panicking frame never takes down sibling
//! workers; it escalates to a process-wide shutdown through the
//! [`Lifecycle`] instead. Workers exit when the queue is drained or the
//! lifecycle reaches `Terminated`.

use crate::error::{AlertError, Result};
use crate::lifecycle::Lifecycle;
use crate::queue::{Popped, WorkQueue};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a worker waits on an empty queue before re-checking the lifecycle.
const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Processes one raw frame.
pub trait FrameHandler: Send + Sync + 'static {
    /// Any error returned here is treated as fatal to the process.
    fn handle(&self, frame: Vec<u8>) -> Result<()>;
}

/// Reference sizing: two workers per core, minus one for intake.
pub fn default_worker_count() -> usize {
    (2 * num_cpus::get()).saturating_sub(1).max(1)
}

#[derive(Debug, Default)]
struct PoolStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Running pool of worker threads.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Start `size` workers (at least one).
    pub fn spawn<H: FrameHandler>(
        size: usize,
        queue: WorkQueue<Vec<u8>>,
        handler: Arc<H>,
        lifecycle: Arc<Lifecycle>,
    ) -> Result<Self> {
        let stats = Arc::new(PoolStats::default());
        let mut handles = Vec::with_capacity(size.max(1));

        for id in 0..size.max(1) {
            let worker = Worker {
                id,
                queue: queue.clone(),
                handler: Arc::clone(&handler),
                lifecycle: Arc::clone(&lifecycle),
                stats: Arc::clone(&stats),
            };
            let handle = thread::Builder::new()
                .name(format!("firehose-worker-{}", id))
                .spawn(move || worker.run())?;
            handles.push(handle);
        }

        tracing::info!(workers = handles.len(), "worker pool started");
        Ok(Self { handles, stats })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Frames handled successfully so far.
    pub fn processed(&self) -> u64 {
        self.stats.processed.load(Ordering::Relaxed)
    }

    /// Frames whose handler failed or panicked.
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Wait for every worker to exit.
    pub fn join(self) -> PoolReport {
        let workers = self.handles.len();
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!(worker = %name, "worker thread panicked outside a frame");
            }
        }
        PoolReport {
            workers,
            processed: self.stats.processed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

/// Final pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub workers: usize,
    pub processed: u64,
    pub failed: u64,
}

struct Worker<H> {
    id: usize,
    queue: WorkQueue<Vec<u8>>,
    handler: Arc<H>,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<PoolStats>,
}

impl<H: FrameHandler> Worker<H> {
    fn run(self) {
        tracing::debug!(worker = self.id, "worker started");
        loop {
            if self.lifecycle.is_terminated() {
                break;
            }
            match self.queue.pop_timeout(POP_TIMEOUT) {
                Popped::Item(frame) => self.process(frame),
                Popped::Empty => continue,
                Popped::Drained => break,
            }
        }
        tracing::debug!(worker = self.id, "worker exiting");
    }

    fn process(&self, frame: Vec<u8>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(frame)));
        let error = match outcome {
            Ok(Ok(())) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(Err(e)) => e,
            Err(payload) => AlertError::WorkerPanic(panic_message(payload.as_ref())),
        };

        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(worker = self.id, error = %error, "frame processing failed");
        self.lifecycle.fail(error.to_string());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
