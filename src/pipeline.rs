//! Pipeline wiring and the shutdown sequence.
//!
//! ```text
//! source -> SubscriptionManager -> WorkQueue -> WorkerPool -> FrameProcessor -> Dispatcher
//! ```
//!
//! Shutdown: `Running` until a signal, end of stream or fatal error; then
//! `Stopping` (intake stopped, queue closed), `Draining` (workers empty the
//! queue, unbounded unless a drain limit is configured), `Terminated`
//! (workers joined).

use crate::config::FirehoseConfig;
use crate::cursor::{Cursor, CursorFile};
use crate::error::Result;
use crate::firehose::{FirehoseSource, IntakeOutcome, IntakeReport, SubscriptionManager};
use crate::lifecycle::{Lifecycle, Phase, ShutdownCause};
use crate::notify::{Annotator, Collaborators, FrameProcessor, Notifier, NotifyCounts};
use crate::pool::{PoolReport, WorkerPool};
use crate::queue::WorkQueue;
use crate::types::Seq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How often the supervisor checks for signals and phase changes.
const SUPERVISE_TICK: Duration = Duration::from_millis(50);

/// What happened over one pipeline run.
#[derive(Clone, Debug)]
pub struct ShutdownReport {
    pub cause: Option<ShutdownCause>,
    pub exit_code: i32,
    pub intake: IntakeReport,
    pub pool: PoolReport,
    pub notifications: NotifyCounts,
    /// Frames still queued when the drain limit expired; non-zero forces exit code 1.
    pub undrained: usize,
    /// Final cursor position.
    pub cursor: Option<Seq>,
}

/// The assembled ingestion pipeline.
pub struct Pipeline {
    config: FirehoseConfig,
    source: Arc<dyn FirehoseSource>,
    collaborators: Collaborators,
    cursor_file: Option<CursorFile>,
    lifecycle: Arc<Lifecycle>,
}

impl Pipeline {
    pub fn new(
        config: FirehoseConfig,
        source: Arc<dyn FirehoseSource>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            source,
            collaborators,
            cursor_file: None,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    /// Persist the cursor to `file` while running and at shutdown.
    pub fn with_cursor_file(mut self, file: CursorFile) -> Self {
        self.cursor_file = Some(file);
        self
    }

    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Run until shutdown. `signal` is set by the process signal handler.
    ///
    /// Returns an error only if the pipeline could not be started.
    pub fn run(&self, initial: Option<Seq>, signal: Arc<AtomicBool>) -> Result<ShutdownReport> {
        let config = &self.config;
        let lifecycle = Arc::clone(&self.lifecycle);
        let queue: WorkQueue<Vec<u8>> = WorkQueue::new(config.queue_capacity);
        let cursor = Arc::new(Cursor::with_cadence(initial, config.cursor_cadence));

        let notifier = Notifier::new(
            self.collaborators.clone(),
            Annotator::new(config.gif_hosts.clone()),
            config.api_retry.clone(),
        );
        let stats = notifier.stats();
        let processor = Arc::new(FrameProcessor::new(notifier, Arc::clone(&cursor)));

        let pool = WorkerPool::spawn(
            config.workers,
            queue.clone(),
            processor,
            Arc::clone(&lifecycle),
        )?;

        let mut manager = SubscriptionManager::new(
            Arc::clone(&self.source),
            queue.clone(),
            Arc::clone(&cursor),
            Arc::clone(&lifecycle),
            config.intake.clone(),
        );
        if let Some(file) = &self.cursor_file {
            manager = manager.with_cursor_file(file.clone());
        }

        let intake = match manager.start(initial) {
            Ok(handle) => handle,
            Err(e) => {
                lifecycle.fail(format!("cannot start intake: {}", e));
                lifecycle.advance_to(Phase::Terminated);
                queue.close();
                pool.join();
                return Err(e);
            }
        };
        tracing::info!(
            relay = %config.relay,
            workers = pool.size(),
            capacity = queue.capacity(),
            cursor = ?initial,
            "pipeline running"
        );

        // --- Running ---
        while lifecycle.is_running() {
            if signal.load(Ordering::SeqCst) {
                lifecycle.request_stop(ShutdownCause::Signal);
                break;
            }
            thread::sleep(SUPERVISE_TICK);
        }

        // --- Stopping ---
        manager.stop();
        queue.close();
        let intake_report = match intake.join() {
            Ok(report) => report,
            Err(_) => {
                lifecycle.fail("intake thread panicked");
                IntakeReport {
                    outcome: IntakeOutcome::Failed("intake thread panicked".into()),
                    frames: manager.frames(),
                    reconnects: manager.reconnects(),
                    cursor: cursor.current(),
                }
            }
        };

        // --- Draining ---
        lifecycle.advance_to(Phase::Draining);
        tracing::info!(queued = queue.len(), "draining work queue");
        let deadline = config.drain_timeout.map(|limit| Instant::now() + limit);
        while !queue.is_drained() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
            thread::sleep(SUPERVISE_TICK);
        }

        // --- Terminated ---
        lifecycle.advance_to(Phase::Terminated);
        let undrained = queue.discard();
        if undrained > 0 {
            tracing::error!(undrained, "drain timed out, dropping queued frames");
        }
        let pool_report = pool.join();

        if let Some(file) = &self.cursor_file {
            if let Err(e) = file.save_from(&cursor) {
                tracing::warn!(error = %e, "cannot persist cursor at shutdown");
            }
        }

        let report = ShutdownReport {
            cause: lifecycle.cause(),
            // Accepted frames were lost; never report a clean exit.
            exit_code: if undrained > 0 { 1 } else { lifecycle.exit_code() },
            intake: intake_report,
            pool: pool_report,
            notifications: stats.counts(),
            undrained,
            cursor: cursor.current(),
        };
        tracing::info!(
            exit_code = report.exit_code,
            frames = report.intake.frames,
            processed = report.pool.processed,
            sent = report.notifications.sent,
            cursor = ?report.cursor,
            "pipeline terminated"
        );
        Ok(report)
    }
}
