//! Subscription manager: owns the relay connection and feeds the work queue.

use super::source::{FirehoseSource, FrameStream, StreamEvent};
use crate::cursor::{Cursor, CursorFile};
use crate::decode::Frame;
use crate::error::{AlertError, Result};
use crate::lifecycle::{Lifecycle, ShutdownCause};
use crate::queue::WorkQueue;
use crate::retry::RetryPolicy;
use crate::types::Seq;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Intake settings.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Connect attempts before giving up, and the delay between them.
    pub reconnect: RetryPolicy,
    /// How often the resume cursor is refreshed and persisted.
    pub refresh_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconnect: RetryPolicy {
                max_attempts: 8,
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(30),
            },
            refresh_interval: Duration::from_secs(10),
        }
    }
}

/// How intake finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// `stop()` was called or the pipeline left `Running`.
    Stopped,
    /// The source ran out of frames.
    Ended,
    /// Unrecoverable stream failure.
    Failed(String),
}

/// Intake counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntakeReport {
    pub outcome: IntakeOutcome,
    pub frames: u64,
    pub reconnects: u64,
    /// Resume position at exit.
    pub cursor: Option<Seq>,
}

/// Logs inbound events per second at debug level.
struct ThroughputMeter {
    started: Instant,
    events: u64,
}

impl ThroughputMeter {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            events: 0,
        }
    }

    fn record(&mut self) {
        self.events += 1;
        self.maybe_report();
    }

    fn maybe_report(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed >= Duration::from_secs(1) {
            tracing::debug!(
                events_per_sec = (self.events as f64 / elapsed.as_secs_f64()).round() as u64,
                "firehose throughput"
            );
            self.started = Instant::now();
            self.events = 0;
        }
    }
}

struct Inner {
    source: Arc<dyn FirehoseSource>,
    queue: WorkQueue<Vec<u8>>,
    cursor: Arc<Cursor>,
    cursor_file: Option<CursorFile>,
    lifecycle: Arc<Lifecycle>,
    config: ManagerConfig,
    stopped: AtomicBool,
    frames: AtomicU64,
    reconnects: AtomicU64,
}

/// Why one connected session ended.
enum SessionEnd {
    Stopped,
    Ended,
    Dropped(AlertError),
    Failed(AlertError),
}

/// Feeds frames from a [`FirehoseSource`] into the work queue, in arrival order.
///
/// Cheap to clone; clones share the same intake.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    pub fn new(
        source: Arc<dyn FirehoseSource>,
        queue: WorkQueue<Vec<u8>>,
        cursor: Arc<Cursor>,
        lifecycle: Arc<Lifecycle>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                queue,
                cursor,
                cursor_file: None,
                lifecycle,
                config,
                stopped: AtomicBool::new(false),
                frames: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
            }),
        }
    }

    /// Persist the cursor to `file` on every refresh.
    ///
    /// Must be called before the manager is cloned or started.
    pub fn with_cursor_file(mut self, file: CursorFile) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.cursor_file = Some(file);
        } else {
            tracing::warn!("cursor file ignored: manager already shared");
        }
        self
    }

    /// Run intake on a dedicated thread.
    pub fn start(&self, initial: Option<Seq>) -> Result<JoinHandle<IntakeReport>> {
        let manager = self.clone();
        let handle = thread::Builder::new()
            .name("firehose-intake".to_string())
            .spawn(move || manager.run(initial))?;
        Ok(handle)
    }

    /// Stop intake. Idempotent; queued frames are left for the workers.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            tracing::info!("stopping firehose intake");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    fn should_stop(&self) -> bool {
        self.is_stopped() || !self.inner.lifecycle.is_running()
    }

    /// Run intake on the calling thread until stopped, ended or failed.
    ///
    /// An end of stream or failure is reported to the lifecycle.
    pub fn run(&self, initial: Option<Seq>) -> IntakeReport {
        let outcome = self.intake(initial);
        match &outcome {
            IntakeOutcome::Stopped => {}
            IntakeOutcome::Ended => {
                self.inner.lifecycle.request_stop(ShutdownCause::StreamEnded);
            }
            IntakeOutcome::Failed(reason) => {
                self.inner.lifecycle.fail(reason.clone());
            }
        }
        self.persist_cursor();

        let report = IntakeReport {
            outcome,
            frames: self.frames(),
            reconnects: self.reconnects(),
            cursor: self.inner.cursor.current(),
        };
        tracing::info!(
            frames = report.frames,
            reconnects = report.reconnects,
            cursor = ?report.cursor,
            outcome = ?report.outcome,
            "firehose intake finished"
        );
        report
    }

    fn intake(&self, initial: Option<Seq>) -> IntakeOutcome {
        let policy = &self.inner.config.reconnect;
        let max_attempts = policy.max_attempts.max(1);
        let mut resume = initial;
        let mut failures: u32 = 0;
        let mut meter = ThroughputMeter::new();

        loop {
            if self.should_stop() {
                return IntakeOutcome::Stopped;
            }

            let mut stream = match self.inner.source.connect(resume) {
                Ok(stream) => {
                    tracing::info!(cursor = ?resume, "connected to firehose");
                    stream
                }
                Err(e) if e.is_fatal() => return IntakeOutcome::Failed(e.to_string()),
                Err(e) => {
                    failures += 1;
                    if let Some(outcome) = self.back_off(policy, failures, max_attempts, &e) {
                        return outcome;
                    }
                    continue;
                }
            };

            let before = self.frames();
            let end = self.pump(stream.as_mut(), &mut resume, &mut meter);
            stream.close();

            match end {
                SessionEnd::Stopped => return IntakeOutcome::Stopped,
                SessionEnd::Ended => return IntakeOutcome::Ended,
                SessionEnd::Failed(e) => return IntakeOutcome::Failed(e.to_string()),
                SessionEnd::Dropped(e) => {
                    // Resume from the freshest acknowledged position.
                    if let Some(seq) = self.inner.cursor.current() {
                        resume = Some(seq);
                    }
                    self.inner.reconnects.fetch_add(1, Ordering::Relaxed);

                    // Only a session that delivered frames clears the failure
                    // budget; connect-then-drop counts like a refused connect.
                    if self.frames() > before {
                        failures = 1;
                    } else {
                        failures += 1;
                    }
                    if let Some(outcome) = self.back_off(policy, failures, max_attempts, &e) {
                        return outcome;
                    }
                }
            }
        }
    }

    /// Sleep before the next connect, or give up once `failures` consecutive
    /// unproductive attempts reach `max_attempts`.
    fn back_off(
        &self,
        policy: &RetryPolicy,
        failures: u32,
        max_attempts: u32,
        error: &AlertError,
    ) -> Option<IntakeOutcome> {
        if failures >= max_attempts {
            let exhausted = AlertError::ConnectExhausted {
                attempts: failures,
                last: error.to_string(),
            };
            return Some(IntakeOutcome::Failed(exhausted.to_string()));
        }
        let delay = policy.backoff(failures);
        tracing::warn!(
            attempt = failures,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "firehose connection failed, backing off"
        );
        self.sleep(delay);
        None
    }

    /// Move frames from one connected stream into the queue.
    fn pump(
        &self,
        stream: &mut dyn FrameStream,
        resume: &mut Option<Seq>,
        meter: &mut ThroughputMeter,
    ) -> SessionEnd {
        let mut last_refresh = Instant::now();

        loop {
            if self.should_stop() {
                return SessionEnd::Stopped;
            }
            if last_refresh.elapsed() >= self.inner.config.refresh_interval {
                self.refresh(resume);
                last_refresh = Instant::now();
            }

            let bytes = match stream.next_event() {
                Ok(StreamEvent::Frame(bytes)) => bytes,
                Ok(StreamEvent::Idle) => {
                    meter.maybe_report();
                    continue;
                }
                Ok(StreamEvent::End) => return SessionEnd::Ended,
                Err(e) if e.is_fatal() => return SessionEnd::Failed(e),
                Err(e) => return SessionEnd::Dropped(e),
            };

            match Frame::peek_header(&bytes) {
                Ok(header) if header.is_error() => {
                    let error = Frame::decode(&bytes)
                        .ok()
                        .and_then(Frame::into_stream_error)
                        .unwrap_or_else(|| AlertError::Frame("undecodable error frame".into()));
                    return if error.is_transient() {
                        SessionEnd::Dropped(error)
                    } else {
                        SessionEnd::Failed(error)
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    return SessionEnd::Failed(AlertError::Frame(format!(
                        "unreadable frame header: {}",
                        e
                    )))
                }
            }

            match self.inner.queue.push(bytes) {
                Ok(()) => {
                    self.inner.frames.fetch_add(1, Ordering::Relaxed);
                    meter.record();
                }
                Err(AlertError::QueueClosed) => return SessionEnd::Stopped,
                Err(e) => return SessionEnd::Failed(e),
            }
        }
    }

    /// Update the resume parameters and persist the cursor.
    fn refresh(&self, resume: &mut Option<Seq>) {
        if let Some(seq) = self.inner.cursor.current() {
            *resume = Some(seq);
        }
        self.persist_cursor();
    }

    fn persist_cursor(&self) {
        if let Some(file) = &self.inner.cursor_file {
            match file.save_from(&self.inner.cursor) {
                Ok(Some(seq)) => tracing::debug!(cursor = %seq, "cursor persisted"),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, path = %file.path().display(), "cannot persist cursor"),
            }
        }
    }

    fn sleep(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.should_stop() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
