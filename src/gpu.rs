//! Time-sliced GPU job arena.
//!
//! Decoded results sometimes need materialization on the render
//! thread (texture uploads, hardware rasterization). The arena is a
//! FIFO of deferred callables drained by the render loop: each frame,
//! [`JobArena::drain`] runs queued jobs until the configured time
//! slice elapses or the queue empties. Dispatching returns a future;
//! dropping that future abandons the job, which the drain observes and
//! skips without executing it.
//!
//! There is exactly one arena per process ([`JobArena::global`]); the
//! render integration owns the drain call.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

/// Default per-frame time slice.
const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(4);

/// Render-thread state handed to every job.
pub struct GpuContext {
    /// Drain pass counter, incremented once per [`JobArena::drain`].
    pub frame: u64,
    state: Option<Box<dyn Any + Send>>,
}

impl GpuContext {
    pub fn new() -> Self {
        Self {
            frame: 0,
            state: None,
        }
    }

    /// Attaches renderer-owned state jobs may downcast to.
    pub fn with_state(state: Box<dyn Any + Send>) -> Self {
        Self {
            frame: 0,
            state: Some(state),
        }
    }

    pub fn state<T: 'static>(&self) -> Option<&T> {
        self.state.as_ref().and_then(|s| s.downcast_ref())
    }

    pub fn state_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.state.as_mut().and_then(|s| s.downcast_mut())
    }
}

impl Default for GpuContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The job future was dropped or the arena went away before the job
/// produced a value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("gpu job discarded before execution")]
pub struct JobAbandoned;

/// Future for a dispatched job's return value. Dropping it abandons
/// the job.
pub struct JobFuture<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> std::future::Future for JobFuture<T> {
    type Output = Result<T, JobAbandoned>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::pin::Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| JobAbandoned))
    }
}

/// Queued callable; returns whether it actually ran.
type QueuedJob = Box<dyn FnOnce(&mut GpuContext) -> bool + Send>;

/// Arena statistics.
#[derive(Debug, Default, Clone)]
pub struct ArenaStats {
    pub executed: u64,
    pub abandoned: u64,
}

/// FIFO queue of deferred render-thread work.
pub struct JobArena {
    queue: Mutex<VecDeque<QueuedJob>>,
    time_slice: Duration,
    frame: AtomicU64,
    executed: AtomicU64,
    abandoned: AtomicU64,
}

impl JobArena {
    pub fn new() -> Self {
        Self::with_time_slice(DEFAULT_TIME_SLICE)
    }

    pub fn with_time_slice(time_slice: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            time_slice,
            frame: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        }
    }

    /// The process-wide arena.
    pub fn global() -> Arc<JobArena> {
        static GLOBAL: OnceLock<Arc<JobArena>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(JobArena::new())).clone()
    }

    /// Enqueues a job and returns a future for its result. Jobs run in
    /// FIFO order with no priorities; a job whose future was dropped is
    /// skipped when its turn comes.
    pub fn dispatch<T, F>(&self, job: F) -> JobFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut GpuContext) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queued: QueuedJob = Box::new(move |ctx| {
            // the promise observes abandonment: a closed channel means
            // nobody wants the result, so skip the work entirely
            if tx.is_closed() {
                return false;
            }
            let _ = tx.send(job(ctx));
            true
        });
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(queued);
        JobFuture { rx }
    }

    /// Runs queued jobs until the time slice is spent or the queue is
    /// empty. Called by the render loop once per frame.
    pub fn drain(&self, ctx: &mut GpuContext) {
        ctx.frame = self.frame.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        loop {
            if started.elapsed() > self.time_slice {
                trace!(
                    remaining = self.len(),
                    "Arena time slice exhausted; deferring to next frame"
                );
                return;
            }
            let job = self
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match job {
                Some(job) => {
                    if job(ctx) {
                        self.executed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.abandoned.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => return,
            }
        }
    }

    /// Number of jobs waiting.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            executed: self.executed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

impl Default for JobArena {
    fn default() -> Self {
        Self::new()
    }
}
