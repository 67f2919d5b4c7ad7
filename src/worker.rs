//! Background job worker
//!
//! A single dedicated thread drains a FIFO queue of boxed jobs. Parsing and
//! queries against one translation unit must never interleave, so the whole
//! engine funnels through this one thread.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  queue()   ┌─────────────┐   pop    ┌──────────────┐
//! │  caller  │──────────> │ Mutex+Cond  │────────> │ worker thread│
//! └──────────┘  JobHandle └─────────────┘          └──────────────┘
//! ```
//!
//! Synchronous callers wrap their job in [`SyncJob`] and block on the
//! returned [`JobHandle`] with a deadline. A timed-out job is NOT cancelled:
//! it keeps running on the worker thread, and a later wait on the same
//! handle observes completion once it finishes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Lifecycle of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Executing,
    Completed,
}

/// Result of a bounded wait on a [`JobHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    /// The deadline elapsed first; the job is still queued or executing
    TimedOut,
}

struct JobStatus {
    state: Mutex<JobState>,
    cond: Condvar,
}

impl JobStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new(JobState::Queued),
            cond: Condvar::new(),
        }
    }

    fn advance(&self, state: JobState) {
        *self.state.lock() = state;
        self.cond.notify_all();
    }
}

/// Caller-side view of a queued job
#[derive(Clone)]
pub struct JobHandle {
    id: u64,
    status: Arc<JobStatus>,
}

impl JobHandle {
    /// Queue-order id, for logging
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> JobState {
        *self.status.state.lock()
    }

    /// Block until the job completes or `timeout` elapses.
    ///
    /// Timing out does not cancel the job; calling `wait` again later can
    /// still observe [`WaitOutcome::Completed`].
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.status.state.lock();
        while *state != JobState::Completed {
            if self.status.cond.wait_until(&mut state, deadline).timed_out() {
                return if *state == JobState::Completed {
                    WaitOutcome::Completed
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
        WaitOutcome::Completed
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedJob {
    status: Arc<JobStatus>,
    run: Job,
}

struct WorkerShared {
    queue: Mutex<VecDeque<QueuedJob>>,
    cond: Condvar,
    shutdown: AtomicBool,
}

/// Single-threaded FIFO job runner
pub struct BackgroundWorker {
    shared: Arc<WorkerShared>,
    next_id: AtomicU64,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn new() -> Self {
        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("cbcc-worker".to_string())
            .spawn(move || Self::run_loop(&loop_shared))
            .ok();
        if thread.is_none() {
            tracing::error!("failed to spawn worker thread; jobs will stay queued");
        }

        Self {
            shared,
            next_id: AtomicU64::new(0),
            thread,
        }
    }

    /// Append a job to the queue and wake the worker
    pub fn queue<F>(&self, job: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let status = Arc::new(JobStatus::new());
        let queued = QueuedJob {
            status: Arc::clone(&status),
            run: Box::new(job),
        };

        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(queued);
        }
        self.shared.cond.notify_one();

        tracing::trace!(job = id, "queued background job");
        JobHandle { id, status }
    }

    /// Queue a job producing a value, for synchronous callers.
    ///
    /// The caller blocks on the returned [`SyncJob`]; on timeout the result
    /// slot is simply never read and the job finishes unobserved.
    pub fn queue_sync<R, F>(&self, job: F) -> SyncJob<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let slot: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
        let job_slot = Arc::clone(&slot);
        let handle = self.queue(move || {
            let result = job();
            *job_slot.lock() = Some(result);
        });
        SyncJob { handle, slot }
    }

    /// Number of jobs not yet picked up by the worker
    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    fn run_loop(shared: &WorkerShared) {
        loop {
            let job = {
                let mut queue = shared.queue.lock();
                loop {
                    if let Some(job) = queue.pop_front() {
                        break job;
                    }
                    // Shut down only once the queue is drained
                    if shared.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    shared.cond.wait(&mut queue);
                }
            };

            job.status.advance(JobState::Executing);
            (job.run)();
            job.status.advance(JobState::Completed);
        }
    }

    /// Request shutdown; pending jobs still run before the thread exits
    fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Default for BackgroundWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle plus result slot for a value-producing job
pub struct SyncJob<R> {
    handle: JobHandle,
    slot: Arc<Mutex<Option<R>>>,
}

impl<R> SyncJob<R> {
    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    /// Wait up to `timeout`; `None` means the job is still running
    pub fn wait(&self, timeout: Duration) -> Option<R> {
        match self.handle.wait(timeout) {
            WaitOutcome::Completed => self.slot.lock().take(),
            WaitOutcome::TimedOut => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_run_in_fifo_order() {
        let worker = BackgroundWorker::new();
        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let order = Arc::clone(&order);
            handles.push(worker.queue(move || order.lock().push(i)));
        }
        for handle in &handles {
            assert_eq!(handle.wait(Duration::from_secs(5)), WaitOutcome::Completed);
        }

        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_sync_job_returns_value() {
        let worker = BackgroundWorker::new();
        let job = worker.queue_sync(|| 21 * 2);
        assert_eq!(job.wait(Duration::from_secs(5)), Some(42));
    }

    #[test]
    fn test_timeout_does_not_cancel_job() {
        let worker = BackgroundWorker::new();
        let job = worker.queue_sync(|| {
            std::thread::sleep(Duration::from_millis(150));
            7
        });

        // First wait times out while the job is still running
        assert_eq!(job.wait(Duration::from_millis(20)), None);
        // A later wait on the same handle observes completion
        assert_eq!(job.wait(Duration::from_secs(5)), Some(7));
        assert_eq!(job.handle().state(), JobState::Completed);
    }

    #[test]
    fn test_handle_state_transitions() {
        let worker = BackgroundWorker::new();
        let handle = worker.queue(|| {});
        assert_eq!(handle.wait(Duration::from_secs(5)), WaitOutcome::Completed);
        assert_eq!(handle.state(), JobState::Completed);
    }

    #[test]
    fn test_shutdown_drains_pending_jobs() {
        let counter = Arc::new(AtomicU64::new(0));
        let handles: Vec<JobHandle>;
        {
            let worker = BackgroundWorker::new();
            handles = (0..16)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    worker.queue(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();
            // Drop requests shutdown and joins; queued jobs still run
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        for handle in &handles {
            assert_eq!(handle.state(), JobState::Completed);
        }
    }
}
