//! Worker loop: pop, process, append, until the queue reports end-of-stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::sink::ResultSink;
use crate::task_queue::TaskQueue;
use crate::types::{Task, WorkerId, WorkerReport, result_line};

/// The "do the work" step a worker runs for every task it pops.
pub trait TaskProcessor: Send + Sync {
    fn process(&self, worker: WorkerId, task: &Task);
}

impl<F> TaskProcessor for F
where
    F: Fn(WorkerId, &Task) + Send + Sync,
{
    fn process(&self, worker: WorkerId, task: &Task) {
        self(worker, task)
    }
}

/// Fixed blocking delay standing in for real work.
#[derive(Clone, Copy, Debug)]
pub struct SimulatedWork {
    delay: Duration,
}

impl SimulatedWork {
    /// Sleep for `delay` per task; zero skips the sleep.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl TaskProcessor for SimulatedWork {
    fn process(&self, _worker: WorkerId, _task: &Task) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

/// Shared stop flag checked by workers between tasks.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every worker holding this token to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Held by each worker thread; the last one dropped abandons the queue.
///
/// Runs on unwind too, so a producer blocked on a full queue is released
/// even when every worker panicked or was cancelled.
pub struct ConsumerGuard {
    queue: Arc<TaskQueue>,
    live: Arc<AtomicUsize>,
}

impl ConsumerGuard {
    /// Register one consumer; `live` must already count it.
    pub fn new(queue: Arc<TaskQueue>, live: Arc<AtomicUsize>) -> Self {
        Self { queue, live }
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.queue.abandon();
        }
    }
}

/// Everything a worker thread shares with its siblings.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<TaskQueue>,
    pub sink: Arc<dyn ResultSink>,
    pub processor: Arc<dyn TaskProcessor>,
    pub cancel: CancelToken,
}

/// Drain tasks until end-of-stream (or cancellation) and report the count.
pub fn run_worker(worker: WorkerId, ctx: &WorkerContext) -> WorkerReport {
    info!(worker, "worker started");
    let mut report = WorkerReport {
        worker,
        ..WorkerReport::default()
    };

    loop {
        if ctx.cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let Some(task) = ctx.queue.pop() else {
            break;
        };
        info!(worker, task = %task, "processing task");
        ctx.processor.process(worker, &task);
        report.processed += 1;

        if let Err(err) = ctx.sink.append(&result_line(worker, &task)) {
            report.write_failures += 1;
            error!(worker, task = %task, error = %err, "failed to write result");
        }

        if ctx.cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
    }

    if report.cancelled {
        warn!(worker, processed = report.processed, "worker cancelled");
    }
    info!(
        worker,
        processed = report.processed,
        "worker completed {} tasks and is terminating",
        report.processed
    );
    report
}
