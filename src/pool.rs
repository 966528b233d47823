//! Pool coordinator: fill and close the queue, run the workers, join them all.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{Dispatch, debug, error, info, warn};

use crate::error::{ConfigError, PoolError, QueueError};
use crate::sink::ResultSink;
use crate::task_queue::TaskQueue;
use crate::types::{Task, WorkerId, WorkerReport};
use crate::usage::{cpu_delta, cpu_times_seconds};
use crate::worker::{CancelToken, ConsumerGuard, TaskProcessor, WorkerContext, run_worker};

/// Sizing and input of one pool run; fixed once the run starts.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub capacity: usize,
    pub workers: usize,
    pub tasks: Vec<Task>,
}

impl PoolConfig {
    /// Reject sizes the queue and pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}

/// Coordinator lifecycle, in the order a run normally walks through it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolPhase {
    Idle,
    Filling,
    Closed,
    Running,
    Draining,
    Joined,
}

/// Outcome of a run, built only after every worker has been joined.
#[derive(Debug)]
pub struct PoolSummary {
    pub enqueued: usize,
    pub rejected: Vec<Task>,
    pub reports: Vec<WorkerReport>,
    pub elapsed: Duration,
    pub cpu_user_s: Option<f64>,
    pub cpu_sys_s: Option<f64>,
}

impl PoolSummary {
    /// Tasks popped across all workers.
    pub fn processed(&self) -> usize {
        self.reports.iter().map(|r| r.processed).sum()
    }

    /// Lines lost to sink errors.
    pub fn write_failures(&self) -> usize {
        self.reports.iter().map(|r| r.write_failures).sum()
    }

    /// Whether any worker stopped on the cancel token.
    pub fn cancelled(&self) -> bool {
        self.reports.iter().any(|r| r.cancelled)
    }
}

/// Owns one run: the queue lifecycle, the worker threads and their join.
pub struct Coordinator {
    config: PoolConfig,
    dispatch: Dispatch,
    cancel: CancelToken,
    phase: PoolPhase,
}

impl Coordinator {
    /// Validate `config`; `dispatch` receives every log event of the run.
    pub fn new(config: PoolConfig, dispatch: Dispatch) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            config,
            dispatch,
            cancel: CancelToken::new(),
            phase: PoolPhase::Idle,
        })
    }

    /// Token that stops every worker at its next task boundary.
    #[cfg(test)]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Phase the last run reached.
    #[cfg(test)]
    pub fn phase(&self) -> PoolPhase {
        self.phase
    }

    /// Run the pool to completion with the given sink and processing step.
    pub fn run(
        &mut self,
        sink: Arc<dyn ResultSink>,
        processor: Arc<dyn TaskProcessor>,
    ) -> Result<PoolSummary, PoolError> {
        let dispatch = self.dispatch.clone();
        tracing::dispatcher::with_default(&dispatch, || self.run_inner(sink, processor))
    }

    fn transition(&mut self, next: PoolPhase) {
        debug!(from = ?self.phase, to = ?next, "pool phase change");
        self.phase = next;
    }

    fn run_inner(
        &mut self,
        sink: Arc<dyn ResultSink>,
        processor: Arc<dyn TaskProcessor>,
    ) -> Result<PoolSummary, PoolError> {
        let queue = Arc::new(TaskQueue::new(self.config.capacity));
        info!(
            capacity = queue.capacity(),
            workers = self.config.workers,
            tasks = self.config.tasks.len(),
            "task pool starting up"
        );
        let ctx = WorkerContext {
            queue: Arc::clone(&queue),
            sink,
            processor,
            cancel: self.cancel.clone(),
        };

        let cpu_start = cpu_times_seconds();
        let start = Instant::now();

        // A task list larger than the queue needs running consumers, or the
        // producer would block forever on a full queue.
        let spawn_first = self.config.tasks.len() > self.config.capacity;
        let mut handles = Vec::new();
        if spawn_first {
            handles = self.spawn_workers(&ctx)?;
        }

        self.transition(PoolPhase::Filling);
        let tasks = std::mem::take(&mut self.config.tasks);
        let (enqueued, rejected) = fill(&queue, tasks);

        self.transition(PoolPhase::Closed);
        info!("closing task queue, no more tasks will be accepted");
        if let Err(err) = queue.close() {
            error!(error = %err, "task queue close failed");
            let _ = join_all(handles);
            return Err(err.into());
        }

        if !spawn_first {
            handles = self.spawn_workers(&ctx)?;
        }
        drop(ctx);

        self.transition(PoolPhase::Draining);
        info!("waiting for all workers to complete");
        let reports = join_all(handles)?;
        self.transition(PoolPhase::Joined);

        // Only a cancelled run may leave tasks behind.
        let mut leftover = 0usize;
        while queue.try_pop().is_some() {
            leftover += 1;
        }
        if leftover > 0 {
            warn!(leftover, closed = queue.is_closed(), "tasks left in queue after join");
        }

        let elapsed = start.elapsed();
        let (cpu_user_s, cpu_sys_s) = cpu_delta(cpu_start, cpu_times_seconds());
        let summary = PoolSummary {
            enqueued,
            rejected,
            reports,
            elapsed,
            cpu_user_s,
            cpu_sys_s,
        };

        let processed = summary.processed();
        if !summary.cancelled() && processed != enqueued {
            return Err(PoolError::CountMismatch {
                processed,
                delivered: enqueued,
            });
        }
        info!(
            processed,
            write_failures = summary.write_failures(),
            elapsed_ms = elapsed.as_millis() as u64,
            "all workers have completed, system shutting down"
        );
        Ok(summary)
    }

    fn spawn_workers(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<Vec<(WorkerId, thread::JoinHandle<WorkerReport>)>, PoolError> {
        self.transition(PoolPhase::Running);
        info!(workers = self.config.workers, "starting worker threads");
        let mut handles = Vec::with_capacity(self.config.workers);
        let live = Arc::new(AtomicUsize::new(self.config.workers));
        for worker in 1..=self.config.workers {
            let worker_ctx = ctx.clone();
            let dispatch = self.dispatch.clone();
            // Created before the spawn so a failed spawn still drops it.
            let consumer = ConsumerGuard::new(Arc::clone(&ctx.queue), Arc::clone(&live));
            let spawned = thread::Builder::new()
                .name(format!("worker-{worker}"))
                .spawn(move || {
                    let _consumer = consumer;
                    let _log = tracing::dispatcher::set_default(&dispatch);
                    run_worker(worker, &worker_ctx)
                });
            match spawned {
                Ok(handle) => handles.push((worker, handle)),
                Err(source) => {
                    error!(worker, error = %source, "failed to spawn worker");
                    // Release already-running workers before bailing out.
                    self.cancel.cancel();
                    let _ = ctx.queue.close();
                    let _ = join_all(handles);
                    return Err(PoolError::Spawn { worker, source });
                }
            }
        }
        Ok(handles)
    }
}

/// Push every task, logging and collecting the ones the queue rejects.
fn fill(queue: &TaskQueue, tasks: Vec<Task>) -> (usize, Vec<Task>) {
    info!(count = tasks.len(), "adding tasks to the queue");
    let mut enqueued = 0usize;
    let mut rejected = Vec::new();
    for task in tasks {
        info!(task = %task, "adding task to queue");
        match queue.push(task) {
            Ok(()) => enqueued += 1,
            Err(err) => {
                error!(error = %err, "failed to add task");
                match err {
                    QueueError::Closed(task) | QueueError::Abandoned(task) => {
                        rejected.push(task)
                    }
                    QueueError::AlreadyClosed => {}
                }
            }
        }
    }
    (enqueued, rejected)
}

/// Join barrier: returns only once every handle has been joined.
fn join_all(
    handles: Vec<(WorkerId, thread::JoinHandle<WorkerReport>)>,
) -> Result<Vec<WorkerReport>, PoolError> {
    let mut reports = Vec::with_capacity(handles.len());
    let mut panicked = None;
    for (worker, handle) in handles {
        match handle.join() {
            Ok(report) => reports.push(report),
            Err(_) => {
                error!(worker, "worker thread panicked");
                panicked.get_or_insert(worker);
            }
        }
    }
    match panicked {
        Some(worker) => Err(PoolError::WorkerPanicked(worker)),
        None => Ok(reports),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::silent_dispatch;
    use crate::sink::FileSink;
    use crate::types::{numbered_tasks, parse_result_line};
    use crate::worker::SimulatedWork;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::{Mutex, mpsc};

    fn config(capacity: usize, workers: usize, tasks: usize) -> PoolConfig {
        PoolConfig {
            capacity,
            workers,
            tasks: numbered_tasks(tasks),
        }
    }

    fn no_work() -> Arc<dyn TaskProcessor> {
        Arc::new(SimulatedWork::new(Duration::ZERO))
    }

    fn run_to_file(config: PoolConfig, path: &Path) -> PoolSummary {
        let mut coordinator = Coordinator::new(config, silent_dispatch()).expect("valid config");
        let summary = coordinator
            .run(Arc::new(FileSink::new(path)), no_work())
            .expect("pool run");
        assert_eq!(coordinator.phase(), PoolPhase::Joined);
        summary
    }

    #[test]
    fn ten_tasks_five_workers_write_ten_lines() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("output.txt");
        let summary = run_to_file(config(10, 5, 10), &path);

        assert_eq!(summary.enqueued, 10);
        assert_eq!(summary.processed(), 10);
        assert_eq!(summary.reports.len(), 5);

        let contents = std::fs::read_to_string(&path).expect("read output");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 10);
        let mut tasks = HashSet::new();
        for line in lines {
            let (worker, task) = parse_result_line(line).expect("well-formed line");
            assert!((1..=5).contains(&worker), "bad worker in {line}");
            let number: usize = task
                .strip_prefix("Task ")
                .and_then(|n| n.parse().ok())
                .expect("task number");
            assert!((1..=10).contains(&number));
            assert!(tasks.insert(number), "task {number} written twice");
        }
        assert_eq!(tasks.len(), 10);
    }

    #[test]
    fn zero_tasks_join_without_deadlock() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("output.txt");
        let summary = run_to_file(config(10, 5, 0), &path);

        assert_eq!(summary.reports.len(), 5);
        assert!(summary.reports.iter().all(|r| r.processed == 0));
        assert!(!path.exists());
    }

    #[test]
    fn more_tasks_than_capacity_do_not_deadlock() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("output.txt");
        let summary = run_to_file(config(2, 3, 50), &path);

        assert_eq!(summary.enqueued, 50);
        assert_eq!(summary.processed(), 50);
        let contents = std::fs::read_to_string(&path).expect("read output");
        assert_eq!(contents.lines().count(), 50);
    }

    #[test]
    fn join_waits_for_slow_workers() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("output.txt");
        let finished = Arc::new(Mutex::new(Vec::new()));
        let processor = {
            let finished = Arc::clone(&finished);
            move |worker: WorkerId, task: &Task| {
                thread::sleep(Duration::from_millis(20));
                finished
                    .lock()
                    .expect("finished mutex poisoned")
                    .push((worker, task.name().to_string()));
            }
        };

        let mut coordinator =
            Coordinator::new(config(8, 4, 8), silent_dispatch()).expect("valid config");
        let summary = coordinator
            .run(Arc::new(FileSink::new(&path)), Arc::new(processor))
            .expect("pool run");

        // Every processing step finished before run returned.
        assert_eq!(finished.lock().expect("finished mutex poisoned").len(), 8);
        let per_worker: usize = summary.reports.iter().map(|r| r.processed).sum();
        assert_eq!(per_worker, 8);
    }

    #[test]
    fn write_failures_are_counted_not_fatal() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("missing").join("output.txt");
        let mut coordinator =
            Coordinator::new(config(4, 2, 4), silent_dispatch()).expect("valid config");
        let summary = coordinator
            .run(Arc::new(FileSink::new(&path)), no_work())
            .expect("pool run");

        assert_eq!(summary.processed(), 4);
        assert_eq!(summary.write_failures(), 4);
    }

    #[test]
    fn cancelled_run_stops_early() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("output.txt");
        let mut coordinator =
            Coordinator::new(config(20, 2, 20), silent_dispatch()).expect("valid config");
        let cancel = coordinator.cancel_token();
        let processor = move |_: WorkerId, _: &Task| cancel.cancel();

        let summary = coordinator
            .run(Arc::new(FileSink::new(&path)), Arc::new(processor))
            .expect("pool run");
        assert!(summary.cancelled());
        assert!(summary.processed() < 20);
    }

    /// Run on a side thread so a stuck coordinator fails the test instead of hanging it.
    fn run_with_deadline(
        mut coordinator: Coordinator,
        processor: Arc<dyn TaskProcessor>,
    ) -> Result<PoolSummary, PoolError> {
        let dir = tempfile::tempdir().expect("create temp dir");
        let sink = Arc::new(FileSink::new(dir.path().join("output.txt")));
        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = done_tx.send(coordinator.run(sink, processor));
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("coordinator run did not return")
    }

    #[test]
    fn cancel_with_more_tasks_than_capacity_returns() {
        let coordinator =
            Coordinator::new(config(1, 1, 6), silent_dispatch()).expect("valid config");
        let cancel = coordinator.cancel_token();
        let processor = move |_: WorkerId, _: &Task| cancel.cancel();

        let summary =
            run_with_deadline(coordinator, Arc::new(processor)).expect("pool run");
        assert!(summary.cancelled());
        assert_eq!(summary.processed(), 1);
        // Whatever the stopped worker never took was rejected, not lost.
        assert_eq!(summary.enqueued + summary.rejected.len(), 6);
        assert!(!summary.rejected.is_empty());
    }

    #[test]
    fn panicking_workers_with_more_tasks_than_capacity_return() {
        let coordinator =
            Coordinator::new(config(1, 1, 6), silent_dispatch()).expect("valid config");
        let processor = |_: WorkerId, task: &Task| {
            if task.name().starts_with("Task") {
                panic!("worker fails on {task}");
            }
        };

        let result = run_with_deadline(coordinator, Arc::new(processor));
        assert!(matches!(result, Err(PoolError::WorkerPanicked(1))));
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            Coordinator::new(config(0, 1, 1), silent_dispatch()),
            Err(PoolError::Config(ConfigError::ZeroCapacity))
        ));
        assert!(matches!(
            Coordinator::new(config(1, 0, 1), silent_dispatch()),
            Err(PoolError::Config(ConfigError::ZeroWorkers))
        ));
    }

    #[test]
    fn worker_panic_is_reported_after_join() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("output.txt");
        let processor = |_: WorkerId, task: &Task| {
            if task.name() == "Task 3" {
                panic!("task 3 fails");
            }
        };
        let mut coordinator =
            Coordinator::new(config(6, 3, 6), silent_dispatch()).expect("valid config");
        let result = coordinator.run(Arc::new(FileSink::new(&path)), Arc::new(processor));
        assert!(matches!(result, Err(PoolError::WorkerPanicked(_))));
    }
}
