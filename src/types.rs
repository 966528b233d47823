//! Shared identifiers, task model and result formatting.

use std::fmt;

/// Ordinal identity of a worker thread, 1-based.
pub type WorkerId = usize;

/// Unit of work carried through the queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Task {
    name: String,
}

impl Task {
    /// Wrap a task name; the name is the task's whole identity.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Name as written to the result line.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Generate `Task 1` .. `Task count`.
pub fn numbered_tasks(count: usize) -> Vec<Task> {
    (1..=count).map(|n| Task::new(format!("Task {n}"))).collect()
}

const RESULT_MARKER: &str = " completed task: ";

/// Format the line a worker appends to the sink for a finished task.
pub fn result_line(worker: WorkerId, task: &Task) -> String {
    format!("Worker {worker}{RESULT_MARKER}{task}")
}

/// Parse a sink line back into its worker id and task name.
pub fn parse_result_line(line: &str) -> Option<(WorkerId, &str)> {
    let rest = line.strip_prefix("Worker ")?;
    let (worker, task) = rest.split_once(RESULT_MARKER)?;
    let worker = worker.parse::<WorkerId>().ok()?;
    if task.is_empty() {
        return None;
    }
    Some((worker, task))
}

/// What a worker reports once its loop exits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: WorkerId,
    /// Tasks popped and processed, whether or not the write succeeded.
    pub processed: usize,
    pub write_failures: usize,
    pub cancelled: bool,
}
