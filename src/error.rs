//! Error types for the queue, the result sink and the pool coordinator.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Task, WorkerId};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// Push attempted after close; the task is handed back to the caller.
    #[error("task queue is closed, rejected task: {0}")]
    Closed(Task),

    /// Every consumer has exited, so a blocked push would never complete.
    #[error("no workers left to consume task: {0}")]
    Abandoned(Task),

    #[error("task queue closed twice")]
    AlreadyClosed,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to open output file {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to output file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output file lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("queue capacity must be > 0")]
    ZeroCapacity,

    #[error("worker count must be > 0")]
    ZeroWorkers,

    #[error("invalid set value: {0}")]
    InvalidSet(String),

    #[error("task name must be a single line: {0:?}")]
    MultiLineTask(String),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("queue lifecycle violated: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to spawn worker {worker}")]
    Spawn {
        worker: WorkerId,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {0} panicked")]
    WorkerPanicked(WorkerId),

    #[error("workers processed {processed} tasks but {delivered} were enqueued")]
    CountMismatch { processed: usize, delivered: usize },
}
