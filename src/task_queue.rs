//! Bounded, closable FIFO task queue shared by one producer and many workers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

use crate::error::QueueError;
use crate::types::Task;

/// Bounded FIFO with one-shot close; blocked consumers drain then see `None`.
pub struct TaskQueue {
    inner: Mutex<TaskQueueState>,
    capacity: usize,
    available: Condvar,
    space: Condvar,
}

struct TaskQueueState {
    queue: VecDeque<Task>,
    closed: bool,
    abandoned: bool,
}

impl TaskQueue {
    /// Create an empty queue holding at most `capacity` tasks.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "task queue capacity must be > 0");
        Self {
            inner: Mutex::new(TaskQueueState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                abandoned: false,
            }),
            capacity,
            available: Condvar::new(),
            space: Condvar::new(),
        }
    }

    /// Push a task, blocking while the queue is full.
    ///
    /// Fails with [`QueueError::Closed`] if the queue is closed before or
    /// while waiting for space, and with [`QueueError::Abandoned`] once no
    /// consumer is left; the task is returned inside the error.
    pub fn push(&self, task: Task) -> Result<(), QueueError> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        loop {
            if guard.closed {
                return Err(QueueError::Closed(task));
            }
            if guard.abandoned {
                return Err(QueueError::Abandoned(task));
            }
            if guard.queue.len() < self.capacity {
                break;
            }
            guard = self.space.wait(guard).expect("condvar wait failed");
        }
        guard.queue.push_back(task);
        self.available.notify_one();
        Ok(())
    }

    /// Try to pop immediately without blocking.
    pub fn try_pop(&self) -> Option<Task> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        let task = guard.queue.pop_front();
        if task.is_some() {
            self.space.notify_one();
        }
        task
    }

    /// Block until a task is available or the queue is closed and drained.
    pub fn pop(&self) -> Option<Task> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        loop {
            if let Some(task) = guard.queue.pop_front() {
                self.space.notify_one();
                return Some(task);
            }
            if guard.closed {
                return None;
            }
            // Wait releases the lock and re-acquires it before returning.
            guard = self.available.wait(guard).expect("condvar wait failed");
        }
    }

    /// Close the queue and wake every blocked consumer and producer.
    ///
    /// Buffered tasks stay retrievable. Closing twice is rejected with
    /// [`QueueError::AlreadyClosed`] and leaves the queue untouched.
    pub fn close(&self) -> Result<(), QueueError> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        if guard.closed {
            return Err(QueueError::AlreadyClosed);
        }
        guard.closed = true;
        self.available.notify_all();
        self.space.notify_all();
        Ok(())
    }

    /// Record that no consumer will pop again and wake blocked producers.
    ///
    /// Called from drop guards, so a poisoned lock is tolerated.
    pub fn abandon(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.abandoned = true;
        self.space.notify_all();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("task queue mutex poisoned").closed
    }

    /// Current number of queued tasks.
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().expect("task queue mutex poisoned");
        guard.queue.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered tasks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
