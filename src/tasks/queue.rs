//! Deterministic task queue
//!
//! A FIFO queue drained explicitly by its owner. Each task runs isolated:
//! a panicking task is logged and the queue moves on.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use super::{Scheduler, Task};

// == Task Queue ==
#[derive(Default)]
pub struct TaskQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    // == Run Next ==
    /// Runs the oldest queued task. Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        // The borrow ends before the task runs so it can schedule more work.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                run_isolated(task);
                true
            }
            None => false,
        }
    }

    // == Run Until Idle ==
    /// Runs tasks, including ones scheduled along the way, until none remain.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for TaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

fn run_isolated(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(reason = panic_message(&*payload), "scheduled task panicked");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
