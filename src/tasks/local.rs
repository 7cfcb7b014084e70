//! Tokio-backed scheduler
//!
//! Dispatches every task with `tokio::task::spawn_local`, so completions run
//! as separate tasks on the current `LocalSet`. A panicking task is
//! contained by tokio and does not affect the others.

use tracing::trace;

use super::{Scheduler, Task};

/// Schedules tasks onto the current `LocalSet`.
///
/// # Panics
/// `schedule` panics if called outside of a `LocalSet` context.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalScheduler;

impl LocalScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for LocalScheduler {
    fn schedule(&self, task: Task) {
        trace!("spawning completion onto local set");
        tokio::task::spawn_local(async move { task() });
    }
}
