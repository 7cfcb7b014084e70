//! Scheduling Module
//!
//! Every completion the cache delivers goes through an injected
//! [`Scheduler`], so callers never observe a completion running inside the
//! `get` call that requested it.
//!
//! # Schedulers
//! - [`TaskQueue`]: deterministic FIFO queue drained by the owner
//! - [`LocalScheduler`]: spawns each task onto the current tokio `LocalSet`

mod local;
mod queue;

use std::rc::Rc;

pub use local::LocalScheduler;
pub(crate) use queue::panic_message;
pub use queue::TaskQueue;

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Runs tasks on a later turn of the executing context.
///
/// Implementations must never run `task` before `schedule` returns, and
/// must run tasks in the order they were scheduled.
pub trait Scheduler {
    fn schedule(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task)
    }
}
