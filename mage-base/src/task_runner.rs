use std::sync::{Arc, Weak};

use crate::task::Task;
use crate::task_loop::PostOnly;

/// A cheaply cloneable, thread-safe handle that posts [`Task`]s onto a
/// particular [`crate::task_loop::TaskLoop`] without keeping it alive.
/// Posting after the loop has been dropped is a silent no-op: callers
/// that hold only a `TaskRunner` have no way to know whether the loop's
/// owning [`crate::thread::Thread`] has already torn down, so dropping
/// the post is the only safe behavior.
#[derive(Clone)]
pub struct TaskRunner {
    target: Weak<dyn PostOnly>,
}

impl TaskRunner {
    pub(crate) fn new(target: Weak<dyn PostOnly>) -> Self {
        Self { target }
    }

    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_task(Task::new(f));
    }

    pub fn post_task(&self, task: Task) {
        if let Some(target) = self.target.upgrade() {
            target.post_task(task);
        }
    }

    pub fn is_loop_alive(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("loop_alive", &self.is_loop_alive())
            .finish()
    }
}
