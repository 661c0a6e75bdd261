use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::sync::{ConditionVariable, Mutex};
use crate::task::Task;
use crate::task_runner::TaskRunner;

/// Common contract implemented by every task loop flavor (`Worker`, `Ui`,
/// `Io`). A `TaskLoop` owns a FIFO of posted [`Task`]s and a thread of
/// control that drains it; `run()` blocks the calling thread until
/// `quit()`/`quit_when_idle()` is observed.
pub trait TaskLoop: Send + Sync {
    /// Runs until `quit()` is called from another thread, or a task run
    /// from inside the loop calls it.
    fn run(&self);

    /// Runs until the queue is empty, then returns without blocking for
    /// more work.
    fn run_until_idle(&self);

    /// Posts `task` to the queue. Wakes a thread blocked in `run()`.
    fn post(&self, task: Task);

    /// Requests the loop stop as soon as the task currently running (if
    /// any) returns; does not drain the remaining queue.
    fn quit(&self);

    /// Requests the loop stop once the queue is empty.
    fn quit_when_idle(&self);

    /// Returns a `Task` that, when run, calls `quit()` on this loop. Used
    /// to post a "stop" message into the loop from outside.
    fn quit_closure(self: Arc<Self>) -> Task {
        let this = self.clone();
        Task::new(move || this.quit())
    }

    /// A `TaskRunner` handle that posts back onto this loop.
    ///
    /// Takes `&self`, not `self: &Arc<Self>`: a reference-to-smart-pointer
    /// receiver isn't dispatchable through a vtable (only `Arc<Self>`,
    /// `Box<Self>` and the like are, per `quit_closure` above), and this
    /// method has to be callable on a bare `dyn TaskLoop` (see
    /// `scheduling_handles::current_task_runner`). Implementors can't
    /// derive a `Weak` to themselves from `&self` alone, so each one
    /// keeps a `Weak<Self>` to itself, set up once via `Arc::new_cyclic`.
    fn task_runner(&self) -> TaskRunner;
}

#[derive(Debug, Default)]
pub(crate) struct Queue {
    pub(crate) tasks: VecDeque<Task>,
    pub(crate) quit: bool,
    pub(crate) quit_when_idle: bool,
}

impl Queue {
    fn should_wake(&self) -> bool {
        self.quit || !self.tasks.is_empty()
    }
}

/// Shared FIFO-queue machinery used by [`WorkerLoop`] (and, transitively,
/// `UiLoop`, which is the same implementation under a different name per
/// the specification: the UI loop has no behavior distinct from a worker
/// loop in this system).
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(crate) mutex: Mutex<Queue>,
    pub(crate) condvar: ConditionVariable,
}

impl QueueState {
    pub(crate) fn new() -> Self {
        Self {
            mutex: Mutex::new(Queue::default()),
            condvar: ConditionVariable::new(),
        }
    }

    pub(crate) fn post(&self, task: Task) {
        let mut guard = self.mutex.lock();
        guard.tasks.push_back(task);
        drop(guard);
        self.condvar.notify_one();
    }

    pub(crate) fn quit(&self) {
        let mut guard = self.mutex.lock();
        guard.quit = true;
        drop(guard);
        self.condvar.notify_all();
    }

    pub(crate) fn quit_when_idle(&self) {
        let mut guard = self.mutex.lock();
        guard.quit_when_idle = true;
        drop(guard);
        self.condvar.notify_all();
    }

    /// Runs the drain loop. `idle_only` makes it return as soon as the
    /// queue empties rather than blocking for more work.
    ///
    /// `quit` is a one-shot signal, not a tombstone: a `quit()` issued
    /// while nothing is draining the queue latches until the next call
    /// to `run`/`run_until_idle`, which discharges it immediately
    /// (returning without touching the queue) and clears it, so a
    /// restarted loop resumes normal operation rather than exiting
    /// forever on every subsequent call.
    pub(crate) fn run(&self, idle_only: bool) {
        loop {
            let mut guard = self.mutex.lock();
            if !idle_only {
                guard = self.condvar.wait(guard, |q| q.should_wake());
            }
            if guard.quit {
                guard.quit = false;
                return;
            }
            let task = guard.tasks.pop_front();
            let now_empty = guard.tasks.is_empty();
            let quit_when_idle = guard.quit_when_idle;
            drop(guard);

            match task {
                Some(mut task) => {
                    let _ = task.run();
                }
                None => {
                    if idle_only || quit_when_idle {
                        return;
                    }
                    continue;
                }
            }

            if now_empty && quit_when_idle {
                return;
            }
            if idle_only && now_empty {
                return;
            }
        }
    }
}

/// Runs tasks strictly in FIFO order on whichever thread calls `run()`.
/// Used both as the `Worker` and the `Ui` loop flavor (spec treats `Ui`
/// as a `Worker` loop with no additional behavior).
#[derive(Debug)]
pub struct WorkerLoop {
    state: QueueState,
    self_weak: Weak<WorkerLoop>,
}

impl WorkerLoop {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: QueueState::new(),
            self_weak: weak.clone(),
        })
    }
}

impl TaskLoop for WorkerLoop {
    fn run(&self) {
        self.state.run(false);
    }

    fn run_until_idle(&self) {
        self.state.run(true);
    }

    fn post(&self, task: Task) {
        self.state.post(task);
    }

    fn quit(&self) {
        self.state.quit();
    }

    fn quit_when_idle(&self) {
        self.state.quit_when_idle();
    }

    fn task_runner(&self) -> TaskRunner {
        TaskRunner::new(self.self_weak.clone() as Weak<dyn PostOnly>)
    }
}

/// Alias for the UI loop flavor: identical machinery to [`WorkerLoop`],
/// named separately because callers reason about "the UI loop" as a
/// distinct, singular instance per process.
pub type UiLoop = WorkerLoop;

pub(crate) trait PostOnly: Send + Sync {
    fn post_task(&self, task: Task);
}

impl<T: TaskLoop + ?Sized> PostOnly for T {
    fn post_task(&self, task: Task) {
        TaskLoop::post(self, task)
    }
}
