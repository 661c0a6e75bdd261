//! Process-global and thread-local bookkeeping that lets any code reach
//! "the" UI loop or IO loop, or ask "am I running on the loop I think I
//! am", without threading an explicit reference through every call site.

use std::cell::RefCell;
use std::sync::{Arc, OnceLock, Weak};

use crate::task_loop::TaskLoop;
use crate::task_runner::TaskRunner;

static UI_LOOP: OnceLock<std::sync::Mutex<Weak<dyn TaskLoop>>> = OnceLock::new();
static IO_LOOP: OnceLock<std::sync::Mutex<Weak<dyn TaskLoop>>> = OnceLock::new();

fn slot(cell: &'static OnceLock<std::sync::Mutex<Weak<dyn TaskLoop>>>) -> &'static std::sync::Mutex<Weak<dyn TaskLoop>> {
    cell.get_or_init(|| std::sync::Mutex::new(Weak::<crate::task_loop::WorkerLoop>::new()))
}

/// Registers `task_loop` as the process's UI loop. Intended to be called
/// once, early in process startup.
pub fn set_ui_loop(task_loop: &Arc<dyn TaskLoop>) {
    *slot(&UI_LOOP).lock().unwrap() = Arc::downgrade(task_loop);
}

pub fn ui_loop() -> Option<Arc<dyn TaskLoop>> {
    slot(&UI_LOOP).lock().unwrap().upgrade()
}

/// Registers `task_loop` as the process's IO loop.
pub fn set_io_loop(task_loop: &Arc<dyn TaskLoop>) {
    *slot(&IO_LOOP).lock().unwrap() = Arc::downgrade(task_loop);
}

pub fn io_loop() -> Option<Arc<dyn TaskLoop>> {
    slot(&IO_LOOP).lock().unwrap().upgrade()
}

thread_local! {
    static CURRENT_LOOP: RefCell<Option<Weak<dyn TaskLoop>>> = const { RefCell::new(None) };
}

/// Marks `task_loop` as "the loop this thread runs", to be observed later
/// by [`current_task_loop`] / [`ThreadChecker`]. Called once, from inside
/// the thread that owns the loop, before entering `run()`.
pub fn set_current_task_loop(task_loop: &Arc<dyn TaskLoop>) {
    CURRENT_LOOP.with(|cell| {
        *cell.borrow_mut() = Some(Arc::downgrade(task_loop));
    });
}

pub fn current_task_loop() -> Option<Arc<dyn TaskLoop>> {
    CURRENT_LOOP.with(|cell| cell.borrow().as_ref().and_then(Weak::upgrade))
}

pub fn current_task_runner() -> Option<TaskRunner> {
    current_task_loop().map(|task_loop| task_loop.task_runner())
}

/// Captures "the current loop, right now" and lets later code assert it
/// is still running on that same loop — a cheap way to catch code that
/// accidentally crosses from the IO loop onto the UI loop or vice versa.
pub struct ThreadChecker {
    loop_at_capture: Option<Weak<dyn TaskLoop>>,
}

impl ThreadChecker {
    pub fn capture() -> Self {
        Self {
            loop_at_capture: CURRENT_LOOP.with(|cell| cell.borrow().clone()),
        }
    }

    /// Returns `true` if the calling thread's current loop is the same
    /// loop that was current at `capture()` time.
    pub fn is_current(&self) -> bool {
        let now = CURRENT_LOOP.with(|cell| cell.borrow().clone());
        match (&self.loop_at_capture, &now) {
            (Some(then), Some(now)) => then.ptr_eq(now),
            (None, None) => true,
            _ => false,
        }
    }
}
