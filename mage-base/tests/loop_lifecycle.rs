//! Restart and cross-thread-cooperation properties that don't fit
//! naturally as a same-module unit test.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mage_base::scheduling_handles;
use mage_base::task_loop::{TaskLoop, WorkerLoop};
use mage_base::{IoLoop, Task, Thread};

/// A `quit()` requested while nothing is draining the queue latches
/// until the next `run`, which discharges it without touching the
/// queue; the run after that resumes normal operation and processes
/// whatever was left queued.
#[test]
fn latent_quit_blocks_one_run_then_clears() {
    let loop_ = WorkerLoop::new();
    loop_.quit();

    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = ran.clone();
    loop_.post(Task::new(move || ran_clone.store(true, Ordering::SeqCst)));

    loop_.run();
    assert!(
        !ran.load(Ordering::SeqCst),
        "task queued behind a latent quit must not run on the discharging call"
    );

    loop_.run_until_idle();
    assert!(
        ran.load(Ordering::SeqCst),
        "the run after the discharge must process what was left queued"
    );
}

/// A loop that is repeatedly started, stopped and joined carries no
/// memory of the earlier cycles: each restart processes newly posted
/// work exactly as a fresh loop would.
#[test]
fn thread_survives_repeated_stop_start_cycles() {
    let mut thread = Thread::new("worker", WorkerLoop::new());
    for _ in 0..3 {
        thread.start().unwrap();
        thread.stop();
        thread.join();
    }

    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = ran.clone();
    let loop_handle = thread.task_loop().clone();
    loop_handle.post(Task::new(move || ran_clone.store(true, Ordering::SeqCst)));
    loop_handle.quit_when_idle();

    thread.start().unwrap();
    thread.join();
    assert!(ran.load(Ordering::SeqCst));
}

/// S5: `scheduling_handles::io_loop()` resolves only as long as some
/// strong owner (here, the `Thread` that started it) keeps the loop
/// alive; stopping the thread alone doesn't drop it, but tearing the
/// `Thread` down does.
#[test]
fn io_loop_handle_dies_with_its_last_strong_owner() {
    let io_loop = IoLoop::new().unwrap();
    scheduling_handles::set_io_loop(&(io_loop.clone() as Arc<dyn TaskLoop>));
    let mut io_thread = Thread::new("io", io_loop.clone() as Arc<dyn TaskLoop>);
    io_thread.start().unwrap();

    assert!(
        scheduling_handles::io_loop().is_some(),
        "io_loop() must be reachable while the owning thread runs"
    );

    io_thread.stop();
    io_thread.join();
    assert!(
        scheduling_handles::io_loop().is_some(),
        "a stopped-but-not-dropped thread still keeps the loop alive"
    );

    drop(io_thread);
    drop(io_loop);
    assert!(
        scheduling_handles::io_loop().is_none(),
        "io_loop() must return None once every strong owner is gone"
    );
}
