use std::os::unix::io::RawFd;
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::reactor::{EpollReactor, Reactor};
use crate::task::Task;
use crate::task_loop::{PostOnly, QueueState, TaskLoop};
use crate::task_runner::TaskRunner;

/// A task loop that, in addition to draining its posted-task queue, also
/// watches a set of file descriptors for readability and invokes a
/// per-fd callback when one becomes ready. Used for `Channel`'s
/// transport reads.
pub struct IoLoop<R: Reactor = EpollReactor> {
    state: QueueState,
    reactor: R,
    watchers: crate::sync::Mutex<std::collections::HashMap<RawFd, Box<dyn Fn() + Send + Sync>>>,
    self_weak: Weak<IoLoop<R>>,
}

impl IoLoop<EpollReactor> {
    pub fn new() -> Result<Arc<Self>> {
        let reactor = EpollReactor::new()?;
        Ok(Arc::new_cyclic(|weak| Self {
            state: QueueState::new(),
            reactor,
            watchers: crate::sync::Mutex::new(std::collections::HashMap::new()),
            self_weak: weak.clone(),
        }))
    }
}

impl<R: Reactor> IoLoop<R> {
    pub fn watch_fd<F>(&self, fd: RawFd, on_readable: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.reactor.watch_fd(fd)?;
        self.watchers.lock().insert(fd, Box::new(on_readable));
        Ok(())
    }

    pub fn unwatch_fd(&self, fd: RawFd) -> Result<()> {
        self.reactor.unwatch_fd(fd)?;
        self.watchers.lock().remove(&fd);
        Ok(())
    }

    fn drain_tasks_until_empty(&self) {
        loop {
            let mut guard = self.state.mutex.lock();
            let task = guard.tasks.pop_front();
            drop(guard);
            match task {
                Some(mut task) => {
                    let _ = task.run();
                }
                None => return,
            }
        }
    }

    fn poll_once(&self, timeout: Option<std::time::Duration>) {
        if let Ok(ready) = self.reactor.poll(timeout) {
            for fd in ready {
                let watchers = self.watchers.lock();
                if let Some(callback) = watchers.get(&fd) {
                    callback();
                }
            }
        }
    }

    fn should_quit(&self) -> bool {
        let guard = self.state.mutex.lock();
        guard.quit
    }

    fn is_idle(&self) -> bool {
        let guard = self.state.mutex.lock();
        guard.tasks.is_empty()
    }

    fn quit_when_idle_requested(&self) -> bool {
        let guard = self.state.mutex.lock();
        guard.quit_when_idle
    }
}

impl<R: Reactor> TaskLoop for IoLoop<R> {
    fn run(&self) {
        loop {
            self.drain_tasks_until_empty();
            if self.should_quit() {
                return;
            }
            if self.quit_when_idle_requested() && self.is_idle() {
                return;
            }
            self.poll_once(None);
            if self.should_quit() {
                return;
            }
        }
    }

    fn run_until_idle(&self) {
        self.drain_tasks_until_empty();
        self.poll_once(Some(std::time::Duration::from_millis(0)));
        self.drain_tasks_until_empty();
    }

    fn post(&self, task: Task) {
        self.state.post(task);
        self.reactor.wake();
    }

    fn quit(&self) {
        self.state.quit();
        self.reactor.wake();
    }

    fn quit_when_idle(&self) {
        self.state.quit_when_idle();
        self.reactor.wake();
    }

    fn task_runner(&self) -> TaskRunner {
        TaskRunner::new(self.self_weak.clone() as Weak<dyn PostOnly>)
    }
}

#[cfg(test)]
mod task_loop_for_io_test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_until_idle_drains_posted_tasks_without_blocking() {
        let io_loop = IoLoop::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = counter.clone();
            io_loop.post(Task::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        io_loop.run_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn n_posts_from_another_thread_wake_run_n_times_worth_of_work() {
        let io_loop = IoLoop::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let runner = io_loop.task_runner();

        let poster = {
            let counter = counter.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    let counter = counter.clone();
                    runner.post(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        };
        poster.join().unwrap();

        let quit_runner = io_loop.task_runner();
        quit_runner.post_task(Task::new({
            let io_loop = io_loop.clone();
            move || io_loop.quit()
        }));
        io_loop.run();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn watch_and_unwatch_fd_round_trip() {
        let io_loop = IoLoop::new().unwrap();
        let (r, w) = std::os::unix::net::UnixStream::pair().unwrap();
        use std::os::unix::io::AsRawFd;
        let fd = r.as_raw_fd();
        io_loop.watch_fd(fd, || {}).unwrap();
        assert!(io_loop.watch_fd(fd, || {}).is_err());
        io_loop.unwatch_fd(fd).unwrap();
        drop(w);
    }
}
