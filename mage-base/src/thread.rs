use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::task_loop::TaskLoop;

/// An OS thread that owns a [`TaskLoop`] for its entire lifetime. Starting
/// an already-started `Thread` is a programmer error and returns
/// [`Error::AlreadyStarted`] rather than silently spawning a second
/// thread on top of the first; stopping and joining are both idempotent.
pub struct Thread {
    name: &'static str,
    task_loop: Arc<dyn TaskLoop>,
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    pub fn new(name: &'static str, task_loop: Arc<dyn TaskLoop>) -> Self {
        Self {
            name,
            task_loop,
            handle: None,
        }
    }

    pub fn task_loop(&self) -> &Arc<dyn TaskLoop> {
        &self.task_loop
    }

    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let task_loop = self.task_loop.clone();
        let handle = std::thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || task_loop.run())?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Idempotent: asks the loop to quit. Safe to call whether or not the
    /// thread is currently running.
    pub fn stop(&self) {
        self.task_loop.quit();
    }

    /// Idempotent: joins the spawned thread if one is outstanding. After
    /// joining, the `Thread` can be `start()`ed again.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
