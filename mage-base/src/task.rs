use crate::error::{Error, Result};

/// A one-shot, movable unit of work. Running a `Task` consumes it; a
/// second `run()` call returns [`Error::Consumed`] rather than panicking,
/// since the queues that hold tasks are not in a position to guarantee
/// single delivery on their own.
pub struct Task {
    inner: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Some(Box::new(f)),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(f) => {
                f();
                Ok(())
            }
            None => Err(Error::Consumed),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("consumed", &self.inner.is_none())
            .finish()
    }
}

#[cfg(test)]
mod task_test {
    use super::*;

    #[test]
    fn run_invokes_closure_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut task = Task::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        task.run().unwrap();
        assert!(task.run().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_run_returns_consumed() {
        let mut task = Task::new(|| {});
        task.run().unwrap();
        match task.run() {
            Err(Error::Consumed) => {}
            other => panic!("expected Consumed, got {other:?}"),
        }
    }
}
