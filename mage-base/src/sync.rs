//! Thin wrappers over `std::sync::{Mutex, Condvar}` giving the
//! lock/wait/notify contract the scheduling substrate is built on.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, MutexGuard as StdMutexGuard};

/// A mutex guarding a value of type `T`.
///
/// This is a plain pass-through wrapper; it exists so the rest of the
/// crate names its lock type independently of `std::sync`, the same way
/// `sctp::mutex::Mutex` wraps `std::sync::Mutex` one layer down.
#[derive(Debug)]
pub struct Mutex<T> {
    inner: std::sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: std::sync::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            guard: self.inner.lock().unwrap(),
        }
    }
}

pub struct MutexGuard<'a, T> {
    guard: StdMutexGuard<'a, T>,
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

/// A condition variable that waits against a predicate, atomically
/// releasing and reacquiring the associated `Mutex` lock and tolerating
/// spurious wakeups.
#[derive(Debug, Default)]
pub struct ConditionVariable {
    inner: Condvar,
}

impl ConditionVariable {
    pub fn new() -> Self {
        Self {
            inner: Condvar::new(),
        }
    }

    /// Blocks `guard`'s lock until `predicate` returns true, re-checking
    /// it after every wakeup (spurious or not).
    pub fn wait<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        let guard = self
            .inner
            .wait_while(guard.guard, |value| !predicate(value))
            .unwrap();
        MutexGuard { guard }
    }

    pub fn notify_one(&self) {
        self.inner.notify_one();
    }

    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}
