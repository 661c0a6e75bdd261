//! A Linux `eventfd(2)` opened in `EFD_SEMAPHORE` mode: each write adds
//! its 8-byte counter value to an internal count, and each read consumes
//! exactly one pending unit, blocking (or, here, only ever being drained
//! after `poll` reports readability) while the count is zero. This gives
//! the IO loop's wakeup channel "N posts => N wakes" semantics with no
//! drops and no duplicate wakeups, matching the posted-task queue's own
//! FIFO delivery guarantee.

use std::os::unix::io::RawFd;

use crate::error::Result;

pub struct EventFd {
    fd: RawFd,
}

impl EventFd {
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_SEMAPHORE) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self { fd })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Increments the semaphore by one, waking a thread blocked reading it.
    pub fn post(&self) {
        let value: u64 = 1;
        unsafe {
            libc::write(
                self.fd,
                &value as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    /// Consumes one pending unit, if any. Called after `poll` reports the
    /// fd readable; non-blocking, so a spurious call when the count is
    /// already zero is harmless.
    pub fn drain(&self) {
        let mut value: u64 = 0;
        unsafe {
            libc::read(
                self.fd,
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

unsafe impl Send for EventFd {}
unsafe impl Sync for EventFd {}
