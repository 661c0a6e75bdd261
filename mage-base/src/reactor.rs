use std::os::unix::io::RawFd;

use crate::error::Result;

/// Readiness-notification abstraction an `IoLoop` polls alongside its
/// task queue. The one production implementation, [`EpollReactor`], is
/// backed by `mio`; the trait exists so the loop's wakeup/drain logic
/// stays independent of the concrete polling mechanism, the way the
/// original separates `TaskLoopForIO` from its per-platform backend.
pub trait Reactor: Send + Sync {
    /// Starts watching `fd` for readability. Re-registering an
    /// already-watched fd is an error.
    fn watch_fd(&self, fd: RawFd) -> Result<()>;

    /// Stops watching `fd`. Unwatching an fd not currently watched is an
    /// error.
    fn unwatch_fd(&self, fd: RawFd) -> Result<()>;

    /// Blocks until at least one watched fd is readable, or `timeout` (if
    /// `Some`) elapses, returning the list of fds observed readable. A
    /// `None` timeout blocks indefinitely.
    fn poll(&self, timeout: Option<std::time::Duration>) -> Result<Vec<RawFd>>;

    /// Wakes a thread currently blocked in `poll()`, without requiring a
    /// watched fd to have become readable. Used by `post`/`quit` to break
    /// the loop out of a blocking wait.
    fn wake(&self);
}

pub mod epoll {
    use super::*;
    use mio::unix::SourceFd;
    use mio::{Events, Interest, Poll, Registry, Token};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const WAKE_TOKEN: Token = Token(usize::MAX);

    struct Tokens {
        tokens: HashMap<RawFd, Token>,
        next_token: usize,
    }

    /// `mio`-backed reactor. Linux's `mio::Poll` is an epoll wrapper;
    /// other unix targets get `mio`'s kqueue backend transparently
    /// through the same type, which is why this lives under one `epoll`
    /// module rather than per-OS modules as the original source does.
    ///
    /// `poll` and `tokens` are separate mutexes on purpose: `poll()` is
    /// the one place that blocks, potentially for a long time, on the
    /// IO loop's own thread, while `watch_fd`/`unwatch_fd` are called
    /// from whatever thread is setting up a `Channel` and must not wait
    /// on that blocking call to return. `registry` is `Poll`'s registry
    /// cloned once up front (`Registry::try_clone`), which `mio`
    /// supports registering/deregistering through concurrently with an
    /// in-progress `poll()` on the original handle.
    pub struct EpollReactor {
        poll: Mutex<Poll>,
        registry: Registry,
        tokens: Mutex<Tokens>,
        wake_fd: crate::eventfd::EventFd,
    }

    impl EpollReactor {
        pub fn new() -> Result<Self> {
            let poll = Poll::new()?;
            let registry = poll.registry().try_clone()?;
            let wake_fd = crate::eventfd::EventFd::new()?;
            registry.register(&mut SourceFd(&wake_fd.raw_fd()), WAKE_TOKEN, Interest::READABLE)?;
            Ok(Self {
                poll: Mutex::new(poll),
                registry,
                tokens: Mutex::new(Tokens {
                    tokens: HashMap::new(),
                    next_token: 0,
                }),
                wake_fd,
            })
        }
    }

    impl Reactor for EpollReactor {
        fn watch_fd(&self, fd: RawFd) -> Result<()> {
            let mut tokens = self.tokens.lock().unwrap();
            if tokens.tokens.contains_key(&fd) {
                return Err(crate::error::Error::Invariant("fd already watched"));
            }
            let token = Token(tokens.next_token);
            tokens.next_token += 1;
            self.registry.register(&mut SourceFd(&fd), token, Interest::READABLE)?;
            tokens.tokens.insert(fd, token);
            Ok(())
        }

        fn unwatch_fd(&self, fd: RawFd) -> Result<()> {
            let mut tokens = self.tokens.lock().unwrap();
            if tokens.tokens.remove(&fd).is_none() {
                return Err(crate::error::Error::Invariant("fd not watched"));
            }
            self.registry.deregister(&mut SourceFd(&fd))?;
            Ok(())
        }

        fn poll(&self, timeout: Option<std::time::Duration>) -> Result<Vec<RawFd>> {
            let mut events = Events::with_capacity(64);
            self.poll.lock().unwrap().poll(&mut events, timeout)?;

            let tokens = self.tokens.lock().unwrap();
            let mut ready = Vec::new();
            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    self.wake_fd.drain();
                    continue;
                }
                if let Some((&fd, _)) = tokens.tokens.iter().find(|(_, &t)| t == event.token()) {
                    ready.push(fd);
                }
            }
            Ok(ready)
        }

        fn wake(&self) {
            self.wake_fd.post();
        }
    }
}

pub use epoll::EpollReactor;
