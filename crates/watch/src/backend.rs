//! Syscall layer: the inotify descriptor and its readiness registration.
//!
//! [`KernelBackend`] owns the real inotify instance plus an epoll instance
//! monitoring it. Everything above this module is written against the
//! [`WatchBackend`] trait, so the stream machinery can be driven by a
//! scripted double in tests.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use treenotify_protocol::EventMask;

/// Watch descriptor (matches the kernel's wd type).
pub type WatchDescriptor = i32;

/// Outcome of one bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The event descriptor has bytes to read.
    Ready,
    /// The wait elapsed with nothing to read.
    TimedOut,
    /// A signal interrupted the wait before it elapsed.
    Interrupted,
}

/// The kernel-level watch facility the event pipeline drives.
pub trait WatchBackend {
    /// Install a watch on `path`, returning its descriptor.
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchDescriptor>;

    /// Tear down the watch behind `wd`. Fails if the kernel no longer knows
    /// the descriptor.
    fn remove_watch(&mut self, wd: WatchDescriptor) -> io::Result<()>;

    /// Append all currently readable event bytes to `buf`.
    ///
    /// Returns the number of bytes appended; 0 means the descriptor had
    /// nothing to read. Never blocks.
    fn read_events(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;

    /// Block until the event descriptor becomes readable, for at most
    /// `timeout`.
    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness>;
}

/// Real inotify instance monitored through epoll.
///
/// Owns both descriptors exclusively; they are closed exactly once when the
/// backend is dropped.
#[derive(Debug)]
pub struct KernelBackend {
    inotify_fd: libc::c_int,
    epoll_fd: libc::c_int,
}

impl KernelBackend {
    /// Initialize an inotify instance and register it with a fresh epoll
    /// instance.
    ///
    /// The inotify descriptor is switched to non-blocking here: blocking is
    /// handled by [`wait`](WatchBackend::wait), and a read must never stall
    /// the loop after readiness was reported.
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, no pointers involved.
        let inotify_fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC) };
        if inotify_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        tracing::debug!(fd = inotify_fd, "inotify handle created");

        // SAFETY: inotify_fd is a valid descriptor we just created.
        let rc = unsafe {
            let flags = libc::fcntl(inotify_fd, libc::F_GETFL);
            libc::fcntl(inotify_fd, libc::F_SETFL, flags | libc::O_NONBLOCK)
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: closing the descriptor we own.
            unsafe { libc::close(inotify_fd) };
            return Err(err);
        }

        // SAFETY: plain syscall, no pointers involved.
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: closing the descriptor we own.
            unsafe { libc::close(inotify_fd) };
            return Err(err);
        }

        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: inotify_fd as u64,
        };
        // SAFETY: both descriptors are valid and `event` outlives the call.
        let rc = unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, inotify_fd, &mut event) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: closing the descriptors we own.
            unsafe {
                libc::close(epoll_fd);
                libc::close(inotify_fd);
            }
            return Err(err);
        }

        Ok(Self {
            inotify_fd,
            epoll_fd,
        })
    }
}

impl WatchBackend for KernelBackend {
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchDescriptor> {
        let path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: `path` is a valid NUL-terminated string for the duration of
        // the call.
        let wd = unsafe { libc::inotify_add_watch(self.inotify_fd, path.as_ptr(), mask.bits()) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(wd)
    }

    fn remove_watch(&mut self, wd: WatchDescriptor) -> io::Result<()> {
        // SAFETY: plain syscall, no pointers involved.
        let rc = unsafe { libc::inotify_rm_watch(self.inotify_fd, wd) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn read_events(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut chunk = [0u8; 4096];
        let mut total = 0;
        loop {
            // SAFETY: `chunk` is a valid writable buffer of the given length.
            let n = unsafe {
                libc::read(self.inotify_fd, chunk.as_mut_ptr().cast(), chunk.len())
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(err),
                }
            }
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n as usize]);
            total += n as usize;
        }
        Ok(total)
    }

    fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let mut event = libc::epoll_event { events: 0, u64: 0 };

        // SAFETY: `event` outlives the call and maxevents matches its size.
        let rc = unsafe { libc::epoll_wait(self.epoll_fd, &mut event, 1, millis) };
        match rc {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(Readiness::Interrupted)
                } else {
                    Err(err)
                }
            }
            0 => Ok(Readiness::TimedOut),
            _ => Ok(Readiness::Ready),
        }
    }
}

impl Drop for KernelBackend {
    fn drop(&mut self) {
        tracing::debug!(fd = self.inotify_fd, "closing inotify handle");
        // SAFETY: the descriptors are owned exclusively and closed exactly
        // once; drop is the only place that closes them.
        unsafe {
            libc::close(self.epoll_fd);
            libc::close(self.inotify_fd);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend double for deterministic stream tests.

    use std::collections::{HashSet, VecDeque};
    use std::path::PathBuf;
    use std::thread;

    use super::*;

    /// One scripted reaction to a `wait` call.
    pub(crate) enum Step {
        /// Report readiness and make these bytes readable.
        Deliver(Vec<u8>),
        /// Report a signal interruption.
        Interrupt,
    }

    /// In-memory [`WatchBackend`] driven by a script.
    ///
    /// Descriptors are handed out sequentially starting at 1. Once the
    /// script runs dry, `wait` sleeps for the requested timeout and reports
    /// `TimedOut`, so inactivity-timeout behavior is exercised for real.
    pub(crate) struct ScriptedBackend {
        pub(crate) script: VecDeque<Step>,
        pub(crate) added: Vec<(PathBuf, EventMask)>,
        pub(crate) removed: Vec<WatchDescriptor>,
        pub(crate) fail_remove: HashSet<WatchDescriptor>,
        next_wd: WatchDescriptor,
        inbox: Vec<u8>,
    }

    impl ScriptedBackend {
        pub(crate) fn new() -> Self {
            Self {
                script: VecDeque::new(),
                added: Vec::new(),
                removed: Vec::new(),
                fail_remove: HashSet::new(),
                next_wd: 1,
                inbox: Vec::new(),
            }
        }

        pub(crate) fn push(&mut self, step: Step) {
            self.script.push_back(step);
        }
    }

    impl WatchBackend for ScriptedBackend {
        fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchDescriptor> {
            let wd = self.next_wd;
            self.next_wd += 1;
            self.added.push((path.to_path_buf(), mask));
            Ok(wd)
        }

        fn remove_watch(&mut self, wd: WatchDescriptor) -> io::Result<()> {
            if self.fail_remove.contains(&wd) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "invalid watch descriptor",
                ));
            }
            self.removed.push(wd);
            Ok(())
        }

        fn read_events(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
            let n = self.inbox.len();
            buf.append(&mut self.inbox);
            Ok(n)
        }

        fn wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
            match self.script.pop_front() {
                Some(Step::Deliver(bytes)) => {
                    self.inbox.extend_from_slice(&bytes);
                    Ok(Readiness::Ready)
                }
                Some(Step::Interrupt) => Ok(Readiness::Interrupted),
                None => {
                    thread::sleep(timeout);
                    Ok(Readiness::TimedOut)
                }
            }
        }
    }
}
