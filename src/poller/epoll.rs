//! epoll backend.

use super::{Event, Readiness};
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

pub struct Selector {
    epfd: OwnedFd,
}

impl Selector {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn register(&self, fd: RawFd, oneshot: bool) -> io::Result<()> {
        let mut flags = libc::EPOLLIN as u32;
        if oneshot {
            flags |= libc::EPOLLONESHOT as u32;
        }

        match self.ctl(libc::EPOLL_CTL_ADD, fd, flags) {
            // 已在 interest list 中（例如 one-shot 触发后被禁用），改为重新武装
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                self.ctl(libc::EPOLL_CTL_MOD, fd, flags)
            }
            other => other,
        }
    }

    pub fn unregister(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0)
    }

    pub fn select(&self, timeout: Option<Duration>) -> io::Result<Option<Event>> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };

        let mut events = [libc::epoll_event { events: 0, u64: 0 }; 1];
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n == 0 {
            return Ok(None);
        }

        // epoll_event 在部分架构上是 packed 的，先按值拷出
        let flags = events[0].events;
        let fd = events[0].u64 as RawFd;

        Ok(Some(Event {
            fd,
            readiness: classify(flags),
        }))
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, flags: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: flags,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut event) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// A hang-up that still has readable data is reported as readable, so the
/// relay drains the buffer and sees EOF as a zero-length read.
fn classify(flags: u32) -> Readiness {
    let err = flags & libc::EPOLLERR as u32 != 0;
    let hup = flags & libc::EPOLLHUP as u32 != 0;
    let readable = flags & libc::EPOLLIN as u32 != 0;

    if err || (hup && !readable) {
        Readiness::Error
    } else {
        Readiness::Readable
    }
}
