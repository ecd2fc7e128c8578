//! kqueue backend.

use super::{Event, Readiness};
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

pub struct Selector {
    kq: OwnedFd,
}

impl Selector {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::kqueue() };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let kq = unsafe { OwnedFd::from_raw_fd(fd) };

        let ret = unsafe { libc::fcntl(kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { kq })
    }

    /// `EV_ADD` on an existing filter updates it in place, so re-arming a
    /// fired one-shot filter and re-registering are the same call.
    pub fn register(&self, fd: RawFd, oneshot: bool) -> io::Result<()> {
        let mut flags = libc::EV_ADD as u16;
        if oneshot {
            flags |= libc::EV_ONESHOT as u16;
        }
        self.change(fd, flags)
    }

    pub fn unregister(&self, fd: RawFd) -> io::Result<()> {
        self.change(fd, libc::EV_DELETE as u16)
    }

    pub fn select(&self, timeout: Option<Duration>) -> io::Result<Option<Event>> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as _,
        });
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(ptr::null());

        let mut out: libc::kevent = unsafe { std::mem::zeroed() };
        let n = unsafe { libc::kevent(self.kq.as_raw_fd(), ptr::null(), 0, &mut out, 1, ts_ptr) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n == 0 {
            return Ok(None);
        }

        Ok(Some(Event {
            fd: out.ident as RawFd,
            readiness: classify(out.flags as u32, out.fflags as u32),
        }))
    }

    fn change(&self, fd: RawFd, flags: u16) -> io::Result<()> {
        let mut kev: libc::kevent = unsafe { std::mem::zeroed() };
        kev.ident = fd as _;
        kev.filter = libc::EVFILT_READ as _;
        kev.flags = flags as _;

        let ret = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                &kev,
                1,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// `EV_EOF` alone means the peer finished sending; the relay drains what is
/// left and sees EOF as a zero-length read. `EV_EOF` with a socket error in
/// `fflags` (e.g. a reset) is reported as an error.
fn classify(flags: u32, fflags: u32) -> Readiness {
    let error = flags & libc::EV_ERROR as u32 != 0;
    let eof = flags & libc::EV_EOF as u32 != 0;

    if error || (eof && fflags != 0) {
        Readiness::Error
    } else {
        Readiness::Readable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    const LONG: Duration = Duration::from_secs(2);
    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_classify() {
        assert_eq!(classify(0, 0), Readiness::Readable);
        assert_eq!(classify(libc::EV_EOF as u32, 0), Readiness::Readable);
        assert_eq!(
            classify(libc::EV_EOF as u32, libc::ECONNRESET as u32),
            Readiness::Error
        );
        assert_eq!(classify(libc::EV_ERROR as u32, 0), Readiness::Error);
    }

    #[test]
    fn test_oneshot_filter_is_consumed() {
        let selector = Selector::new().unwrap();
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        selector.register(fd, true).unwrap();
        b.write_all(b"x").unwrap();

        let ev = selector.select(Some(LONG)).unwrap().expect("event");
        assert_eq!(ev, Event { fd, readiness: Readiness::Readable });

        // EV_ONESHOT 触发后过滤器已被删除
        assert_eq!(selector.select(Some(SHORT)).unwrap(), None);
        let err = selector.unregister(fd).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

        selector.register(fd, true).unwrap();
        let ev = selector.select(Some(LONG)).unwrap().expect("event after re-arm");
        assert_eq!(ev.fd, fd);

        let mut buf = [0u8; 1];
        a.read_exact(&mut buf).unwrap();
    }

    #[test]
    fn test_level_filter_repeats_and_sees_eof() {
        let selector = Selector::new().unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        selector.register(fd, false).unwrap();
        b.write_all(b"x").unwrap();

        for _ in 0..2 {
            let ev = selector.select(Some(LONG)).unwrap().expect("event");
            assert_eq!(ev.fd, fd);
        }

        drop(b);
        let ev = selector.select(Some(LONG)).unwrap().expect("event after close");
        assert_eq!(ev, Event { fd, readiness: Readiness::Readable });

        selector.unregister(fd).unwrap();
        assert_eq!(selector.select(Some(SHORT)).unwrap(), None);
    }
}
