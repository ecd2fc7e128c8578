//! Readiness multiplexer.
//!
//! A thin wrapper over the platform's readiness facility: epoll on Linux and
//! Android, kqueue on macOS and the BSDs. The backend is chosen at build time;
//! both expose the same `register` / `unregister` / `wait` contract.
//!
//! Only read-readiness is ever requested. `wait` hands back exactly one event
//! per call so the event loop stays strictly one-event-per-turn.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
use epoll as sys;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
use kqueue as sys;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{debug, trace};

/// Classification of a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Data (or EOF) can be read without blocking.
    Readable,
    /// The OS reported an error condition on the descriptor.
    Error,
}

/// One readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub readiness: Readiness,
}

impl Event {
    pub fn is_error(&self) -> bool {
        self.readiness == Readiness::Error
    }
}

/// 触发模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// 描述符保持注册直到显式注销
    #[default]
    Level,
    /// 每次事件之后描述符自动移出监听集合，需要重新注册
    OneShot,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Level => write!(f, "level"),
            TriggerMode::OneShot => write!(f, "oneshot"),
        }
    }
}

/// Portable readiness multiplexer.
///
/// Tracks the set of currently watched descriptors on top of the kernel
/// facility, so both backends agree on what "watched" means: in one-shot mode
/// a descriptor leaves the set as soon as it fires, whether the kernel drops
/// the registration (kqueue) or merely disarms it (epoll).
pub struct Poller {
    selector: sys::Selector,
    mode: TriggerMode,
    watched: HashSet<RawFd>,
}

impl Poller {
    pub fn new(mode: TriggerMode) -> io::Result<Self> {
        Ok(Self {
            selector: sys::Selector::new()?,
            mode,
            watched: HashSet::new(),
        })
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    /// Start reporting readability and errors for `fd`.
    ///
    /// Registering a descriptor that is already known re-arms it; this is how
    /// a one-shot descriptor is put back after it fired.
    pub fn register(&mut self, fd: RawFd) -> io::Result<()> {
        self.selector.register(fd, self.mode == TriggerMode::OneShot)?;
        self.watched.insert(fd);
        trace!(fd, mode = %self.mode, "registered");
        Ok(())
    }

    /// Stop reporting events for `fd`.
    ///
    /// A descriptor the OS already dropped (closed, or a fired one-shot filter)
    /// is not an error.
    pub fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.watched.remove(&fd);
        match self.selector.unregister(fd) {
            Ok(()) => {
                trace!(fd, "unregistered");
                Ok(())
            }
            Err(e) if is_already_gone(&e) => {
                debug!(fd, "unregister: descriptor already gone ({})", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Block until one watched descriptor has an event.
    ///
    /// Returns `None` immediately when nothing is watched, or when a finite
    /// `timeout` elapses without an event.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Option<Event>> {
        if self.watched.is_empty() {
            return Ok(None);
        }

        let event = loop {
            match self.selector.select(timeout) {
                Ok(event) => break event,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        if let Some(ref ev) = event {
            if self.mode == TriggerMode::OneShot {
                self.watched.remove(&ev.fd);
            }
            trace!(fd = ev.fd, readiness = ?ev.readiness, "event");
        }
        Ok(event)
    }

    pub fn is_watched(&self, fd: RawFd) -> bool {
        self.watched.contains(&fd)
    }

    /// 当前监听集合的大小
    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }
}

fn is_already_gone(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF))
}
