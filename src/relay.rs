//! One relay step: move a single chunk from a ready socket to its peer.
//!
//! There is no buffering between the two halves of a tunnel. A chunk is either
//! written to the peer in full or the tunnel ends; a peer that cannot take the
//! whole chunk right away (`WouldBlock` on a non-blocking socket) counts as a
//! failed write. Backpressure is left to the OS socket buffers.

use crate::poller::Readiness;
use std::fmt;
use std::io::{self, Read, Write};

/// 默认单次转发的最大字节数
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Why a tunnel is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The poller reported an error condition on the source socket.
    SocketError,
    /// The source socket returned a zero-length read.
    Eof,
    /// Reading from the source failed.
    ReadFailed(io::ErrorKind),
    /// Writing to the peer failed or could not complete immediately.
    WriteFailed(io::ErrorKind),
    /// The socket could not be registered or re-armed with the poller.
    PollerFailed(io::ErrorKind),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::SocketError => write!(f, "socket error"),
            CloseReason::Eof => write!(f, "peer closed"),
            CloseReason::ReadFailed(kind) => write!(f, "read failed ({})", kind),
            CloseReason::WriteFailed(kind) => write!(f, "write failed ({})", kind),
            CloseReason::PollerFailed(kind) => write!(f, "poller failed ({})", kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// `n` bytes were read and written in full to the peer.
    Forwarded(usize),
    /// Spurious wakeup: nothing to read yet. The tunnel stays up.
    Idle,
    /// The tunnel must be torn down.
    Closed(CloseReason),
}

/// Relay at most `buf.len()` bytes from `src` to `dst`.
///
/// `readiness` is the classification the poller gave `src`; an error event
/// ends the tunnel without touching either socket.
pub fn relay_step<R, W>(
    readiness: Readiness,
    mut src: R,
    mut dst: W,
    buf: &mut [u8],
) -> RelayOutcome
where
    R: Read,
    W: Write,
{
    if readiness == Readiness::Error {
        return RelayOutcome::Closed(CloseReason::SocketError);
    }

    let n = loop {
        match src.read(buf) {
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return RelayOutcome::Idle,
            Err(e) => return RelayOutcome::Closed(CloseReason::ReadFailed(e.kind())),
        }
    };

    if n == 0 {
        return RelayOutcome::Closed(CloseReason::Eof);
    }

    match dst.write_all(&buf[..n]) {
        Ok(()) => RelayOutcome::Forwarded(n),
        Err(e) => RelayOutcome::Closed(CloseReason::WriteFailed(e.kind())),
    }
}
