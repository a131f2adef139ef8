use rustix::io::Errno;
use thiserror::Error;

use crate::tag::TagKind;

/// Ring creation failures. The ring that failed to come up is the only
/// casualty; other rings are unaffected.
#[derive(Debug, Error)]
pub enum InitError {
    /// `io_uring_setup` rejected the configuration (resource limits,
    /// unsupported flags, zero entries, ...).
    #[error("io_uring_setup failed: {0}")]
    SyscallFailed(Errno),
    #[error("mmap of ring region failed: {0}")]
    MmapFailed(Errno),
    #[error("invalid setup parameters")]
    InvalidParameters,
    /// The kernel reported a queue size that cannot be masked.
    #[error("kernel reported non power-of-two ring size {0}")]
    NotPowerOfTwo(u32),
}

impl InitError {
    /// Platform error code carried by this failure, if any.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::SyscallFailed(e) | Self::MmapFailed(e) => Some(*e),
            Self::InvalidParameters | Self::NotPowerOfTwo(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RingError {
    /// `io_uring_enter` failed; the errno is surfaced verbatim, `EINTR`
    /// included.
    #[error("io_uring_enter failed: {0}")]
    Enter(Errno),
    #[error("io_uring_register failed: {0}")]
    Register(Errno),
    /// Every submission slot is owned by the kernel. Flush or harvest and
    /// try again.
    #[error("submission queue is full")]
    QueueFull,
    #[error("invalid operation parameters: {0}")]
    InvalidParams(&'static str),
    #[error("ring has been destroyed")]
    Destroyed,
    #[error("ring tags use {expected:?} encoding, got {found:?}")]
    TagKindMismatch { expected: TagKind, found: TagKind },
    /// Attempt to consume completions the kernel has not published.
    #[error("completion head advanced by {requested} with only {ready} ready")]
    HeadOverrun { requested: u32, ready: u32 },
}

impl RingError {
    /// `true` for capacity conditions the caller is expected to back off
    /// from rather than treat as fatal.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull)
    }

    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Enter(e) | Self::Register(e) => Some(*e),
            _ => None,
        }
    }

    /// Negated platform error code for syscall-level failures, matching the
    /// signed result convention used by completions and the socket adapter.
    #[must_use]
    pub fn raw_result(&self) -> Option<i32> {
        self.errno().map(|e| -e.raw_os_error())
    }
}
