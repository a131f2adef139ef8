//! One encoder per supported opcode.
//!
//! Field placement mirrors liburing's `io_uring_prep_*` helpers. Encoders
//! that reference caller memory borrow it for `'a`; the borrow ends when the
//! entry is encoded, so keeping the memory alive until the completion
//! arrives is up to the caller (see `Slot::prep`).

use crate::err::RingError;
use crate::tag::Tag;
use crate::{
    io_uring_sqe, PrepSqe, Timespec, IORING_ACCEPT_MULTISHOT, IORING_OP_ACCEPT,
    IORING_OP_ASYNC_CANCEL, IORING_OP_CLOSE, IORING_OP_CONNECT, IORING_OP_NOP,
    IORING_OP_POLL_ADD, IORING_OP_READ, IORING_OP_RECV, IORING_OP_SEND, IORING_OP_SHUTDOWN,
    IORING_OP_TIMEOUT, IORING_OP_WRITE, IORING_TIMEOUT_ABS, IOSQE_ASYNC, IOSQE_BUFFER_SELECT,
    IOSQE_CQE_SKIP_SUCCESS, IOSQE_FIXED_FILE, IOSQE_IO_DRAIN, IOSQE_IO_HARDLINK, IOSQE_IO_LINK,
    SHUT_RD, SHUT_RDWR, SHUT_WR,
};

/// Largest socket address the kernel accepts (`sizeof(struct
/// sockaddr_storage)`).
const SOCKADDR_STORAGE_LEN: usize = 128;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SqeFlags {
    FixedFile = IOSQE_FIXED_FILE,
    IoDrain = IOSQE_IO_DRAIN,
    IoLink = IOSQE_IO_LINK,
    IoHardlink = IOSQE_IO_HARDLINK,
    Async = IOSQE_ASYNC,
    BufferSelect = IOSQE_BUFFER_SELECT,
    CqeSkipSuccess = IOSQE_CQE_SKIP_SUCCESS,
}

impl SqeFlags {
    #[must_use]
    pub fn bits(self) -> u8 {
        self as u8
    }
}

#[must_use]
pub fn sqe_flags() -> SqeFlagsBuilder {
    SqeFlagsBuilder(0)
}

#[derive(Debug, Copy, Clone, Default)]
pub struct SqeFlagsBuilder(u8);

impl SqeFlagsBuilder {
    #[must_use]
    pub fn with(mut self, flag: SqeFlags) -> Self {
        self.0 |= flag.bits();
        self
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }
}

fn check_fd(fd: i32) -> Result<(), RingError> {
    if fd < 0 {
        return Err(RingError::InvalidParams("negative file descriptor"));
    }
    Ok(())
}

fn check_len(len: usize) -> Result<u32, RingError> {
    u32::try_from(len).map_err(|_| RingError::InvalidParams("buffer longer than u32::MAX"))
}

pub struct Nop;

impl PrepSqe for Nop {
    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_NOP;
        sqe.fd = -1;
    }
}

/// Accepts a connection on a listening socket. The completion result is the
/// new connection's fd.
pub struct Accept<'a> {
    fd: i32,
    flags: i32,
    multishot: bool,
    peer: Option<(&'a mut [u8], &'a mut u32)>,
}

impl<'a> Accept<'a> {
    /// `flags` are `accept4(2)` flags such as `SOCK_CLOEXEC`.
    #[must_use]
    pub fn new(fd: i32, flags: i32) -> Self {
        Self {
            fd,
            flags,
            multishot: false,
            peer: None,
        }
    }

    /// Have the kernel write the peer address into `addr`. `addrlen` is
    /// in/out: the usable size of `addr` going in, the address size coming
    /// back.
    #[must_use]
    pub fn peer(mut self, addr: &'a mut [u8], addrlen: &'a mut u32) -> Self {
        self.peer = Some((addr, addrlen));
        self
    }

    /// Keep accepting: one completion per connection, each flagged
    /// `IORING_CQE_F_MORE` while the request stays armed.
    #[must_use]
    pub fn multishot(mut self) -> Self {
        self.multishot = true;
        self
    }
}

impl PrepSqe for Accept<'_> {
    fn validate(&self) -> Result<(), RingError> {
        check_fd(self.fd)?;
        if let Some((addr, addrlen)) = &self.peer {
            if addr.is_empty() {
                return Err(RingError::InvalidParams("empty accept address buffer"));
            }
            if **addrlen as usize > addr.len() {
                return Err(RingError::InvalidParams(
                    "accept addrlen exceeds address buffer",
                ));
            }
        }
        Ok(())
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_ACCEPT;
        sqe.fd = self.fd;
        sqe.rw_flags = self.flags;
        if let Some((addr, addrlen)) = &self.peer {
            sqe.addr = addr.as_ptr() as u64;
            sqe.off = core::ptr::addr_of!(**addrlen) as u64;
        }
        if self.multishot {
            sqe.ioprio |= IORING_ACCEPT_MULTISHOT;
        }
    }
}

/// Connects a socket to the address in `addr` (raw `sockaddr` bytes, e.g.
/// `SockAddrIn::as_bytes`). The length travels by value.
pub struct Connect<'a> {
    fd: i32,
    addr: &'a [u8],
}

impl<'a> Connect<'a> {
    #[must_use]
    pub fn new(fd: i32, addr: &'a [u8]) -> Self {
        Self { fd, addr }
    }
}

impl PrepSqe for Connect<'_> {
    fn validate(&self) -> Result<(), RingError> {
        check_fd(self.fd)?;
        // At least the sa_family field.
        if self.addr.len() < 2 {
            return Err(RingError::InvalidParams("connect address too short"));
        }
        if self.addr.len() > SOCKADDR_STORAGE_LEN {
            return Err(RingError::InvalidParams("connect address too long"));
        }
        Ok(())
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_CONNECT;
        sqe.fd = self.fd;
        sqe.addr = self.addr.as_ptr() as u64;
        sqe.off = self.addr.len() as u64;
    }
}

pub struct Close {
    fd: i32,
}

impl Close {
    #[must_use]
    pub fn new(fd: i32) -> Self {
        Self { fd }
    }
}

impl PrepSqe for Close {
    fn validate(&self) -> Result<(), RingError> {
        check_fd(self.fd)
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_CLOSE;
        sqe.fd = self.fd;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum How {
    Read,
    Write,
    Both,
}

impl How {
    #[must_use]
    pub fn raw(self) -> i32 {
        match self {
            Self::Read => SHUT_RD,
            Self::Write => SHUT_WR,
            Self::Both => SHUT_RDWR,
        }
    }

    /// `None` when neither direction is selected.
    #[must_use]
    pub fn from_halves(read: bool, write: bool) -> Option<Self> {
        match (read, write) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::Read),
            (false, true) => Some(Self::Write),
            (false, false) => None,
        }
    }
}

pub struct Shutdown {
    fd: i32,
    how: How,
}

impl Shutdown {
    #[must_use]
    pub fn new(fd: i32, how: How) -> Self {
        Self { fd, how }
    }
}

impl PrepSqe for Shutdown {
    fn validate(&self) -> Result<(), RingError> {
        check_fd(self.fd)
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_SHUTDOWN;
        sqe.fd = self.fd;
        sqe.len = self.how.raw() as u32;
    }
}

/// `pread`-style read into `buf`. An offset of `u64::MAX` reads at the
/// file position.
pub struct Read<'a> {
    fd: i32,
    buf: &'a mut [u8],
    offset: u64,
}

impl<'a> Read<'a> {
    #[must_use]
    pub fn new(fd: i32, buf: &'a mut [u8], offset: u64) -> Self {
        Self { fd, buf, offset }
    }
}

impl PrepSqe for Read<'_> {
    fn validate(&self) -> Result<(), RingError> {
        check_fd(self.fd)?;
        check_len(self.buf.len()).map(|_| ())
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_READ;
        sqe.fd = self.fd;
        sqe.off = self.offset;
        sqe.addr = self.buf.as_ptr() as u64;
        sqe.len = self.buf.len() as u32;
    }
}

pub struct Write<'a> {
    fd: i32,
    buf: &'a [u8],
    offset: u64,
}

impl<'a> Write<'a> {
    #[must_use]
    pub fn new(fd: i32, buf: &'a [u8], offset: u64) -> Self {
        Self { fd, buf, offset }
    }
}

impl PrepSqe for Write<'_> {
    fn validate(&self) -> Result<(), RingError> {
        check_fd(self.fd)?;
        check_len(self.buf.len()).map(|_| ())
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_WRITE;
        sqe.fd = self.fd;
        sqe.off = self.offset;
        sqe.addr = self.buf.as_ptr() as u64;
        sqe.len = self.buf.len() as u32;
    }
}

pub struct Recv<'a> {
    fd: i32,
    buf: &'a mut [u8],
    flags: i32,
}

impl<'a> Recv<'a> {
    #[must_use]
    pub fn new(fd: i32, buf: &'a mut [u8], flags: i32) -> Self {
        Self { fd, buf, flags }
    }
}

impl PrepSqe for Recv<'_> {
    fn validate(&self) -> Result<(), RingError> {
        check_fd(self.fd)?;
        check_len(self.buf.len()).map(|_| ())
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_RECV;
        sqe.fd = self.fd;
        sqe.addr = self.buf.as_ptr() as u64;
        sqe.len = self.buf.len() as u32;
        sqe.rw_flags = self.flags;
    }
}

pub struct Send<'a> {
    fd: i32,
    buf: &'a [u8],
    flags: i32,
}

impl<'a> Send<'a> {
    #[must_use]
    pub fn new(fd: i32, buf: &'a [u8], flags: i32) -> Self {
        Self { fd, buf, flags }
    }
}

impl PrepSqe for Send<'_> {
    fn validate(&self) -> Result<(), RingError> {
        check_fd(self.fd)?;
        check_len(self.buf.len()).map(|_| ())
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_SEND;
        sqe.fd = self.fd;
        sqe.addr = self.buf.as_ptr() as u64;
        sqe.len = self.buf.len() as u32;
        sqe.rw_flags = self.flags;
    }
}

/// Completes with `-ETIME` when `ts` elapses, or with 0 once `count` other
/// completions have been posted (0 disables the count).
pub struct Timeout<'a> {
    ts: &'a Timespec,
    count: u32,
    flags: u32,
}

impl<'a> Timeout<'a> {
    #[must_use]
    pub fn new(ts: &'a Timespec, count: u32, flags: u32) -> Self {
        Self { ts, count, flags }
    }

    #[must_use]
    pub fn relative(ts: &'a Timespec) -> Self {
        Self::new(ts, 0, 0)
    }

    /// `ts` is an absolute `CLOCK_MONOTONIC` deadline.
    #[must_use]
    pub fn absolute(ts: &'a Timespec) -> Self {
        Self::new(ts, 0, IORING_TIMEOUT_ABS)
    }
}

impl PrepSqe for Timeout<'_> {
    fn validate(&self) -> Result<(), RingError> {
        if !self.ts.is_valid() {
            return Err(RingError::InvalidParams("timespec out of range"));
        }
        Ok(())
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_TIMEOUT;
        sqe.fd = -1;
        sqe.addr = core::ptr::from_ref(self.ts) as u64;
        sqe.len = 1;
        sqe.off = u64::from(self.count);
        sqe.rw_flags = self.flags as i32;
    }
}

/// One-shot readiness poll; the result is the ready `POLL*` mask.
pub struct PollAdd {
    fd: i32,
    mask: u32,
}

impl PollAdd {
    #[must_use]
    pub fn new(fd: i32, mask: u32) -> Self {
        Self { fd, mask }
    }
}

impl PrepSqe for PollAdd {
    fn validate(&self) -> Result<(), RingError> {
        check_fd(self.fd)
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_POLL_ADD;
        sqe.fd = self.fd;
        // poll32_events; the ABI swaps 16-bit halves on big-endian.
        let mask = if cfg!(target_endian = "big") {
            self.mask.rotate_left(16)
        } else {
            self.mask
        };
        sqe.rw_flags = mask as i32;
    }
}

/// Cancels the in-flight request stamped with `target`.
///
/// Result 0 means it was found and canceled, `-ENOENT` that it was not found,
/// `-EALREADY` that it was already running. The canceled request still posts
/// its own completion (usually `-ECANCELED`).
pub struct AsyncCancel {
    target: Tag,
    flags: u32,
}

impl AsyncCancel {
    #[must_use]
    pub fn new(target: Tag) -> Self {
        Self { target, flags: 0 }
    }

    /// `IORING_ASYNC_CANCEL_*` flags.
    #[must_use]
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn target(&self) -> Tag {
        self.target
    }
}

impl PrepSqe for AsyncCancel {
    fn cancel_target(&self) -> Option<Tag> {
        Some(self.target)
    }

    fn prep(&self, sqe: &mut io_uring_sqe) {
        sqe.opcode = IORING_OP_ASYNC_CANCEL;
        sqe.fd = -1;
        sqe.addr = self.target.user_data();
        sqe.rw_flags = self.flags as i32;
    }
}
