#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
#![allow(non_camel_case_types)]

pub mod addr;
pub mod cq;
pub mod cqe;
pub mod err;
pub mod io_uring;
pub mod mmap;
pub mod socket;
pub mod sq;
pub mod sqe;
pub mod tag;

pub use addr::SockAddrIn;
pub use cq::CompletionQueue;
pub use cqe::CqeFlags;
pub use err::{InitError, RingError};
pub use io_uring::{IoUring, Probe, SetupBuilder, Slot};
pub use mmap::RwMmap;
pub use sq::SubmissionQueue;
pub use sqe::{
    sqe_flags, Accept, AsyncCancel, Close, Connect, How, Nop, PollAdd, Read, Recv, Send,
    Shutdown, SqeFlags, Timeout, Write,
};
pub use tag::{Tag, TagKind};

pub const IORING_SETUP_IOPOLL: u32 = 1 << 0;
pub const IORING_SETUP_SQPOLL: u32 = 1 << 1;
pub const IORING_SETUP_SQ_AFF: u32 = 1 << 2;
pub const IORING_SETUP_CQSIZE: u32 = 1 << 3;
pub const IORING_SETUP_CLAMP: u32 = 1 << 4;
pub const IORING_SETUP_ATTACH_WQ: u32 = 1 << 5;
pub const IORING_SETUP_R_DISABLED: u32 = 1 << 6;
pub const IORING_SETUP_SUBMIT_ALL: u32 = 1 << 7;
pub const IORING_SETUP_COOP_TASKRUN: u32 = 1 << 8;
pub const IORING_SETUP_TASKRUN_FLAG: u32 = 1 << 9;

pub const IORING_ENTER_GETEVENTS: u32 = 1 << 0;
pub const IORING_ENTER_SQ_WAKEUP: u32 = 1 << 1;
pub const IORING_ENTER_SQ_WAIT: u32 = 1 << 2;

pub const IORING_OFF_SQ_RING: u64 = 0;
pub const IORING_OFF_CQ_RING: u64 = 0x0800_0000;
pub const IORING_OFF_SQES: u64 = 0x1000_0000;

pub const IORING_OP_NOP: u8 = 0;
pub const IORING_OP_POLL_ADD: u8 = 6;
pub const IORING_OP_TIMEOUT: u8 = 11;
pub const IORING_OP_ACCEPT: u8 = 13;
pub const IORING_OP_ASYNC_CANCEL: u8 = 14;
pub const IORING_OP_CONNECT: u8 = 16;
pub const IORING_OP_CLOSE: u8 = 19;
pub const IORING_OP_READ: u8 = 22;
pub const IORING_OP_WRITE: u8 = 23;
pub const IORING_OP_SEND: u8 = 26;
pub const IORING_OP_RECV: u8 = 27;
pub const IORING_OP_SHUTDOWN: u8 = 34;

// Timeout flags
pub const IORING_TIMEOUT_ABS: u32 = 1 << 0;

// Async cancel flags
pub const IORING_ASYNC_CANCEL_ALL: u32 = 1 << 0;
pub const IORING_ASYNC_CANCEL_ANY: u32 = 1 << 1;
pub const IORING_ASYNC_CANCEL_FD: u32 = 1 << 2;

// Accept flags, carried in sqe->ioprio
pub const IORING_ACCEPT_MULTISHOT: u16 = 1 << 0;

pub const IOSQE_FIXED_FILE: u8 = 1 << 0;
pub const IOSQE_IO_DRAIN: u8 = 1 << 1;
pub const IOSQE_IO_LINK: u8 = 1 << 2;
pub const IOSQE_IO_HARDLINK: u8 = 1 << 3;
pub const IOSQE_ASYNC: u8 = 1 << 4;
pub const IOSQE_BUFFER_SELECT: u8 = 1 << 5;
pub const IOSQE_CQE_SKIP_SUCCESS: u8 = 1 << 6;

pub const IORING_CQE_F_BUFFER: u32 = 1 << 0;
pub const IORING_CQE_F_MORE: u32 = 1 << 1;
pub const IORING_CQE_F_SOCK_NONEMPTY: u32 = 1 << 2;
pub const IORING_CQE_F_NOTIFICATION: u32 = 1 << 3;

// sq_ring->flags
pub const IORING_SQ_NEED_WAKEUP: u32 = 1 << 0;
pub const IORING_SQ_CQ_OVERFLOW: u32 = 1 << 1;
pub const IORING_SQ_TASKRUN: u32 = 1 << 2;

// io_uring feature flags (IORING_FEAT_*)
pub const IORING_FEAT_SINGLE_MMAP: u32 = 1 << 0;
pub const IORING_FEAT_NODROP: u32 = 1 << 1;
pub const IORING_FEAT_SUBMIT_STABLE: u32 = 1 << 2;
pub const IORING_FEAT_RW_CUR_POS: u32 = 1 << 3;
pub const IORING_FEAT_CUR_PERSONALITY: u32 = 1 << 4;
pub const IORING_FEAT_FAST_POLL: u32 = 1 << 5;
pub const IORING_FEAT_POLL_32BITS: u32 = 1 << 6;
pub const IORING_FEAT_EXT_ARG: u32 = 1 << 8;

// Poll event flags
pub const POLLIN: u32 = 0x0001;
pub const POLLPRI: u32 = 0x0002;
pub const POLLOUT: u32 = 0x0004;
pub const POLLERR: u32 = 0x0008;
pub const POLLHUP: u32 = 0x0010;
pub const POLLNVAL: u32 = 0x0020;
pub const POLLRDHUP: u32 = 0x2000;

// Socket types
pub const SOCK_STREAM: i32 = 1;
pub const SOCK_NONBLOCK: i32 = 0o0004000;
pub const SOCK_CLOEXEC: i32 = 0o2000000;

// Address families
pub const AF_UNSPEC: u16 = 0;
pub const AF_INET: u16 = 2;

// Message flags
pub const MSG_PEEK: i32 = 0x0002;
pub const MSG_DONTWAIT: i32 = 0x0040;
pub const MSG_WAITALL: i32 = 0x0100;
pub const MSG_NOSIGNAL: i32 = 0x4000;

// Socket option levels and names
pub const SOL_SOCKET: i32 = 1;
pub const IPPROTO_TCP: i32 = 6;
pub const SO_REUSEADDR: i32 = 2;
pub const SO_TYPE: i32 = 3;
pub const SO_ERROR: i32 = 4;
pub const SO_KEEPALIVE: i32 = 9;
pub const SO_REUSEPORT: i32 = 15;
pub const TCP_NODELAY: i32 = 1;
pub const TCP_CORK: i32 = 3;

// Shutdown flags
pub const SHUT_RD: i32 = 0;
pub const SHUT_WR: i32 = 1;
pub const SHUT_RDWR: i32 = 2;

pub use rustix::io_uring::{io_cqring_offsets, io_sqring_offsets};

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct io_uring_sqe {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    pub off: u64,
    pub addr: u64,
    pub len: u32,
    pub rw_flags: i32,
    pub user_data: u64,
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pub addr3: u64,
    pub(crate) __pad2: u64,
}

impl io_uring_sqe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the operation fields, keeping the correlation tag and the
    /// `IOSQE_*` flags.
    pub(crate) fn reset_operation(&mut self) {
        *self = Self {
            user_data: self.user_data,
            flags: self.flags,
            ..Self::default()
        };
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct io_uring_cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

/// `struct __kernel_timespec`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl Timespec {
    #[must_use]
    pub fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        Self { tv_sec, tv_nsec }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.tv_sec >= 0 && (0..1_000_000_000).contains(&self.tv_nsec)
    }
}

impl From<core::time::Duration> for Timespec {
    fn from(d: core::time::Duration) -> Self {
        Self {
            tv_sec: d.as_secs() as i64,
            tv_nsec: i64::from(d.subsec_nanos()),
        }
    }
}

/// Encodes one operation into a zeroed submission entry.
///
/// `validate` runs before the slot is touched; an encoder that rejects its
/// parameters leaves the submission queue exactly as it was.
pub trait PrepSqe {
    /// ## Errors
    /// Returns `RingError::InvalidParams` when the parameters cannot form a
    /// well-shaped entry for this opcode.
    fn validate(&self) -> Result<(), RingError> {
        Ok(())
    }

    /// Tag of another entry this operation refers to. Its encoding has to
    /// match the ring's.
    fn cancel_target(&self) -> Option<Tag> {
        None
    }

    fn prep(&self, sqe: &mut io_uring_sqe);
}

const _: () = assert!(core::mem::size_of::<io_uring_sqe>() == 64);
const _: () = assert!(core::mem::size_of::<io_uring_cqe>() == 16);
