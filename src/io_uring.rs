use core::ffi::c_void;
use core::mem::MaybeUninit;
use core::ptr::{addr_of, addr_of_mut, null, read_volatile};

use rustix::fd::{AsFd, AsRawFd, OwnedFd};
use rustix::io_uring::{
    self, IoringEnterFlags, IoringOpFlags, IoringRegisterOp, IoringSetupFlags,
};

use crate::cq::CompletionQueue;
use crate::err::{InitError, RingError};
use crate::mmap::RwMmap;
use crate::sq::SubmissionQueue;
use crate::sqe::{AsyncCancel, Close, How, Nop, PollAdd, Shutdown};
use crate::tag::{Tag, TagKind};
use crate::{
    io_uring_cqe, io_uring_sqe, PrepSqe, IORING_ENTER_GETEVENTS, IORING_ENTER_SQ_WAKEUP,
    IORING_OFF_CQ_RING, IORING_OFF_SQES, IORING_OFF_SQ_RING, IORING_SETUP_CLAMP,
    IORING_SETUP_CQSIZE, IORING_SETUP_SQPOLL,
};

/// Kernel-side resources of a live ring. Dropping this tears the ring down:
/// the mappings go first, then the fd.
struct RingInner {
    sq: SubmissionQueue,
    cq: CompletionQueue,
    _sq_mmap: RwMmap,
    _cq_mmap: RwMmap,
    _sqe_mmap: RwMmap,
    fd: OwnedFd,
}

impl RingInner {
    fn enter(&self, to_submit: u32, min_complete: u32, flags: u32) -> Result<u32, RingError> {
        // SAFETY: no extended argument is passed (null, 0).
        unsafe {
            io_uring::io_uring_enter(
                self.fd.as_fd(),
                to_submit,
                min_complete,
                IoringEnterFlags::from_bits_retain(flags),
                null(),
                0,
            )
        }
        .map_err(RingError::Enter)
    }
}

/// One io_uring instance: a submission queue, a completion queue and the
/// kernel context behind them.
///
/// The ring provides no internal locking. Use it from one thread at a time.
pub struct IoUring {
    inner: Option<RingInner>,
    tag_kind: Option<TagKind>,
    sq_entries: u32,
    cq_entries: u32,
    setup_flags: u32,
    features: u32,
}

// SAFETY: the raw pointers inside point at mappings owned by this value and
// are only touched through `&mut self` (or `&self` for plain loads).
unsafe impl Send for IoUring {}

/// Opcodes rustix can name. Asking the kernel for more would fill `op`
/// fields with values outside `IoringOp`.
const PROBE_OPS: usize = 49;

/// Opcode support table reported by `IORING_REGISTER_PROBE`.
#[repr(C)]
#[derive(Debug)]
pub struct Probe {
    // The kernel's `last_op` can be newer than any `IoringOp`; the header is
    // only ever read byte-wise.
    probe: MaybeUninit<io_uring::io_uring_probe>,
    ops: [io_uring::io_uring_probe_op; PROBE_OPS],
}

impl Probe {
    fn new() -> Self {
        Self {
            probe: MaybeUninit::new(io_uring::io_uring_probe::default()),
            ops: [io_uring::io_uring_probe_op::default(); PROBE_OPS],
        }
    }

    /// Highest opcode the kernel knows about.
    #[must_use]
    pub fn last_op(&self) -> u8 {
        // SAFETY: initialised in `new`; `last_op` is a single byte.
        unsafe { addr_of!((*self.probe.as_ptr()).last_op).cast::<u8>().read() }
    }

    fn ops_len(&self) -> usize {
        // SAFETY: initialised in `new`; `ops_len` is a plain `u8`.
        let len = unsafe { addr_of!((*self.probe.as_ptr()).ops_len).read() };
        (len as usize).min(self.ops.len())
    }

    fn ops_slice(&self) -> &[io_uring::io_uring_probe_op] {
        &self.ops[..self.ops_len()]
    }

    #[must_use]
    pub fn opcode_supported(&self, opcode: u8) -> bool {
        self.ops_slice()
            .iter()
            .any(|op| op.op as u8 == opcode && op.flags.contains(IoringOpFlags::SUPPORTED))
    }
}

/// Ring configuration.
///
/// ```no_run
/// use sev_uring::SetupBuilder;
///
/// let ring = SetupBuilder::new(64).cq_entries(256).clamp().build()?;
/// assert!(ring.cq_entries() >= 256);
/// # Ok::<(), sev_uring::InitError>(())
/// ```
#[derive(Debug, Copy, Clone)]
pub struct SetupBuilder {
    sq_entries: u32,
    cq_entries: u32,
    flags: u32,
}

impl SetupBuilder {
    /// `sq_entries` is rounded up to a power of two by the kernel. Zero is
    /// passed through and rejected by the kernel.
    #[must_use]
    pub fn new(sq_entries: u32) -> Self {
        Self {
            sq_entries,
            cq_entries: 0,
            flags: 0,
        }
    }

    /// Completion ring size, instead of the default of twice the SQ size.
    #[must_use]
    pub fn cq_entries(mut self, cq_entries: u32) -> Self {
        self.cq_entries = cq_entries;
        self.flags |= IORING_SETUP_CQSIZE;
        self
    }

    /// Clamp oversized entry counts to the kernel maximum instead of failing.
    #[must_use]
    pub fn clamp(mut self) -> Self {
        self.flags |= IORING_SETUP_CLAMP;
        self
    }

    /// Raw `IORING_SETUP_*` flags, OR-ed into the ones already set.
    #[must_use]
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    /// ## Errors
    /// `InitError::SyscallFailed` with the kernel's errno if it rejects the
    /// configuration, `InitError::MmapFailed` if a ring region cannot be
    /// mapped.
    pub fn build(self) -> Result<IoUring, InitError> {
        let mut params = io_uring::io_uring_params::default();
        params.flags = IoringSetupFlags::from_bits_retain(self.flags);
        params.cq_entries = self.cq_entries;

        let fd = io_uring::io_uring_setup(self.sq_entries, &mut params)
            .map_err(InitError::SyscallFailed)?;

        IoUring::create_ring(fd, &params)
    }
}

impl IoUring {
    #[doc = "Creates a ring with at least `entries` submission slots."]
    #[doc = ""]
    #[doc = "## Errors"]
    #[doc = "Returns `InitError` if the kernel rejects the ring or the mapping fails."]
    pub fn new(entries: u32) -> Result<Self, InitError> {
        SetupBuilder::new(entries).build()
    }

    #[doc = "Creates a ring with raw `IORING_SETUP_*` flags."]
    #[doc = ""]
    #[doc = "## Errors"]
    #[doc = "Returns `InitError` if the kernel rejects the ring or the mapping fails."]
    pub fn with_flags(entries: u32, flags: u32) -> Result<Self, InitError> {
        SetupBuilder::new(entries).flags(flags).build()
    }

    fn create_ring(fd: OwnedFd, params: &io_uring::io_uring_params) -> Result<Self, InitError> {
        let sq_ring_size = params.sq_off.array as usize
            + params.sq_entries as usize * core::mem::size_of::<u32>();
        let cq_ring_size = params.cq_off.cqes as usize
            + params.cq_entries as usize * core::mem::size_of::<io_uring_cqe>();
        let sqes_size = params.sq_entries as usize * core::mem::size_of::<io_uring_sqe>();

        let sq_mmap = RwMmap::new(fd.as_fd(), IORING_OFF_SQ_RING, sq_ring_size)?;
        let cq_mmap = RwMmap::new(fd.as_fd(), IORING_OFF_CQ_RING, cq_ring_size)?;
        let sqe_mmap = RwMmap::new(fd.as_fd(), IORING_OFF_SQES, sqes_size)?;

        // SAFETY: the regions were sized from the kernel's own offsets and
        // live in `RingInner` next to the queues.
        let sq = unsafe {
            SubmissionQueue::new(
                sq_mmap.as_ptr(),
                &params.sq_off,
                sqe_mmap.as_ptr().cast::<io_uring_sqe>(),
            )
        }?;
        let cq = unsafe { CompletionQueue::new(cq_mmap.as_ptr(), &params.cq_off) }?;

        let ring = Self {
            inner: Some(RingInner {
                sq,
                cq,
                _sq_mmap: sq_mmap,
                _cq_mmap: cq_mmap,
                _sqe_mmap: sqe_mmap,
                fd,
            }),
            tag_kind: None,
            sq_entries: params.sq_entries,
            cq_entries: params.cq_entries,
            setup_flags: params.flags.bits(),
            features: params.features.bits(),
        };

        log::debug!(
            "io_uring created: fd={} sq_entries={} cq_entries={} flags={:#x} features={:#x}",
            ring.raw_fd().unwrap_or(-1),
            ring.sq_entries,
            ring.cq_entries,
            ring.setup_flags,
            ring.features,
        );

        Ok(ring)
    }

    /// Unmaps the rings and closes the kernel context. Later calls are
    /// no-ops; every other operation fails with `RingError::Destroyed`.
    ///
    /// Operations still in flight are abandoned; their buffers must stay
    /// valid until the kernel has finished with them.
    pub fn destroy(&mut self) {
        if let Some(inner) = self.inner.take() {
            let fd = inner.fd.as_raw_fd();
            drop(inner);
            log::debug!("io_uring destroyed: fd={fd}");
        }
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_none()
    }

    fn inner(&self) -> Result<&RingInner, RingError> {
        self.inner.as_ref().ok_or(RingError::Destroyed)
    }

    fn inner_mut(&mut self) -> Result<&mut RingInner, RingError> {
        self.inner.as_mut().ok_or(RingError::Destroyed)
    }

    /// ## Errors
    /// Returns `RingError::Destroyed` after `destroy`.
    pub fn raw_fd(&self) -> Result<i32, RingError> {
        Ok(self.inner()?.fd.as_raw_fd())
    }

    /// SQ size the kernel actually allocated.
    #[must_use]
    pub fn sq_entries(&self) -> u32 {
        self.sq_entries
    }

    #[must_use]
    pub fn cq_entries(&self) -> u32 {
        self.cq_entries
    }

    #[must_use]
    pub fn setup_flags(&self) -> u32 {
        self.setup_flags
    }

    /// `IORING_FEAT_*` bits reported at setup.
    #[must_use]
    pub fn features(&self) -> u32 {
        self.features
    }

    /// Tag encoding fixed by the first tag stamped on this ring.
    #[must_use]
    pub fn tag_kind(&self) -> Option<TagKind> {
        self.tag_kind
    }

    /// ## Errors
    /// Returns `RingError::Destroyed` after `destroy`.
    pub fn submission_queue(&self) -> Result<&SubmissionQueue, RingError> {
        Ok(&self.inner()?.sq)
    }

    /// Direct access for callers that consume completions one at a time
    /// with `peek` and `advance`.
    ///
    /// ## Errors
    /// Returns `RingError::Destroyed` after `destroy`.
    pub fn completion_queue(&mut self) -> Result<&mut CompletionQueue, RingError> {
        Ok(&mut self.inner_mut()?.cq)
    }

    /// ## Errors
    /// Returns `RingError::Destroyed` after `destroy`.
    pub fn sq_space_left(&self) -> Result<u32, RingError> {
        Ok(self.inner()?.sq.space_left())
    }

    /// ## Errors
    /// Returns `RingError::Destroyed` after `destroy`.
    pub fn cq_ready(&self) -> Result<u32, RingError> {
        Ok(self.inner()?.cq.ready())
    }

    fn register(
        &self,
        opcode: IoringRegisterOp,
        arg: *const c_void,
        nr_args: u32,
    ) -> Result<u32, RingError> {
        let inner = self.inner()?;
        // SAFETY: the kernel only accesses `arg` for the duration of the call.
        unsafe { io_uring::io_uring_register(inner.fd.as_fd(), opcode, arg, nr_args) }
            .map_err(RingError::Register)
    }

    /// ## Errors
    /// Returns `RingError::Register` on kernels without probe support.
    pub fn probe(&self) -> Result<Probe, RingError> {
        let mut probe = Probe::new();
        let arg = addr_of_mut!(probe).cast::<c_void>().cast_const();
        self.register(IoringRegisterOp::RegisterProbe, arg, PROBE_OPS as u32)?;
        // SAFETY: `probe` is live. The register call is declared read-only,
        // so the kernel's writes have to be reloaded from memory.
        Ok(unsafe { read_volatile(&probe) })
    }

    /// ## Errors
    /// Same as `probe`.
    pub fn opcode_supported(&self, opcode: u8) -> Result<bool, RingError> {
        Ok(self.probe()?.opcode_supported(opcode))
    }

    /// Claims the next free submission slot.
    ///
    /// The slot joins the pending batch when an operation is encoded into
    /// it. A slot dropped without encoding is handed out again.
    ///
    /// ## Errors
    /// `RingError::QueueFull` when the kernel has not consumed enough of the
    /// previously flushed entries; flush or harvest and retry.
    /// `RingError::Destroyed` after `destroy`.
    pub fn next_slot(&mut self) -> Result<Slot<'_>, RingError> {
        let inner = self.inner.as_mut().ok_or(RingError::Destroyed)?;
        let index = inner.sq.vacant_index().ok_or(RingError::QueueFull)?;
        // SAFETY: vacant, so the kernel does not own this entry.
        unsafe { *inner.sq.sqe_at(index) = io_uring_sqe::default() };
        Ok(Slot {
            sq: &mut inner.sq,
            tag_kind: &mut self.tag_kind,
            pending_kind: None,
            index,
            committed: false,
        })
    }

    #[doc = "Publishes every encoded slot to the kernel."]
    #[doc = ""]
    #[doc = "Returns the number of entries the kernel accepted."]
    #[doc = ""]
    #[doc = "## Errors"]
    #[doc = "Returns `RingError::Enter` with the kernel's errno, `EINTR` included."]
    pub fn submit(&mut self) -> Result<u32, RingError> {
        self.submit_and_wait(0)
    }

    #[doc = "Publishes every encoded slot and blocks until at least `wait_nr` completions are ready."]
    #[doc = ""]
    #[doc = "## Errors"]
    #[doc = "Returns `RingError::Enter` with the kernel's errno, `EINTR` included."]
    pub fn submit_and_wait(&mut self, wait_nr: u32) -> Result<u32, RingError> {
        let sqpoll = self.setup_flags & IORING_SETUP_SQPOLL != 0;
        let inner = self.inner_mut()?;
        let to_submit = inner.sq.flush();

        let mut flags = 0;
        if wait_nr > 0 || inner.sq.cq_needs_flush() {
            flags |= IORING_ENTER_GETEVENTS;
        }

        let submitted = if sqpoll {
            // The poller thread consumes the ring; enter only to wake it or
            // to wait.
            if inner.sq.needs_wakeup() {
                flags |= IORING_ENTER_SQ_WAKEUP;
            }
            if flags != 0 {
                inner.enter(to_submit, wait_nr, flags)?;
            }
            to_submit
        } else if to_submit > 0 || flags != 0 {
            inner.enter(to_submit, wait_nr, flags)?
        } else {
            0
        };

        log::trace!("submit: to_submit={to_submit} submitted={submitted} wait_nr={wait_nr}");
        Ok(submitted)
    }

    #[doc = "Raw `io_uring_enter` with `IORING_ENTER_*` flags."]
    #[doc = ""]
    #[doc = "Entries must already be published with a flush for `to_submit` to see them."]
    #[doc = ""]
    #[doc = "## Errors"]
    #[doc = "Returns `RingError::Enter` with the kernel's errno."]
    pub fn enter(&mut self, to_submit: u32, min_complete: u32, flags: u32) -> Result<u32, RingError> {
        self.inner()?.enter(to_submit, min_complete, flags)
    }

    /// Copies up to `out.len()` completions into `out`, oldest first, and
    /// consumes them.
    ///
    /// Ready completions are returned without blocking. Only when none are
    /// ready, and either the kernel is holding back overflowed completions
    /// or `wait_nr > 0`, the ring is entered once (submitting nothing,
    /// waiting for `wait_nr`) and the copy is retried exactly once.
    ///
    /// ## Errors
    /// `RingError::Enter` with the kernel's errno if that enter fails.
    /// `RingError::Destroyed` after `destroy`.
    pub fn copy_cqes(&mut self, out: &mut [io_uring_cqe], wait_nr: u32) -> Result<u32, RingError> {
        let inner = self.inner_mut()?;

        let count = inner.cq.copy_ready(out);
        if count > 0 {
            log::trace!("harvest: {count} ready");
            return Ok(count);
        }

        if !inner.sq.cq_needs_flush() && wait_nr == 0 {
            return Ok(0);
        }
        if inner.sq.cq_overflowed() {
            log::warn!(
                "completion ring overflowed ({} dropped), flushing backlog",
                inner.cq.overflow_count()
            );
        }

        inner.enter(0, wait_nr, IORING_ENTER_GETEVENTS)?;
        let count = inner.cq.copy_ready(out);
        log::trace!("harvest: {count} ready after enter (wait_nr={wait_nr})");
        Ok(count)
    }

    /// `copy_cqes` into a fresh batch of at most `capacity` entries. The
    /// batch never holds more than the completion ring does.
    ///
    /// ## Errors
    /// See `copy_cqes`.
    pub fn harvest(&mut self, capacity: usize, wait_for: u32) -> Result<Vec<io_uring_cqe>, RingError> {
        let mut batch = vec![io_uring_cqe::default(); capacity.min(self.cq_entries as usize)];
        let count = self.copy_cqes(&mut batch, wait_for)?;
        batch.truncate(count as usize);
        Ok(batch)
    }
}

impl Drop for IoUring {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A claimed submission entry.
///
/// Borrows the ring mutably, so it cannot outlive the next `submit`.
pub struct Slot<'ring> {
    sq: &'ring mut SubmissionQueue,
    tag_kind: &'ring mut Option<TagKind>,
    // Kind of the stamped tag, recorded on the ring once the entry commits.
    pending_kind: Option<TagKind>,
    index: u32,
    committed: bool,
}

impl Slot<'_> {
    /// Position of this entry in the SQE array.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether an operation has been encoded (and the entry committed).
    #[must_use]
    pub fn is_encoded(&self) -> bool {
        self.committed
    }

    fn entry(&mut self) -> &mut io_uring_sqe {
        // SAFETY: claimed in `next_slot`; the ring cannot be flushed while
        // this slot borrows it.
        unsafe { self.sq.sqe_at(self.index) }
    }

    fn check_kind(expected: Option<TagKind>, kind: TagKind) -> Result<(), RingError> {
        match expected {
            Some(expected) if expected != kind => Err(RingError::TagKindMismatch {
                expected,
                found: kind,
            }),
            _ => Ok(()),
        }
    }

    /// Stamps the correlation tag echoed back in this entry's completion.
    ///
    /// The ring adopts the tag's encoding when this entry commits; a slot
    /// dropped unencoded leaves it unset.
    ///
    /// ## Errors
    /// `RingError::TagKindMismatch` if the ring already uses the other tag
    /// encoding.
    pub fn set_tag(&mut self, tag: impl Into<Tag>) -> Result<(), RingError> {
        let tag = tag.into();
        Self::check_kind(*self.tag_kind, tag.kind())?;
        if self.committed {
            *self.tag_kind = Some(tag.kind());
        } else {
            self.pending_kind = Some(tag.kind());
        }
        self.entry().user_data = tag.user_data();
        Ok(())
    }

    /// `IOSQE_*` flags, see `sqe_flags()`.
    pub fn set_flags(&mut self, flags: u8) {
        self.entry().flags = flags;
    }

    fn encode<P: PrepSqe>(&mut self, op: &P) -> Result<(), RingError> {
        op.validate()?;
        let target_kind = op.cancel_target().map(|tag| tag.kind());
        if let Some(kind) = target_kind {
            Self::check_kind((*self.tag_kind).or(self.pending_kind), kind)?;
        }

        let entry = self.entry();
        entry.reset_operation();
        op.prep(entry);
        if !self.committed {
            self.sq.commit();
            self.committed = true;
        }
        if let Some(kind) = self.pending_kind.take().or(target_kind) {
            *self.tag_kind = Some(kind);
        }
        Ok(())
    }

    /// Encodes `op` into this entry. Encoding again overwrites the entry.
    ///
    /// ## Safety
    /// Any memory `op` points the kernel at (buffers, addresses, length
    /// cells, timespecs) must stay valid and unmoved until this entry's
    /// completion has been harvested.
    ///
    /// ## Errors
    /// `RingError::InvalidParams` if `op` is malformed.
    /// `RingError::TagKindMismatch` if `op` targets a tag of the other
    /// encoding. The entry and the queue are left unchanged on error.
    pub unsafe fn prep<P: PrepSqe>(&mut self, op: &P) -> Result<(), RingError> {
        self.encode(op)
    }

    /// ## Errors
    /// None for a NOP.
    pub fn nop(&mut self) -> Result<(), RingError> {
        self.encode(&Nop)
    }

    /// ## Errors
    /// `RingError::InvalidParams` for a negative fd.
    pub fn close(&mut self, fd: i32) -> Result<(), RingError> {
        self.encode(&Close::new(fd))
    }

    /// ## Errors
    /// `RingError::InvalidParams` for a negative fd.
    pub fn shutdown(&mut self, fd: i32, how: How) -> Result<(), RingError> {
        self.encode(&Shutdown::new(fd, how))
    }

    /// ## Errors
    /// `RingError::InvalidParams` for a negative fd.
    pub fn poll_add(&mut self, fd: i32, mask: u32) -> Result<(), RingError> {
        self.encode(&PollAdd::new(fd, mask))
    }

    /// ## Errors
    /// `RingError::TagKindMismatch` if the target uses the other tag
    /// encoding than this ring.
    pub fn cancel(&mut self, cancel: &AsyncCancel) -> Result<(), RingError> {
        self.encode(cancel)
    }
}
