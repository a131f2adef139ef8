use core::sync::atomic::{AtomicU32, Ordering};

use rustix::io_uring::io_sqring_offsets;

use crate::err::InitError;
use crate::{io_uring_sqe, IORING_SQ_CQ_OVERFLOW, IORING_SQ_NEED_WAKEUP, IORING_SQ_TASKRUN};

/// Userspace view of the submission ring.
///
/// The kernel owns `khead`; we own `ktail`. Entries between `sqe_head` and
/// `sqe_tail` are filled but not yet published through `ktail`.
pub struct SubmissionQueue {
    khead: *const AtomicU32,
    ktail: *const AtomicU32,
    kflags: *const AtomicU32,
    kdropped: *const AtomicU32,
    sqes: *mut io_uring_sqe,
    ring_mask: u32,
    ring_entries: u32,
    sqe_head: u32,
    sqe_tail: u32,
}

impl SubmissionQueue {
    /// ## Safety
    /// `sq_ptr` must point at a mapped SQ ring laid out per `offsets`, and
    /// `sqes` at an array of at least `ring_entries` entries. Both mappings
    /// must outlive the returned queue.
    ///
    /// ## Errors
    /// Returns `InitError::NotPowerOfTwo` if the ring size cannot be masked.
    pub unsafe fn new(
        sq_ptr: *mut u8,
        offsets: &io_sqring_offsets,
        sqes: *mut io_uring_sqe,
    ) -> Result<Self, InitError> {
        let at = |off: u32| unsafe { sq_ptr.add(off as usize) };

        let ring_mask = unsafe { *at(offsets.ring_mask).cast::<u32>() };
        let ring_entries = unsafe { *at(offsets.ring_entries).cast::<u32>() };
        if !ring_entries.is_power_of_two() || ring_mask != ring_entries - 1 {
            return Err(InitError::NotPowerOfTwo(ring_entries));
        }

        let khead = at(offsets.head).cast::<AtomicU32>();
        let ktail = at(offsets.tail).cast::<AtomicU32>();

        // Identity mapping: slot i of the index array always names sqes[i].
        let array = at(offsets.array).cast::<u32>();
        for i in 0..ring_entries {
            unsafe { array.add(i as usize).write_volatile(i) };
        }

        let tail = unsafe { (*ktail).load(Ordering::Acquire) };

        Ok(Self {
            khead,
            ktail,
            kflags: at(offsets.flags).cast::<AtomicU32>(),
            kdropped: at(offsets.dropped).cast::<AtomicU32>(),
            sqes,
            ring_mask,
            ring_entries,
            sqe_head: tail,
            sqe_tail: tail,
        })
    }

    #[must_use]
    pub fn ring_mask(&self) -> u32 {
        self.ring_mask
    }

    #[must_use]
    pub fn ring_entries(&self) -> u32 {
        self.ring_entries
    }

    fn get_khead(&self) -> u32 {
        unsafe { (*self.khead).load(Ordering::Acquire) }
    }

    fn set_ktail(&self, value: u32) {
        unsafe { (*self.ktail).store(value, Ordering::Release) }
    }

    fn kflags(&self) -> u32 {
        unsafe { (*self.kflags).load(Ordering::Acquire) }
    }

    /// Slots the caller can still claim before the kernel consumes more.
    #[must_use]
    pub fn space_left(&self) -> u32 {
        self.ring_entries - self.sqe_tail.wrapping_sub(self.get_khead())
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.space_left() == 0
    }

    /// Committed entries not yet published to the kernel.
    #[must_use]
    pub fn pending(&self) -> u32 {
        self.sqe_tail.wrapping_sub(self.sqe_head)
    }

    /// Array index of the next free slot, without claiming it.
    pub(crate) fn vacant_index(&self) -> Option<u32> {
        if self.sqe_tail.wrapping_sub(self.get_khead()) >= self.ring_entries {
            return None;
        }
        Some(self.sqe_tail & self.ring_mask)
    }

    /// ## Safety
    /// `index` must come from `vacant_index` with no intervening `flush`, so
    /// the kernel does not own the entry.
    pub(crate) unsafe fn sqe_at(&mut self, index: u32) -> &mut io_uring_sqe {
        debug_assert!(index <= self.ring_mask);
        unsafe { &mut *self.sqes.add(index as usize) }
    }

    /// Adds the entry at the current tail to the pending batch.
    pub(crate) fn commit(&mut self) {
        self.sqe_tail = self.sqe_tail.wrapping_add(1);
    }

    /// Publishes every committed entry and returns how many entries the
    /// kernel has yet to consume.
    pub fn flush(&mut self) -> u32 {
        if self.sqe_head != self.sqe_tail {
            self.sqe_head = self.sqe_tail;
            // Release orders the entry writes before the tail the kernel
            // reads with acquire.
            self.set_ktail(self.sqe_tail);
        }
        self.sqe_tail.wrapping_sub(self.get_khead())
    }

    #[must_use]
    pub fn needs_wakeup(&self) -> bool {
        self.kflags() & IORING_SQ_NEED_WAKEUP != 0
    }

    /// The kernel holds completions that only an enter can move into the
    /// visible CQ ring.
    #[must_use]
    pub fn cq_needs_flush(&self) -> bool {
        self.kflags() & (IORING_SQ_CQ_OVERFLOW | IORING_SQ_TASKRUN) != 0
    }

    /// The kernel ran out of CQ ring space and is buffering completions.
    #[must_use]
    pub fn cq_overflowed(&self) -> bool {
        self.kflags() & IORING_SQ_CQ_OVERFLOW != 0
    }

    /// Entries the kernel discarded as invalid.
    #[must_use]
    pub fn dropped(&self) -> u32 {
        unsafe { (*self.kdropped).load(Ordering::Acquire) }
    }
}
