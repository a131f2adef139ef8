use core::sync::atomic::{AtomicU32, Ordering};

use rustix::io_uring::io_cqring_offsets;

use crate::err::{InitError, RingError};
use crate::io_uring_cqe;

/// Userspace view of the completion ring.
///
/// The kernel owns `ktail` and publishes entries before bumping it; we own
/// `khead` and bump it only after the entries behind it have been copied
/// out.
pub struct CompletionQueue {
    khead: *const AtomicU32,
    ktail: *const AtomicU32,
    koverflow: *const AtomicU32,
    cqes: *const io_uring_cqe,
    ring_mask: u32,
    ring_entries: u32,
}

impl CompletionQueue {
    /// ## Safety
    /// `cq_ptr` must point at a mapped CQ ring laid out per `offsets` that
    /// outlives the returned queue.
    ///
    /// ## Errors
    /// Returns `InitError::NotPowerOfTwo` if the ring size cannot be masked.
    pub unsafe fn new(cq_ptr: *mut u8, offsets: &io_cqring_offsets) -> Result<Self, InitError> {
        let at = |off: u32| unsafe { cq_ptr.add(off as usize) };

        let ring_mask = unsafe { *at(offsets.ring_mask).cast::<u32>() };
        let ring_entries = unsafe { *at(offsets.ring_entries).cast::<u32>() };
        if !ring_entries.is_power_of_two() || ring_mask != ring_entries - 1 {
            return Err(InitError::NotPowerOfTwo(ring_entries));
        }

        Ok(Self {
            khead: at(offsets.head).cast::<AtomicU32>(),
            ktail: at(offsets.tail).cast::<AtomicU32>(),
            koverflow: at(offsets.overflow).cast::<AtomicU32>(),
            cqes: at(offsets.cqes).cast::<io_uring_cqe>(),
            ring_mask,
            ring_entries,
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

    pub(crate) fn get_khead(&self) -> u32 {
        unsafe { (*self.khead).load(Ordering::Acquire) }
    }

    fn get_ktail(&self) -> u32 {
        unsafe { (*self.ktail).load(Ordering::Acquire) }
    }

    fn set_khead(&self, value: u32) {
        unsafe { (*self.khead).store(value, Ordering::Release) }
    }

    /// Completions published past the current head.
    #[must_use]
    pub fn ready(&self) -> u32 {
        self.get_ktail().wrapping_sub(self.get_khead())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready() == 0
    }

    /// Completions the kernel had to drop because the ring was full and
    /// the kernel could not buffer them.
    #[must_use]
    pub fn overflow_count(&self) -> u32 {
        unsafe { (*self.koverflow).load(Ordering::Acquire) }
    }

    /// Copy of the entry at the head, without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<io_uring_cqe> {
        if self.ready() == 0 {
            return None;
        }
        let index = self.get_khead() & self.ring_mask;
        Some(unsafe { self.cqes.add(index as usize).read() })
    }

    /// Hands `count` consumed entries back to the kernel.
    ///
    /// ## Errors
    /// Returns `RingError::HeadOverrun` if fewer than `count` entries are
    /// ready; the head is left untouched.
    pub fn advance(&mut self, count: u32) -> Result<(), RingError> {
        let ready = self.ready();
        if count > ready {
            return Err(RingError::HeadOverrun {
                requested: count,
                ready,
            });
        }
        self.set_khead(self.get_khead().wrapping_add(count));
        Ok(())
    }

    /// Copies up to `out.len()` ready entries in FIFO order and consumes
    /// them. Returns the number copied.
    ///
    /// The ring is circular, so the ready run may wrap past the end of the
    /// entry array:
    ///
    /// ```text
    /// 0                          n-1
    /// |.....head.......tail......|   one copy
    /// |.....tail.......head......|   head..n-1, then 0..tail
    /// ```
    pub fn copy_ready(&mut self, out: &mut [io_uring_cqe]) -> u32 {
        let capacity = u32::try_from(out.len()).unwrap_or(u32::MAX);
        let count = self.ready().min(capacity);
        if count == 0 {
            return 0;
        }

        let head = self.get_khead() & self.ring_mask;
        let first = (self.ring_entries - head).min(count);

        // SAFETY: head + first <= ring_entries and count <= out.len(); the
        // kernel does not write entries between head and tail.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.cqes.add(head as usize),
                out.as_mut_ptr(),
                first as usize,
            );
            if count > first {
                core::ptr::copy_nonoverlapping(
                    self.cqes,
                    out.as_mut_ptr().add(first as usize),
                    (count - first) as usize,
                );
            }
        }

        self.set_khead(self.get_khead().wrapping_add(count));
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ENTRIES: usize = 8;

    /// Stand-in for the kernel side of a mapped CQ ring.
    #[repr(C)]
    #[derive(Default)]
    struct FakeCqRing {
        head: AtomicU32,
        tail: AtomicU32,
        ring_mask: u32,
        ring_entries: u32,
        overflow: AtomicU32,
        _pad: u32,
        cqes: [io_uring_cqe; ENTRIES],
    }

    impl FakeCqRing {
        fn boxed(start: u32) -> Box<Self> {
            let ring = Box::new(Self {
                ring_mask: ENTRIES as u32 - 1,
                ring_entries: ENTRIES as u32,
                ..Self::default()
            });
            ring.head.store(start, Ordering::Relaxed);
            ring.tail.store(start, Ordering::Relaxed);
            ring
        }

        fn offsets() -> io_cqring_offsets {
            let mut off = io_cqring_offsets::default();
            off.head = core::mem::offset_of!(Self, head) as u32;
            off.tail = core::mem::offset_of!(Self, tail) as u32;
            off.ring_mask = core::mem::offset_of!(Self, ring_mask) as u32;
            off.ring_entries = core::mem::offset_of!(Self, ring_entries) as u32;
            off.overflow = core::mem::offset_of!(Self, overflow) as u32;
            off.cqes = core::mem::offset_of!(Self, cqes) as u32;
            off
        }

        fn post(&mut self, user_data: u64, res: i32) {
            let tail = self.tail.load(Ordering::Relaxed);
            self.cqes[(tail as usize) & (ENTRIES - 1)] = io_uring_cqe {
                user_data,
                res,
                flags: 0,
            };
            self.tail.store(tail.wrapping_add(1), Ordering::Release);
        }

        fn queue(&mut self) -> CompletionQueue {
            let ptr = (self as *mut Self).cast::<u8>();
            unsafe { CompletionQueue::new(ptr, &Self::offsets()) }.expect("valid fake ring")
        }
    }

    fn tags(cqes: &[io_uring_cqe]) -> Vec<u64> {
        cqes.iter().map(|c| c.user_data).collect()
    }

    #[test]
    fn test_copy_without_wrap() {
        let mut ring = FakeCqRing::boxed(0);
        for tag in 0..3 {
            ring.post(tag, 0);
        }
        let mut cq = ring.queue();

        let mut out = [io_uring_cqe::default(); 4];
        assert_eq!(cq.copy_ready(&mut out), 3);
        assert_eq!(tags(&out[..3]), vec![0, 1, 2]);
        assert!(cq.is_empty());
        assert_eq!(ring.head.load(Ordering::Acquire), 3);
    }

    #[test]
    fn test_copy_across_wrap_keeps_fifo_order() {
        let mut ring = FakeCqRing::boxed(ENTRIES as u32 - 1);
        ring.post(100, 1);
        ring.post(101, 2);
        let mut cq = ring.queue();

        let mut out = [io_uring_cqe::default(); 4];
        assert_eq!(cq.copy_ready(&mut out), 2);
        assert_eq!(tags(&out[..2]), vec![100, 101]);
        assert_eq!(out[0].res, 1);
        assert_eq!(out[1].res, 2);
        assert_eq!(ring.head.load(Ordering::Acquire), ENTRIES as u32 + 1);
    }

    #[test]
    fn test_copy_across_u32_counter_wrap() {
        let mut ring = FakeCqRing::boxed(u32::MAX - 1);
        for tag in 0..4 {
            ring.post(tag, 0);
        }
        let mut cq = ring.queue();
        assert_eq!(cq.ready(), 4);

        let mut out = [io_uring_cqe::default(); 8];
        assert_eq!(cq.copy_ready(&mut out), 4);
        assert_eq!(tags(&out[..4]), vec![0, 1, 2, 3]);
        assert_eq!(ring.head.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_copy_bounded_by_batch_capacity() {
        let mut ring = FakeCqRing::boxed(5);
        for tag in 0..6 {
            ring.post(tag, 0);
        }
        let mut cq = ring.queue();

        let mut out = [io_uring_cqe::default(); 4];
        assert_eq!(cq.copy_ready(&mut out), 4);
        assert_eq!(tags(&out), vec![0, 1, 2, 3]);
        assert_eq!(cq.ready(), 2);

        assert_eq!(cq.copy_ready(&mut out), 2);
        assert_eq!(tags(&out[..2]), vec![4, 5]);
        assert!(cq.is_empty());
    }

    #[test]
    fn test_copy_empty_ring_and_empty_batch() {
        let mut ring = FakeCqRing::boxed(3);
        let mut cq = ring.queue();
        let mut out = [io_uring_cqe::default(); 2];
        assert_eq!(cq.copy_ready(&mut out), 0);

        ring.post(9, 0);
        let mut cq = ring.queue();
        assert_eq!(cq.copy_ready(&mut []), 0);
        assert_eq!(cq.ready(), 1);
    }

    #[test]
    fn test_full_ring_drains_in_order() {
        let mut ring = FakeCqRing::boxed(6);
        for tag in 0..ENTRIES as u64 {
            ring.post(tag, 0);
        }
        let mut cq = ring.queue();

        let mut out = [io_uring_cqe::default(); ENTRIES];
        assert_eq!(cq.copy_ready(&mut out), ENTRIES as u32);
        assert_eq!(tags(&out), (0..ENTRIES as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_peek_and_advance() {
        let mut ring = FakeCqRing::boxed(0);
        ring.post(7, -11);
        let mut cq = ring.queue();

        let cqe = cq.peek().expect("one entry ready");
        assert_eq!(cqe.user_data, 7);
        assert_eq!(cqe.res, -11);
        assert_eq!(cq.ready(), 1);

        cq.advance(1).expect("advance within ready");
        assert!(cq.peek().is_none());
    }

    #[test]
    fn test_advance_past_tail_is_rejected() {
        let mut ring = FakeCqRing::boxed(0);
        ring.post(1, 0);
        let mut cq = ring.queue();

        match cq.advance(2) {
            Err(RingError::HeadOverrun { requested, ready }) => {
                assert_eq!(requested, 2);
                assert_eq!(ready, 1);
            }
            other => panic!("expected HeadOverrun, got {other:?}"),
        }
        assert_eq!(ring.head.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_non_power_of_two_rejected() {
        let mut ring = FakeCqRing::boxed(0);
        ring.ring_entries = 6;
        ring.ring_mask = 5;
        let ptr = (&mut *ring as *mut FakeCqRing).cast::<u8>();
        match unsafe { CompletionQueue::new(ptr, &FakeCqRing::offsets()) } {
            Err(InitError::NotPowerOfTwo(6)) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
            Ok(_) => panic!("expected NotPowerOfTwo"),
        }
    }
}
