use core::ffi::c_void;
use core::ptr::NonNull;

use rustix::fd::BorrowedFd;
use rustix::io::Errno;
use rustix::mm::{MapFlags, ProtFlags};

use crate::err::InitError;

/// One `MAP_SHARED` region of a ring, unmapped on drop.
pub struct RwMmap {
    ptr: NonNull<c_void>,
    size: usize,
}

impl RwMmap {
    /// Maps `size` bytes of the ring fd at one of the `IORING_OFF_*` offsets.
    ///
    /// ## Errors
    /// Returns `InitError::MmapFailed` if the kernel refuses the mapping.
    pub fn new(fd: BorrowedFd<'_>, offset: u64, size: usize) -> Result<Self, InitError> {
        if size == 0 {
            return Err(InitError::InvalidParameters);
        }

        let flags = MapFlags::SHARED | MapFlags::POPULATE;

        // SAFETY: fresh mapping at a kernel-chosen address, aliases nothing.
        let addr = unsafe {
            rustix::mm::mmap(
                core::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                flags,
                fd,
                offset,
            )
        }
        .map_err(InitError::MmapFailed)?;

        Ok(Self {
            ptr: NonNull::new(addr).ok_or(InitError::MmapFailed(Errno::INVAL))?,
            size,
        })
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast::<u8>()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for RwMmap {
    fn drop(&mut self) {
        // SAFETY: ptr/size came from a successful mmap and nothing else
        // unmaps it.
        let _ = unsafe { rustix::mm::munmap(self.ptr.as_ptr(), self.size) };
    }
}
