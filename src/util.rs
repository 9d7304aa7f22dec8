use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

use crate::sys;

/// Owned memory mapping, unmapped on drop.
///
/// Covers both flavors the crate needs: shared mappings of the ring fd at
/// the kernel-defined offsets, and the anonymous private arena backing the
/// fixed-buffer pool.
pub(crate) struct Mmap {
    ptr: *mut libc::c_void,
    len: usize,
}

// The mapping is plain memory; thread safety of what is stored inside it
// is the concern of the owner.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

impl Mmap {
    /// Maps `len` bytes of the ring fd at one of the `IORING_OFF_*` offsets.
    pub(crate) fn map_ring(len: usize, fd: RawFd, offset: i64) -> io::Result<Mmap> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(sys::setup_error());
        }
        Ok(Mmap { ptr, len })
    }

    /// Maps `len` anonymous private bytes.
    pub(crate) fn map_anonymous(len: usize) -> io::Result<Mmap> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Mmap { ptr, len })
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }

    /// Pointer `offset` bytes into the mapping.
    ///
    /// # Safety
    ///
    /// `offset` must be within the mapping, as is the case for the byte
    /// offsets the kernel reports in `io_uring_params`.
    pub(crate) unsafe fn offset(&self, offset: u32) -> *mut u8 {
        debug_assert!((offset as usize) < self.len);
        self.as_mut_ptr().add(offset as usize)
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}
