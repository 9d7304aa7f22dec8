use std::fmt::{self, Debug};
use std::ops::{Deref, DerefMut};
use std::slice;
use std::sync::Arc;

use super::pool::Shared;

/// A unique handle to one slice of a [`FixedBufPool`] arena.
///
/// While checked out, the handle exclusively owns its slice: the pool will
/// not hand the same memory to anyone else until the handle is dropped.
/// Dropping checks the slice back in. Holding a handle across an
/// in-flight operation is what makes fixed I/O sound: drop it only after
/// the operation's completion has been reaped.
///
/// [`FixedBufPool`]: super::FixedBufPool
pub struct FixedBuf {
    pool: Arc<Shared>,
    ptr: *mut u8,
    index: u16,
}

unsafe impl Send for FixedBuf {}

impl FixedBuf {
    pub(super) fn new(pool: Arc<Shared>, index: u16) -> FixedBuf {
        let ptr = pool.slice_ptr(index);
        FixedBuf { pool, ptr, index }
    }

    /// Stable address of the slice; what goes into the SQE's addr field.
    pub fn stable_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Stable mutable address of the slice.
    pub fn stable_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    /// Length of the slice, equal to the pool's per-buffer size.
    pub fn len(&self) -> usize {
        self.pool.buf_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of this slice within the arena.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// The registered-buffer index for the SQE. The arena is registered
    /// as a single kernel buffer, so this is always 0; the kernel works
    /// out the slice from the address range.
    pub fn buf_index(&self) -> u16 {
        0
    }
}

impl Deref for FixedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len()) }
    }
}

impl DerefMut for FixedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len()) }
    }
}

impl Drop for FixedBuf {
    fn drop(&mut self) {
        self.pool.check_in(self.index);
    }
}

impl Debug for FixedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBuf")
            .field("index", &self.index)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
