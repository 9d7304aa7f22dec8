//! Completion queue: the 16-byte completion entry and the consumer half of
//! the ring.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::sys;

/// A completion queue entry, returned by value.
///
/// Written by the kernel; the user-data tag is echoed from the submission
/// it answers. A negative result is the negated errno of the failed
/// operation.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Entry {
    user_data: u64,
    res: i32,
    flags: u32,
}

const _: () = assert!(std::mem::size_of::<Entry>() == 16);

impl Entry {
    /// The tag stored in the matching submission entry.
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// Raw operation result: non-negative return value, or negated errno.
    pub fn result(&self) -> i32 {
        self.res
    }

    /// The result as an `io::Result`, mapping negative values to the
    /// corresponding OS error.
    pub fn io_result(&self) -> std::io::Result<u32> {
        if self.res < 0 {
            Err(std::io::Error::from_raw_os_error(-self.res))
        } else {
            Ok(self.res as u32)
        }
    }

    /// Raw completion flags.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// The provided-buffer id, when the operation selected one from a
    /// buffer group.
    pub fn buffer_id(&self) -> Option<u16> {
        if self.flags & sys::IORING_CQE_F_BUFFER != 0 {
            Some((self.flags >> sys::IORING_CQE_BUFFER_SHIFT) as u16)
        } else {
            None
        }
    }
}

/// Consumer half of the ring. Single consumer, no locking; the kernel is
/// the producer on this side.
pub(crate) struct Cq {
    khead: *const AtomicU32,
    ktail: *const AtomicU32,
    koverflow: *const AtomicU32,
    cqes: *const Entry,
    mask: u32,
    entries: u32,
}

unsafe impl Send for Cq {}
unsafe impl Sync for Cq {}

impl Cq {
    /// Binds the consumer half to the mapped CQ ring.
    ///
    /// # Safety
    ///
    /// `ring` must be the live CQ-ring mapping for the fd that produced `p`.
    pub(crate) unsafe fn new(ring: &crate::util::Mmap, p: &sys::io_uring_params) -> Cq {
        Cq {
            khead: ring.offset(p.cq_off.head) as *const AtomicU32,
            ktail: ring.offset(p.cq_off.tail) as *const AtomicU32,
            koverflow: ring.offset(p.cq_off.overflow) as *const AtomicU32,
            cqes: ring.offset(p.cq_off.cqes) as *const Entry,
            mask: *(ring.offset(p.cq_off.ring_mask) as *const u32),
            entries: *(ring.offset(p.cq_off.ring_entries) as *const u32),
        }
    }

    pub(crate) fn entries(&self) -> u32 {
        self.entries
    }

    /// Consumes one entry if the kernel has posted any.
    ///
    /// The acquire load of the shared tail is what makes the entry's bytes
    /// visible; the release store of the head returns the slot.
    pub(crate) fn pop(&self) -> Option<Entry> {
        let khead = unsafe { &*self.khead };
        let head = khead.load(Ordering::Acquire);
        let tail = unsafe { &*self.ktail }.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let cqe = unsafe { *self.cqes.add((head & self.mask) as usize) };
        khead.store(head.wrapping_add(1), Ordering::Release);
        Some(cqe)
    }

    /// Completions the kernel could not post for lack of CQ space.
    pub(crate) fn overflow(&self) -> u32 {
        unsafe { &*self.koverflow }.load(Ordering::Relaxed)
    }
}
