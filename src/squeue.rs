//! Submission queue: the 64-byte submission entry and the producer half of
//! the ring.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::sys;

bitflags::bitflags! {
    /// Per-entry submission flags (`IOSQE_*`).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// Interpret the entry's fd as an index into the registered file
        /// table instead of a raw descriptor.
        const FIXED_FILE = sys::IOSQE_FIXED_FILE;
        /// Issue this entry only after all prior entries complete.
        const IO_DRAIN = sys::IOSQE_IO_DRAIN;
        /// Chain the next entry after this one; the chain breaks on the
        /// first short or failed operation.
        const IO_LINK = sys::IOSQE_IO_LINK;
        /// Like `IO_LINK`, but the chain survives failed operations.
        const IO_HARDLINK = sys::IOSQE_IO_HARDLINK;
        /// Always punt to async workers instead of trying inline first.
        const ASYNC = sys::IOSQE_ASYNC;
        /// Select a buffer from a provided buffer group at execution time.
        const BUFFER_SELECT = sys::IOSQE_BUFFER_SELECT;
    }
}

/// A submission queue entry.
///
/// The layout is ABI-exact: 64 bytes the kernel consumes in place. Several
/// fields are unions in the kernel header; the setters below write the
/// shared storage under the name each opcode gives it, the way
/// [`crate::opcode`] preparers expect.
///
/// An entry borrowed from [`Ring::get_sqe`](crate::Ring::get_sqe) arrives
/// zeroed and is only valid until the next [`Ring::submit`](crate::Ring::submit)
/// returns; the kernel copies it out during submit.
#[repr(C)]
#[derive(Debug)]
pub struct Entry {
    opcode: u8,
    flags: u8,
    ioprio: u16,
    fd: i32,
    off: u64,      // union { off, addr2 }
    addr: u64,     // union { addr, splice_off_in }
    len: u32,
    op_flags: u32, // union of the per-opcode flag words
    user_data: u64,
    buf_index: u16, // union { buf_index, buf_group }
    personality: u16,
    splice_fd_in: i32,
    pad: [u64; 2],
}

const _: () = assert!(std::mem::size_of::<Entry>() == 64);

impl Entry {
    /// Zeroes all 64 bytes in a single block store.
    pub fn reset(&mut self) {
        // One memset beats field-by-field assignment on the reclaim path.
        unsafe { std::ptr::write_bytes(self, 0, 1) }
    }

    pub(crate) fn set_opcode(&mut self, opcode: u8) {
        self.opcode = opcode;
    }

    /// Sets the `IOSQE_*` flag byte.
    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags.bits();
    }

    /// Current `IOSQE_*` flags.
    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.flags)
    }

    /// Sets the I/O priority, as `ioprio_set(2)` encodes it.
    pub fn set_ioprio(&mut self, ioprio: u16) {
        self.ioprio = ioprio;
    }

    pub(crate) fn set_fd(&mut self, fd: i32) {
        self.fd = fd;
    }

    /// Sets the file offset.
    pub fn set_off(&mut self, off: u64) {
        self.off = off;
    }

    /// Sets the second address; shares storage with the offset.
    pub fn set_addr2(&mut self, addr2: u64) {
        self.off = addr2;
    }

    /// Sets the buffer address.
    pub fn set_addr(&mut self, addr: u64) {
        self.addr = addr;
    }

    /// Sets the splice input offset; shares storage with the address.
    pub fn set_splice_off_in(&mut self, off: u64) {
        self.addr = off;
    }

    /// Sets the length field.
    pub fn set_len(&mut self, len: u32) {
        self.len = len;
    }

    /// Sets the opcode-specific flag word (rw flags, fsync flags, ...).
    pub fn set_op_flags(&mut self, flags: u32) {
        self.op_flags = flags;
    }

    /// Tags the entry. The kernel echoes the tag verbatim in the matching
    /// completion; it is the only way to correlate the two.
    pub fn set_user_data(&mut self, user_data: u64) {
        self.user_data = user_data;
    }

    /// Current user-data tag.
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// Sets the registered buffer index for fixed I/O.
    pub fn set_buf_index(&mut self, index: u16) {
        self.buf_index = index;
    }

    /// Sets the buffer group id; shares storage with the buffer index.
    pub fn set_buf_group(&mut self, group: u16) {
        self.buf_index = group;
    }

    /// Sets the personality id registered with the kernel.
    pub fn set_personality(&mut self, personality: u16) {
        self.personality = personality;
    }

    /// Sets the splice input fd.
    pub fn set_splice_fd_in(&mut self, fd: i32) {
        self.splice_fd_in = fd;
    }
}

/// Producer half of the ring.
///
/// The local tail runs ahead of the shared tail while a batch is being
/// composed; only `publish` makes entries visible to the kernel. There is
/// no locking here: one producer at a time, enforced by the layer above.
pub(crate) struct Sq {
    khead: *const AtomicU32,
    ktail: *const AtomicU32,
    kflags: *const AtomicU32,
    kdropped: *const AtomicU32,
    sqes: *mut Entry,
    mask: u32,
    entries: u32,
    // Local tail; shared with the kernel only on publish.
    tail: AtomicU32,
}

unsafe impl Send for Sq {}
unsafe impl Sync for Sq {}

impl Sq {
    /// Binds the producer half to the mapped rings.
    ///
    /// # Safety
    ///
    /// `ring` and `sqes` must be the live SQ-ring and SQE-array mappings
    /// for the fd that produced `p`.
    pub(crate) unsafe fn new(
        ring: &crate::util::Mmap,
        sqes: &crate::util::Mmap,
        p: &sys::io_uring_params,
    ) -> Sq {
        let mask = *(ring.offset(p.sq_off.ring_mask) as *const u32);
        let entries = *(ring.offset(p.sq_off.ring_entries) as *const u32);

        // Identity mapping from SQ slots to SQE slots, written once and
        // never touched again.
        let array = ring.offset(p.sq_off.array) as *mut u32;
        for i in 0..entries {
            array.add(i as usize).write(i);
        }

        let ktail = ring.offset(p.sq_off.tail) as *const AtomicU32;
        // The local tail picks up from wherever the shared tail starts.
        let tail = AtomicU32::new((*ktail).load(Ordering::Relaxed));

        Sq {
            khead: ring.offset(p.sq_off.head) as *const AtomicU32,
            ktail,
            kflags: ring.offset(p.sq_off.flags) as *const AtomicU32,
            kdropped: ring.offset(p.sq_off.dropped) as *const AtomicU32,
            sqes: sqes.as_mut_ptr() as *mut Entry,
            mask,
            entries,
            tail,
        }
    }

    pub(crate) fn entries(&self) -> u32 {
        self.entries
    }

    /// Hands out the entry at the local tail, zeroed, and advances the
    /// local tail. Fails when the ring is full.
    pub(crate) fn get(&self) -> io::Result<&mut Entry> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = unsafe { &*self.khead }.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.entries {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "submission queue is full",
            ));
        }
        let sqe = unsafe { &mut *self.sqes.add((tail & self.mask) as usize) };
        sqe.reset();
        self.tail.store(tail.wrapping_add(1), Ordering::Relaxed);
        Ok(sqe)
    }

    /// Publishes everything between the shared tail and the local tail.
    /// Returns the number of entries made visible.
    ///
    /// The release store is what hands the entry contents over to the
    /// kernel; all SQE writes must happen before it.
    pub(crate) fn publish(&self) -> u32 {
        let tail = self.tail.load(Ordering::Relaxed);
        let ktail = unsafe { &*self.ktail };
        let shared = ktail.load(Ordering::Relaxed);
        ktail.store(tail, Ordering::Release);
        tail.wrapping_sub(shared)
    }

    /// Whether the kernel-poll thread went idle and wants `IORING_ENTER_SQ_WAKEUP`.
    pub(crate) fn needs_wakeup(&self) -> bool {
        let flags = unsafe { &*self.kflags }.load(Ordering::Acquire);
        flags & sys::IORING_SQ_NEED_WAKEUP != 0
    }

    /// Entries the kernel dropped because their SQE index was out of
    /// bounds. Stays zero while the identity array is intact.
    pub(crate) fn dropped(&self) -> u32 {
        unsafe { &*self.kdropped }.load(Ordering::Relaxed)
    }
}
