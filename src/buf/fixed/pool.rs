// Internal state shared by FixedBufPool and the FixedBuf handles.

use std::io;
use std::sync::{Arc, Condvar, Mutex};

use crate::ring::Ring;
use crate::util::Mmap;

pub(super) struct Shared {
    pub(super) ring: Arc<Ring>,
    arena: Mmap,
    buf_size: usize,
    count: usize,
    // Free slice indices, most recently returned on top so warm buffers
    // are reused first.
    free: Mutex<Vec<u16>>,
    available: Condvar,
}

impl Shared {
    pub(super) fn new(ring: Arc<Ring>, buf_size: usize, count: usize) -> io::Result<Shared> {
        assert!(buf_size > 0, "buffer size must be non-zero");
        assert!(
            count > 0 && count <= u16::MAX as usize + 1,
            "buffer count must fit a 16-bit slice index"
        );

        let arena = Mmap::map_anonymous(buf_size * count)?;
        let iovecs = [libc::iovec {
            iov_base: arena.as_mut_ptr() as *mut _,
            iov_len: buf_size * count,
        }];
        ring.register_buffers(&iovecs)?;

        let free = (0..count).rev().map(|i| i as u16).collect();
        Ok(Shared {
            ring,
            arena,
            buf_size,
            count,
            free: Mutex::new(free),
            available: Condvar::new(),
        })
    }

    pub(super) fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub(super) fn count(&self) -> usize {
        self.count
    }

    /// Slice addresses never move: base + index * size for the lifetime
    /// of the arena.
    pub(super) fn slice_ptr(&self, index: u16) -> *mut u8 {
        debug_assert!((index as usize) < self.count);
        unsafe { self.arena.as_mut_ptr().add(index as usize * self.buf_size) }
    }

    pub(super) fn check_out(&self) -> u16 {
        let mut free = self.free.lock().unwrap();
        loop {
            if let Some(index) = free.pop() {
                return index;
            }
            free = self.available.wait(free).unwrap();
        }
    }

    pub(super) fn try_check_out(&self) -> Option<u16> {
        self.free.lock().unwrap().pop()
    }

    pub(super) fn check_in(&self, index: u16) {
        let mut free = self.free.lock().unwrap();
        debug_assert!(!free.contains(&index), "buffer checked in twice");
        free.push(index);
        drop(free);
        self.available.notify_one();
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // All handles hold an Arc to this state, so none are outstanding
        // here; the arena unmaps after the kernel lets go of it.
        if let Err(err) = self.ring.unregister_buffers() {
            log::debug!("unregistering buffer arena failed: {err}");
        }
    }
}
