//! Pre-registered file descriptors.
//!
//! Operations that carry [`Flags::FIXED_FILE`](crate::squeue::Flags::FIXED_FILE)
//! name their file by an index into a kernel-side table instead of a raw
//! descriptor, skipping the per-operation descriptor lookup. [`FixedFiles`]
//! owns that table: it hands out slot indices, fills single slots through
//! the files-update registration call, and grows by re-registering a
//! larger table without disturbing the slots already handed out.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::ring::Ring;

const UNUSED: RawFd = -1;

/// A registered file-descriptor table with stable slots.
///
/// Registration and growth serialize on an internal mutex; readers of a
/// slot index never contend, because a slot's meaning cannot change while
/// its owner holds it. The table tracks only the mapping; the underlying
/// descriptors stay owned by the caller and must outlive their slots.
///
/// A failed registration syscall leaves the kernel and local views out of
/// sync. No rollback is attempted: drop the table and build a new one.
pub struct FixedFiles {
    ring: Arc<Ring>,
    slots: Mutex<Vec<RawFd>>,
}

impl FixedFiles {
    /// Registers a table of `capacity` unused slots with `ring`. A ring
    /// supports one file-table registration at a time.
    pub fn new(ring: Arc<Ring>, capacity: usize) -> io::Result<FixedFiles> {
        let slots = vec![UNUSED; capacity.max(1)];
        ring.register_files(&slots)?;
        Ok(FixedFiles {
            ring,
            slots: Mutex::new(slots),
        })
    }

    /// Places `fd` in a free slot and returns the slot index.
    ///
    /// When the table is full it doubles: the current registration is
    /// dropped and a larger table is registered with every live
    /// descriptor kept in its old slot. Growth costs two registration
    /// syscalls and rejects in-flight fixed-file operations, so size the
    /// initial capacity generously.
    pub fn register(&self, fd: RawFd) -> io::Result<u32> {
        let mut slots = self.slots.lock().unwrap();

        let slot = match slots.iter().position(|&slot| slot == UNUSED) {
            Some(slot) => slot,
            None => {
                let slot = slots.len();
                let mut grown = slots.clone();
                grown.resize(slots.len() * 2, UNUSED);
                debug!("growing fixed file table to {} slots", grown.len());
                self.ring.unregister_files()?;
                self.ring.register_files(&grown)?;
                *slots = grown;
                slot
            }
        };

        slots[slot] = fd;
        self.ring.update_files(&slots[slot..slot + 1], slot as u32)?;
        Ok(slot as u32)
    }

    /// Releases `slot`, leaving the caller's descriptor open.
    pub fn unregister(&self, slot: u32) -> io::Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slot as usize;
        assert!(
            slot < slots.len() && slots[slot] != UNUSED,
            "slot is not registered"
        );
        slots[slot] = UNUSED;
        self.ring.update_files(&slots[slot..slot + 1], slot as u32)
    }

    /// Current table capacity.
    pub fn capacity(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

impl Drop for FixedFiles {
    fn drop(&mut self) {
        if let Err(err) = self.ring.unregister_files() {
            debug!("unregistering file table failed: {err}");
        }
    }
}
