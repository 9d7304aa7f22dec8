//! Blocking filesystem operations routed through a [`Queue`].
//!
//! The facade exists for programs that want uring-backed file I/O without
//! driving the ring themselves: open goes through the openat opcode,
//! reads and writes through readv/writev or their fixed-buffer variants,
//! and an opened file can be transparently registered in a fixed-file
//! table so every subsequent operation references it by slot.

mod file;
pub use file::File;

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

use crate::fd::FixedFiles;
use crate::opcode;
use crate::queue::Queue;

/// Entry point for uring-backed file access.
pub struct Filesystem {
    queue: Arc<Queue>,
    fixed: Option<Arc<FixedFiles>>,
}

impl Filesystem {
    /// A facade whose files are addressed by raw descriptor.
    pub fn new(queue: Arc<Queue>) -> Filesystem {
        Filesystem { queue, fixed: None }
    }

    /// A facade that registers every opened file in a fixed-file table of
    /// the given initial capacity, so operations skip the descriptor
    /// lookup. The table doubles when it fills, at the cost of two
    /// registration syscalls.
    pub fn with_registered_files(queue: Arc<Queue>, capacity: usize) -> io::Result<Filesystem> {
        let fixed = FixedFiles::new(queue.ring_handle(), capacity)?;
        Ok(Filesystem {
            queue,
            fixed: Some(Arc::new(fixed)),
        })
    }

    /// Opens `path` with `open(2)` flags and mode.
    pub fn open(&self, path: impl AsRef<Path>, flags: i32, mode: u32) -> io::Result<File> {
        let path = CString::new(path.as_ref().as_os_str().as_bytes())?;
        let cqe = self.queue.call(|sqe| {
            opcode::openat(sqe, libc::AT_FDCWD, &path, flags, mode);
        })?;
        let fd = cqe.io_result()? as i32;

        let mut file = File::new(fd, self.queue.clone());
        if let Some(fixed) = &self.fixed {
            match fixed.register(fd) {
                Ok(slot) => file.use_fixed(fixed.clone(), slot),
                Err(err) => {
                    let _ = file.close();
                    return Err(err);
                }
            }
        }
        Ok(file)
    }
}
