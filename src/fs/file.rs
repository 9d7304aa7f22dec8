use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::buf::fixed::FixedBuf;
use crate::fd::FixedFiles;
use crate::opcode;
use crate::queue::Queue;
use crate::squeue::Flags;

/// An open file whose I/O goes through the ring.
///
/// All positioned reads and writes block the calling thread until the
/// kernel posts the operation's completion, which is also what keeps the
/// borrowed buffers alive for the kernel's whole window of access.
///
/// When the owning [`Filesystem`](super::Filesystem) registers files, the
/// operations below reference the file by its fixed-table slot and carry
/// the fixed-file flag; the raw descriptor is still used for open-coded
/// syscalls like the close-on-drop fallback.
///
/// Canceling a fixed-buffer write leaves the buffer in the kernel's hands
/// until the cancellation itself completes; do not recycle the buffer
/// before reaping both completions.
pub struct File {
    fd: RawFd,
    // Slot index when registered, otherwise the raw fd.
    ufd: RawFd,
    sqe_flags: Flags,
    queue: Arc<Queue>,
    fixed: Option<(Arc<FixedFiles>, u32)>,
    closed: bool,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("fd", &self.fd)
            .field("ufd", &self.ufd)
            .field("closed", &self.closed)
            .finish()
    }
}

impl File {
    pub(super) fn new(fd: RawFd, queue: Arc<Queue>) -> File {
        File {
            fd,
            ufd: fd,
            sqe_flags: Flags::empty(),
            queue,
            fixed: None,
            closed: false,
        }
    }

    pub(super) fn use_fixed(&mut self, table: Arc<FixedFiles>, slot: u32) {
        self.ufd = slot as RawFd;
        self.sqe_flags |= Flags::FIXED_FILE;
        self.fixed = Some((table, slot));
    }

    /// Reads into `buf` at `offset`, returning the number of bytes read.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let iovecs = [libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut _,
            iov_len: buf.len(),
        }];
        let cqe = self.queue.call(|sqe| {
            opcode::readv(sqe, self.ufd, &iovecs, offset, 0);
            sqe.set_flags(self.sqe_flags);
        })?;
        Ok(cqe.io_result()? as usize)
    }

    /// Writes `buf` at `offset`, returning the number of bytes written.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let iovecs = [libc::iovec {
            iov_base: buf.as_ptr() as *mut _,
            iov_len: buf.len(),
        }];
        let cqe = self.queue.call(|sqe| {
            opcode::writev(sqe, self.ufd, &iovecs, offset, 0);
            sqe.set_flags(self.sqe_flags);
        })?;
        Ok(cqe.io_result()? as usize)
    }

    /// Reads into a pool buffer at `offset` without page pinning.
    pub fn read_at_fixed(&self, buf: &mut FixedBuf, offset: u64) -> io::Result<usize> {
        let cqe = self.queue.call(|sqe| {
            opcode::read_fixed(
                sqe,
                self.ufd,
                buf.stable_mut_ptr(),
                buf.len() as u32,
                offset,
                buf.buf_index(),
            );
            sqe.set_flags(self.sqe_flags);
        })?;
        Ok(cqe.io_result()? as usize)
    }

    /// Writes a pool buffer at `offset` without page pinning.
    pub fn write_at_fixed(&self, buf: &FixedBuf, offset: u64) -> io::Result<usize> {
        let cqe = self.queue.call(|sqe| {
            opcode::write_fixed(
                sqe,
                self.ufd,
                buf.stable_ptr(),
                buf.len() as u32,
                offset,
                buf.buf_index(),
            );
            sqe.set_flags(self.sqe_flags);
        })?;
        Ok(cqe.io_result()? as usize)
    }

    /// Flushes data and metadata to the device.
    pub fn sync_all(&self) -> io::Result<()> {
        let cqe = self.queue.call(|sqe| {
            opcode::fsync(sqe, self.fd);
        })?;
        cqe.io_result().map(drop)
    }

    /// Flushes data, skipping metadata not needed to read it back.
    pub fn sync_data(&self) -> io::Result<()> {
        let cqe = self.queue.call(|sqe| {
            opcode::fdatasync(sqe, self.fd);
        })?;
        cqe.io_result().map(drop)
    }

    /// Closes the file through the ring.
    pub fn close(mut self) -> io::Result<()> {
        self.release_slot();
        self.closed = true;
        let cqe = self.queue.call(|sqe| {
            opcode::close(sqe, self.fd);
        })?;
        cqe.io_result().map(drop)
    }

    fn release_slot(&mut self) {
        if let Some((table, slot)) = self.fixed.take() {
            if let Err(err) = table.unregister(slot) {
                log::debug!("failed to unregister file slot {slot}: {err}");
            }
        }
    }
}

impl AsRawFd for File {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if !self.closed {
            self.release_slot();
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}
