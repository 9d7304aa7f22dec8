//! Opcode preparers.
//!
//! Each function fills a zeroed submission entry for one opcode and
//! nothing more; submission is a separate step. Addresses written into an
//! entry (buffers, iovec arrays, path strings, timespecs, sockaddr
//! storage) must stay valid until the operation's completion is reaped,
//! not merely until submit returns.

use std::ffi::CStr;
use std::os::unix::io::RawFd;

use crate::squeue::Entry;
use crate::sys;

/// No-op; completes immediately with result 0.
pub fn nop(sqe: &mut Entry) {
    sqe.set_opcode(sys::IORING_OP_NOP);
}

/// Read into `buf` at `offset`.
pub fn read(sqe: &mut Entry, fd: RawFd, buf: &mut [u8], offset: u64) {
    sqe.set_opcode(sys::IORING_OP_READ);
    sqe.set_fd(fd);
    sqe.set_addr(buf.as_mut_ptr() as u64);
    sqe.set_len(buf.len() as u32);
    sqe.set_off(offset);
}

/// Write `buf` at `offset`.
pub fn write(sqe: &mut Entry, fd: RawFd, buf: &[u8], offset: u64) {
    sqe.set_opcode(sys::IORING_OP_WRITE);
    sqe.set_fd(fd);
    sqe.set_addr(buf.as_ptr() as u64);
    sqe.set_len(buf.len() as u32);
    sqe.set_off(offset);
}

/// Vectored read at `offset`. `rw_flags` takes the `RWF_*` values of
/// `preadv2(2)`.
pub fn readv(sqe: &mut Entry, fd: RawFd, iovecs: &[libc::iovec], offset: u64, rw_flags: u32) {
    sqe.set_opcode(sys::IORING_OP_READV);
    sqe.set_fd(fd);
    sqe.set_addr(iovecs.as_ptr() as u64);
    sqe.set_len(iovecs.len() as u32);
    sqe.set_off(offset);
    sqe.set_op_flags(rw_flags);
}

/// Vectored write at `offset`.
pub fn writev(sqe: &mut Entry, fd: RawFd, iovecs: &[libc::iovec], offset: u64, rw_flags: u32) {
    sqe.set_opcode(sys::IORING_OP_WRITEV);
    sqe.set_fd(fd);
    sqe.set_addr(iovecs.as_ptr() as u64);
    sqe.set_len(iovecs.len() as u32);
    sqe.set_off(offset);
    sqe.set_op_flags(rw_flags);
}

/// Read into pre-registered buffer memory. `buf` must point inside the
/// registered buffer selected by `buf_index`.
pub fn read_fixed(
    sqe: &mut Entry,
    fd: RawFd,
    buf: *mut u8,
    len: u32,
    offset: u64,
    buf_index: u16,
) {
    sqe.set_opcode(sys::IORING_OP_READ_FIXED);
    sqe.set_fd(fd);
    sqe.set_addr(buf as u64);
    sqe.set_len(len);
    sqe.set_off(offset);
    sqe.set_buf_index(buf_index);
}

/// Write from pre-registered buffer memory.
pub fn write_fixed(
    sqe: &mut Entry,
    fd: RawFd,
    buf: *const u8,
    len: u32,
    offset: u64,
    buf_index: u16,
) {
    sqe.set_opcode(sys::IORING_OP_WRITE_FIXED);
    sqe.set_fd(fd);
    sqe.set_addr(buf as u64);
    sqe.set_len(len);
    sqe.set_off(offset);
    sqe.set_buf_index(buf_index);
}

/// Flush file data and metadata.
pub fn fsync(sqe: &mut Entry, fd: RawFd) {
    sqe.set_opcode(sys::IORING_OP_FSYNC);
    sqe.set_fd(fd);
}

/// Flush file data only.
pub fn fdatasync(sqe: &mut Entry, fd: RawFd) {
    sqe.set_opcode(sys::IORING_OP_FSYNC);
    sqe.set_fd(fd);
    sqe.set_op_flags(sys::IORING_FSYNC_DATASYNC);
}

/// Open `path` relative to `dirfd`, as `openat(2)`. The result field of
/// the completion carries the new descriptor.
pub fn openat(sqe: &mut Entry, dirfd: RawFd, path: &CStr, flags: i32, mode: u32) {
    sqe.set_opcode(sys::IORING_OP_OPENAT);
    sqe.set_fd(dirfd);
    sqe.set_addr(path.as_ptr() as u64);
    sqe.set_op_flags(flags as u32);
    sqe.set_len(mode);
}

/// Close a descriptor.
pub fn close(sqe: &mut Entry, fd: RawFd) {
    sqe.set_opcode(sys::IORING_OP_CLOSE);
    sqe.set_fd(fd);
}

/// Send on a connected socket. `flags` takes the `MSG_*` values of
/// `send(2)`.
pub fn send(sqe: &mut Entry, fd: RawFd, buf: &[u8], flags: u32) {
    sqe.set_opcode(sys::IORING_OP_SEND);
    sqe.set_fd(fd);
    sqe.set_addr(buf.as_ptr() as u64);
    sqe.set_len(buf.len() as u32);
    sqe.set_op_flags(flags);
}

/// Receive from a connected socket.
pub fn recv(sqe: &mut Entry, fd: RawFd, buf: &mut [u8], flags: u32) {
    sqe.set_opcode(sys::IORING_OP_RECV);
    sqe.set_fd(fd);
    sqe.set_addr(buf.as_mut_ptr() as u64);
    sqe.set_len(buf.len() as u32);
    sqe.set_op_flags(flags);
}

/// Timeout that completes with `-ETIME` after `ts`, or with 0 once
/// `count` other completions have posted. `absolute` interprets `ts`
/// against `CLOCK_MONOTONIC` instead of as a duration.
pub fn timeout(sqe: &mut Entry, ts: &libc::timespec, absolute: bool, count: u64) {
    sqe.set_opcode(sys::IORING_OP_TIMEOUT);
    sqe.set_fd(-1);
    sqe.set_addr(ts as *const libc::timespec as u64);
    sqe.set_len(1);
    sqe.set_off(count);
    if absolute {
        sqe.set_op_flags(sys::IORING_TIMEOUT_ABS);
    }
}

/// Cancels the operation it is linked after unless that operation
/// completes within `ts`. Set [`Flags::IO_LINK`] on the guarded entry and
/// place this one immediately behind it.
///
/// [`Flags::IO_LINK`]: crate::squeue::Flags::IO_LINK
pub fn link_timeout(sqe: &mut Entry, ts: &libc::timespec, absolute: bool) {
    sqe.set_opcode(sys::IORING_OP_LINK_TIMEOUT);
    sqe.set_fd(-1);
    sqe.set_addr(ts as *const libc::timespec as u64);
    sqe.set_len(1);
    if absolute {
        sqe.set_op_flags(sys::IORING_TIMEOUT_ABS);
    }
}

/// Cancels the in-flight operation tagged `target_user_data`. Both the
/// target and the cancel post their own completions.
pub fn async_cancel(sqe: &mut Entry, target_user_data: u64) {
    sqe.set_opcode(sys::IORING_OP_ASYNC_CANCEL);
    sqe.set_fd(-1);
    sqe.set_addr(target_user_data);
}

/// Create a directory relative to `dirfd`, as `mkdirat(2)`.
pub fn mkdirat(sqe: &mut Entry, dirfd: RawFd, path: &CStr, mode: u32) {
    sqe.set_opcode(sys::IORING_OP_MKDIRAT);
    sqe.set_fd(dirfd);
    sqe.set_addr(path.as_ptr() as u64);
    sqe.set_len(mode);
}

/// Accept a connection on a listening socket. `addr` and `addrlen` may be
/// null together to discard the peer address; otherwise `addrlen` holds
/// the capacity of `addr` on entry and the written length on completion.
/// The completion result is the accepted descriptor.
pub fn accept(
    sqe: &mut Entry,
    fd: RawFd,
    addr: *mut libc::sockaddr,
    addrlen: *mut libc::socklen_t,
    flags: u32,
) {
    sqe.set_opcode(sys::IORING_OP_ACCEPT);
    sqe.set_fd(fd);
    sqe.set_addr(addr as u64);
    sqe.set_addr2(addrlen as u64);
    sqe.set_op_flags(flags);
}

/// Hand `count` buffers of `len` bytes starting at `base` to the kernel
/// as buffer group `group`, with ids starting at `start_id`. Operations
/// carrying [`Flags::BUFFER_SELECT`](crate::squeue::Flags::BUFFER_SELECT)
/// for the same group consume them; the completion's
/// [`buffer_id`](crate::cqueue::Entry::buffer_id) names the one used.
pub fn provide_buffers(
    sqe: &mut Entry,
    base: *mut u8,
    len: u32,
    count: u32,
    group: u16,
    start_id: u32,
) {
    sqe.set_opcode(sys::IORING_OP_PROVIDE_BUFFERS);
    sqe.set_fd(count as i32);
    sqe.set_addr(base as u64);
    sqe.set_len(len);
    sqe.set_off(start_id as u64);
    sqe.set_buf_group(group);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed() -> Entry {
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn fdatasync_sets_the_datasync_bit() {
        let mut sqe = zeroed();
        fdatasync(&mut sqe, 3);
        let bytes = unsafe { &*(&sqe as *const Entry as *const [u8; 64]) };
        // opcode at byte 0, fd at bytes 4..8, fsync flags at bytes 28..32
        assert_eq!(bytes[0], sys::IORING_OP_FSYNC);
        assert_eq!(i32::from_ne_bytes(bytes[4..8].try_into().unwrap()), 3);
        assert_eq!(
            u32::from_ne_bytes(bytes[28..32].try_into().unwrap()),
            sys::IORING_FSYNC_DATASYNC
        );
    }

    #[test]
    fn timeout_count_lands_in_the_offset_word() {
        let ts = libc::timespec {
            tv_sec: 1,
            tv_nsec: 0,
        };
        let mut sqe = zeroed();
        timeout(&mut sqe, &ts, false, 5);
        let bytes = unsafe { &*(&sqe as *const Entry as *const [u8; 64]) };
        assert_eq!(u64::from_ne_bytes(bytes[8..16].try_into().unwrap()), 5);
        assert_eq!(
            u64::from_ne_bytes(bytes[16..24].try_into().unwrap()),
            &ts as *const _ as u64
        );
    }
}
