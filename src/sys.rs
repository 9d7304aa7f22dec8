//! Raw `io_uring` kernel ABI: setup parameters, ring offsets, flag words
//! and the three defining syscalls.
//!
//! Everything here mirrors `<linux/io_uring.h>` exactly. The rest of the
//! crate is written against this module so that no other file needs to
//! spell out a syscall number or a struct offset.

// The constant set mirrors the header wholesale; most opcodes are only
// reachable through the preparers that use them.
#![allow(non_camel_case_types, dead_code)]

use std::io;
use std::os::unix::io::RawFd;

use libc::{c_long, c_uint};

// Opcodes, in the kernel's enumeration order.
pub(crate) const IORING_OP_NOP: u8 = 0;
pub(crate) const IORING_OP_READV: u8 = 1;
pub(crate) const IORING_OP_WRITEV: u8 = 2;
pub(crate) const IORING_OP_FSYNC: u8 = 3;
pub(crate) const IORING_OP_READ_FIXED: u8 = 4;
pub(crate) const IORING_OP_WRITE_FIXED: u8 = 5;
pub(crate) const IORING_OP_POLL_ADD: u8 = 6;
pub(crate) const IORING_OP_POLL_REMOVE: u8 = 7;
pub(crate) const IORING_OP_SYNC_FILE_RANGE: u8 = 8;
pub(crate) const IORING_OP_SENDMSG: u8 = 9;
pub(crate) const IORING_OP_RECVMSG: u8 = 10;
pub(crate) const IORING_OP_TIMEOUT: u8 = 11;
pub(crate) const IORING_OP_TIMEOUT_REMOVE: u8 = 12;
pub(crate) const IORING_OP_ACCEPT: u8 = 13;
pub(crate) const IORING_OP_ASYNC_CANCEL: u8 = 14;
pub(crate) const IORING_OP_LINK_TIMEOUT: u8 = 15;
pub(crate) const IORING_OP_CONNECT: u8 = 16;
pub(crate) const IORING_OP_FALLOCATE: u8 = 17;
pub(crate) const IORING_OP_OPENAT: u8 = 18;
pub(crate) const IORING_OP_CLOSE: u8 = 19;
pub(crate) const IORING_OP_FILES_UPDATE: u8 = 20;
pub(crate) const IORING_OP_STATX: u8 = 21;
pub(crate) const IORING_OP_READ: u8 = 22;
pub(crate) const IORING_OP_WRITE: u8 = 23;
pub(crate) const IORING_OP_FADVISE: u8 = 24;
pub(crate) const IORING_OP_MADVISE: u8 = 25;
pub(crate) const IORING_OP_SEND: u8 = 26;
pub(crate) const IORING_OP_RECV: u8 = 27;
pub(crate) const IORING_OP_OPENAT2: u8 = 28;
pub(crate) const IORING_OP_EPOLL_CTL: u8 = 29;
pub(crate) const IORING_OP_SPLICE: u8 = 30;
pub(crate) const IORING_OP_PROVIDE_BUFFERS: u8 = 31;
pub(crate) const IORING_OP_REMOVE_BUFFERS: u8 = 32;
pub(crate) const IORING_OP_TEE: u8 = 33;
pub(crate) const IORING_OP_SHUTDOWN: u8 = 34;
pub(crate) const IORING_OP_RENAMEAT: u8 = 35;
pub(crate) const IORING_OP_UNLINKAT: u8 = 36;
pub(crate) const IORING_OP_MKDIRAT: u8 = 37;
pub(crate) const IORING_OP_SYMLINKAT: u8 = 38;
pub(crate) const IORING_OP_LINKAT: u8 = 39;

// io_uring_setup() flags.
pub(crate) const IORING_SETUP_IOPOLL: u32 = 1 << 0;
pub(crate) const IORING_SETUP_SQPOLL: u32 = 1 << 1;
pub(crate) const IORING_SETUP_SQ_AFF: u32 = 1 << 2;
pub(crate) const IORING_SETUP_CQSIZE: u32 = 1 << 3;
pub(crate) const IORING_SETUP_CLAMP: u32 = 1 << 4;
pub(crate) const IORING_SETUP_ATTACH_WQ: u32 = 1 << 5;

// io_uring_enter() flags.
pub(crate) const IORING_ENTER_GETEVENTS: u32 = 1 << 0;
pub(crate) const IORING_ENTER_SQ_WAKEUP: u32 = 1 << 1;

// sqe->flags bits; the public face is `squeue::Flags`.
pub(crate) const IOSQE_FIXED_FILE: u8 = 1 << 0;
pub(crate) const IOSQE_IO_DRAIN: u8 = 1 << 1;
pub(crate) const IOSQE_IO_LINK: u8 = 1 << 2;
pub(crate) const IOSQE_IO_HARDLINK: u8 = 1 << 3;
pub(crate) const IOSQE_ASYNC: u8 = 1 << 4;
pub(crate) const IOSQE_BUFFER_SELECT: u8 = 1 << 5;

// Opcode-specific sqe flags.
pub(crate) const IORING_FSYNC_DATASYNC: u32 = 1 << 0;
pub(crate) const IORING_TIMEOUT_ABS: u32 = 1 << 0;
pub(crate) const SPLICE_F_FD_IN_FIXED: u32 = 1 << 31;

// cqe->flags bits.
pub(crate) const IORING_CQE_F_BUFFER: u32 = 1 << 0;
pub(crate) const IORING_CQE_BUFFER_SHIFT: u32 = 16;

// Shared SQ ring flags, read through sq_off.flags.
pub(crate) const IORING_SQ_NEED_WAKEUP: u32 = 1 << 0;
pub(crate) const IORING_SQ_CQ_OVERFLOW: u32 = 1 << 1;

// Feature bits reported back in io_uring_params.features.
pub(crate) const IORING_FEAT_SINGLE_MMAP: u32 = 1 << 0;
pub(crate) const IORING_FEAT_NODROP: u32 = 1 << 1;
pub(crate) const IORING_FEAT_SUBMIT_STABLE: u32 = 1 << 2;
pub(crate) const IORING_FEAT_RW_CUR_POS: u32 = 1 << 3;

// mmap offsets into the ring fd.
pub(crate) const IORING_OFF_SQ_RING: i64 = 0;
pub(crate) const IORING_OFF_CQ_RING: i64 = 0x8000000;
pub(crate) const IORING_OFF_SQES: i64 = 0x10000000;

// io_uring_register() opcodes.
pub(crate) const IORING_REGISTER_BUFFERS: u32 = 0;
pub(crate) const IORING_UNREGISTER_BUFFERS: u32 = 1;
pub(crate) const IORING_REGISTER_FILES: u32 = 2;
pub(crate) const IORING_UNREGISTER_FILES: u32 = 3;
pub(crate) const IORING_REGISTER_FILES_UPDATE: u32 = 6;

/// SQ ring layout, filled in by the kernel at setup. Each field is a byte
/// offset into the SQ ring mapping.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct io_sqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub resv2: u64,
}

/// CQ ring layout, filled in by the kernel at setup.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct io_cqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub resv2: u64,
}

/// Parameter block for `io_uring_setup(2)`. The caller fills the flags and
/// the sqpoll/cqsize/wq knobs; the kernel fills everything else.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct io_uring_params {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: io_sqring_offsets,
    pub cq_off: io_cqring_offsets,
}

/// Argument block for `IORING_REGISTER_FILES_UPDATE`.
#[repr(C)]
pub(crate) struct io_uring_files_update {
    pub offset: u32,
    pub resv: u32,
    pub fds: u64,
}

// The kernel-side sigset is 64 bits, not glibc's 1024-bit sigset_t.
const KERNEL_SIGSET_SIZE: usize = 8;

pub(crate) fn setup(entries: u32, params: &mut io_uring_params) -> io::Result<RawFd> {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_io_uring_setup,
            entries as c_long,
            params as *mut io_uring_params as c_long,
        )
    };
    if ret < 0 {
        return Err(setup_error());
    }
    Ok(ret as RawFd)
}

// ENOMEM out of setup or the ring mmaps almost always means the memlock
// rlimit, which defaults low on most distributions.
pub(crate) fn setup_error() -> io::Error {
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ENOMEM) {
        return io::Error::new(
            io::ErrorKind::Other,
            "io_uring setup hit ENOMEM; raise the memlock rlimit",
        );
    }
    err
}

pub(crate) fn enter(
    fd: RawFd,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
    sig: Option<&libc::sigset_t>,
) -> io::Result<u32> {
    let (sig_ptr, sig_sz) = match sig {
        Some(sig) => (sig as *const libc::sigset_t, KERNEL_SIGSET_SIZE),
        None => (std::ptr::null(), 0),
    };
    loop {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_uring_enter,
                fd as c_long,
                to_submit as c_long,
                min_complete as c_long,
                flags as c_long,
                sig_ptr as c_long,
                sig_sz as c_long,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(ret as u32);
    }
}

pub(crate) fn register(
    fd: RawFd,
    opcode: u32,
    arg: *const libc::c_void,
    nr_args: c_uint,
) -> io::Result<()> {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_io_uring_register,
            fd as c_long,
            opcode as c_long,
            arg as c_long,
            nr_args as c_long,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn params_layout_matches_kernel() {
        assert_eq!(mem::size_of::<io_sqring_offsets>(), 40);
        assert_eq!(mem::size_of::<io_cqring_offsets>(), 40);
        assert_eq!(mem::size_of::<io_uring_params>(), 120);
    }

    #[test]
    fn syscall_numbers() {
        assert_eq!(libc::SYS_io_uring_setup, 425);
        assert_eq!(libc::SYS_io_uring_enter, 426);
        assert_eq!(libc::SYS_io_uring_register, 427);
    }
}
