//! Ring setup, submission, completion and kernel registration.

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use log::debug;

use crate::cqueue::{self, Cq};
use crate::squeue::{self, Sq};
use crate::sys;
use crate::util::Mmap;

/// An `io_uring` instance: the ring fd, the shared mappings, and the two
/// queue halves.
///
/// The ring itself takes no locks. The contract is a single producer for
/// the submission side ([`get_sqe`]/[`submit`]) and a single consumer for
/// the completion side ([`get_cqe`]); layers that want to share a ring
/// across threads bring their own discipline, the way [`crate::Queue`]
/// does. Violating the contract does not corrupt kernel state but does
/// race on the queue indices.
///
/// Dropping the ring unmaps the shared regions and closes the fd.
/// Operations still in flight at that point are between the caller and the
/// kernel; reap them first.
///
/// [`get_sqe`]: Ring::get_sqe
/// [`submit`]: Ring::submit
/// [`get_cqe`]: Ring::get_cqe
pub struct Ring {
    fd: OwnedFd,
    sq: Sq,
    cq: Cq,
    flags: u32,
    features: u32,
    // Mapping order matters only for Drop; the halves hold raw pointers
    // into these.
    _sq_ring: Mmap,
    _cq_ring: Option<Mmap>,
    _sqes: Mmap,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Creates a ring with default parameters and room for `entries`
    /// submissions. The kernel rounds the count up to a power of two.
    pub fn new(entries: u32) -> io::Result<Ring> {
        Builder::new().build(entries)
    }

    /// Borrows a zeroed submission entry at the local tail.
    ///
    /// The entry stays invisible to the kernel until [`submit`] publishes
    /// it, so a batch can be composed across several calls. Fails with
    /// [`io::ErrorKind::WouldBlock`] when all entries are in use.
    ///
    /// [`submit`]: Ring::submit
    pub fn get_sqe(&self) -> io::Result<&mut squeue::Entry> {
        self.sq.get()
    }

    /// Publishes composed entries and, unless kernel-poll mode makes it
    /// unnecessary, enters the kernel. `want` is the minimum number of
    /// completions to wait for; zero never blocks.
    ///
    /// Returns the number of entries the kernel consumed.
    pub fn submit(&self, want: u32) -> io::Result<u32> {
        self.submit_with(want, None)
    }

    /// Like [`submit`], with a signal mask applied for the duration of the
    /// enter syscall.
    ///
    /// [`submit`]: Ring::submit
    pub fn submit_with(&self, want: u32, sig: Option<&libc::sigset_t>) -> io::Result<u32> {
        let to_submit = self.sq.publish();

        if self.flags & sys::IORING_SETUP_SQPOLL != 0 {
            // The kernel thread consumes published entries on its own;
            // enter is only needed to wake it up or to wait.
            if self.sq.needs_wakeup() {
                let mut flags = sys::IORING_ENTER_SQ_WAKEUP;
                if want > 0 {
                    flags |= sys::IORING_ENTER_GETEVENTS;
                }
                sys::enter(self.as_raw_fd(), 0, want, flags, sig)?;
                return Ok(to_submit);
            }
            if want == 0 {
                return Ok(to_submit);
            }
            sys::enter(self.as_raw_fd(), 0, want, sys::IORING_ENTER_GETEVENTS, sig)?;
            return Ok(to_submit);
        }

        if to_submit == 0 && want == 0 {
            return Ok(0);
        }
        let flags = if want > 0 { sys::IORING_ENTER_GETEVENTS } else { 0 };
        sys::enter(self.as_raw_fd(), to_submit, want, flags, sig)
    }

    /// Consumes one completion entry.
    ///
    /// With `want == 0` this never blocks and fails with
    /// [`io::ErrorKind::WouldBlock`] when nothing is pending. With
    /// `want >= 1` it waits in the kernel, treating `EAGAIN` as transient.
    ///
    /// The entry returned may answer a submission the caller never made
    /// directly, such as a linked timeout; correlate by user data.
    pub fn get_cqe(&self, want: u32) -> io::Result<cqueue::Entry> {
        loop {
            if let Some(cqe) = self.cq.pop() {
                return Ok(cqe);
            }
            if want == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "no completion pending",
                ));
            }
            match sys::enter(
                self.as_raw_fd(),
                0,
                want,
                sys::IORING_ENTER_GETEVENTS,
                None,
            ) {
                Ok(_) => {}
                Err(ref e) if e.raw_os_error() == Some(libc::EAGAIN) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Registers `iovecs` as the kernel's fixed-buffer table, replacing
    /// any previous registration. The memory must stay mapped until the
    /// buffers are unregistered; quiesce fixed-buffer I/O before
    /// re-registering.
    pub fn register_buffers(&self, iovecs: &[libc::iovec]) -> io::Result<()> {
        sys::register(
            self.as_raw_fd(),
            sys::IORING_REGISTER_BUFFERS,
            iovecs.as_ptr() as *const _,
            iovecs.len() as u32,
        )
    }

    /// Releases the fixed-buffer table.
    pub fn unregister_buffers(&self) -> io::Result<()> {
        sys::register(
            self.as_raw_fd(),
            sys::IORING_UNREGISTER_BUFFERS,
            std::ptr::null(),
            0,
        )
    }

    /// Registers the fixed-file table. `-1` marks an unused slot.
    pub fn register_files(&self, fds: &[RawFd]) -> io::Result<()> {
        sys::register(
            self.as_raw_fd(),
            sys::IORING_REGISTER_FILES,
            fds.as_ptr() as *const _,
            fds.len() as u32,
        )
    }

    /// Replaces the contiguous range of registered files starting at
    /// `offset`, without disturbing the rest of the table.
    pub fn update_files(&self, fds: &[RawFd], offset: u32) -> io::Result<()> {
        let update = sys::io_uring_files_update {
            offset,
            resv: 0,
            fds: fds.as_ptr() as u64,
        };
        sys::register(
            self.as_raw_fd(),
            sys::IORING_REGISTER_FILES_UPDATE,
            &update as *const _ as *const _,
            fds.len() as u32,
        )
    }

    /// Releases the fixed-file table.
    pub fn unregister_files(&self) -> io::Result<()> {
        sys::register(
            self.as_raw_fd(),
            sys::IORING_UNREGISTER_FILES,
            std::ptr::null(),
            0,
        )
    }

    /// Number of submission entries the ring was created with.
    pub fn sq_entries(&self) -> u32 {
        self.sq.entries()
    }

    /// Number of completion entries the ring was created with.
    pub fn cq_entries(&self) -> u32 {
        self.cq.entries()
    }

    /// Feature bits the kernel reported at setup.
    pub fn features(&self) -> u32 {
        self.features
    }

    /// Completions the kernel dropped for lack of CQ space.
    pub fn cq_overflow(&self) -> u32 {
        self.cq.overflow()
    }

    /// Submissions the kernel rejected for malformed SQ indices. Stays
    /// zero while the identity index array is intact.
    pub fn sq_dropped(&self) -> u32 {
        self.sq.dropped()
    }
}

impl AsRawFd for Ring {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Configures and builds a [`Ring`].
///
/// ```no_run
/// use uring::Builder;
///
/// let ring = Builder::new().cq_entries(256).build(64)?;
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct Builder {
    flags: u32,
    cq_entries: u32,
    sq_thread_cpu: u32,
    sq_thread_idle: u32,
    wq_fd: u32,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Busy-poll for hardware completions instead of using interrupts.
    /// Only meaningful for files opened with `O_DIRECT`.
    pub fn io_poll(mut self) -> Builder {
        self.flags |= sys::IORING_SETUP_IOPOLL;
        self
    }

    /// Starts a kernel thread that polls the submission ring, so most
    /// submits skip the enter syscall. `idle_ms` is how long the thread
    /// spins without work before sleeping and requiring a wakeup.
    pub fn kernel_poll(mut self, idle_ms: u32) -> Builder {
        self.flags |= sys::IORING_SETUP_SQPOLL;
        self.sq_thread_idle = idle_ms;
        self
    }

    /// Pins the kernel-poll thread to `cpu`. Implies nothing unless
    /// [`kernel_poll`] is also set.
    ///
    /// [`kernel_poll`]: Builder::kernel_poll
    pub fn kernel_poll_cpu(mut self, cpu: u32) -> Builder {
        self.flags |= sys::IORING_SETUP_SQ_AFF;
        self.sq_thread_cpu = cpu;
        self
    }

    /// Requests a completion ring of `entries` instead of the kernel's
    /// default of twice the submission count.
    pub fn cq_entries(mut self, entries: u32) -> Builder {
        self.flags |= sys::IORING_SETUP_CQSIZE;
        self.cq_entries = entries;
        self
    }

    /// Clamps oversized entry counts to the kernel maximum instead of
    /// failing setup.
    pub fn clamp(mut self) -> Builder {
        self.flags |= sys::IORING_SETUP_CLAMP;
        self
    }

    /// Shares the async worker pool of an existing ring instead of
    /// creating a new one.
    pub fn attach_wq(mut self, ring_fd: RawFd) -> Builder {
        self.flags |= sys::IORING_SETUP_ATTACH_WQ;
        self.wq_fd = ring_fd as u32;
        self
    }

    /// Performs setup and maps the shared rings.
    pub fn build(&self, entries: u32) -> io::Result<Ring> {
        let mut params = sys::io_uring_params {
            flags: self.flags,
            cq_entries: self.cq_entries,
            sq_thread_cpu: self.sq_thread_cpu,
            sq_thread_idle: self.sq_thread_idle,
            wq_fd: self.wq_fd,
            ..Default::default()
        };

        let fd = sys::setup(entries, &mut params)?;
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let sq_ring_len = params.sq_off.array as usize
            + params.sq_entries as usize * mem::size_of::<u32>();
        let cq_ring_len = params.cq_off.cqes as usize
            + params.cq_entries as usize * mem::size_of::<cqueue::Entry>();

        // With IORING_FEAT_SINGLE_MMAP both ring headers live in one
        // mapping; older kernels need a second map at the CQ offset.
        let single_mmap = params.features & sys::IORING_FEAT_SINGLE_MMAP != 0;
        let sq_ring = if single_mmap {
            Mmap::map_ring(
                sq_ring_len.max(cq_ring_len),
                fd.as_raw_fd(),
                sys::IORING_OFF_SQ_RING,
            )?
        } else {
            Mmap::map_ring(sq_ring_len, fd.as_raw_fd(), sys::IORING_OFF_SQ_RING)?
        };
        let cq_ring = if single_mmap {
            None
        } else {
            Some(Mmap::map_ring(
                cq_ring_len,
                fd.as_raw_fd(),
                sys::IORING_OFF_CQ_RING,
            )?)
        };

        let sqes = Mmap::map_ring(
            params.sq_entries as usize * mem::size_of::<squeue::Entry>(),
            fd.as_raw_fd(),
            sys::IORING_OFF_SQES,
        )?;

        let sq = unsafe { Sq::new(&sq_ring, &sqes, &params) };
        let cq = unsafe { Cq::new(cq_ring.as_ref().unwrap_or(&sq_ring), &params) };

        debug!(
            "created ring fd {} with {} sq / {} cq entries, features {:#x}",
            fd.as_raw_fd(),
            params.sq_entries,
            params.cq_entries,
            params.features,
        );

        Ok(Ring {
            fd,
            sq,
            cq,
            flags: params.flags,
            features: params.features,
            _sq_ring: sq_ring,
            _cq_ring: cq_ring,
            _sqes: sqes,
        })
    }
}
