//! Low-level `io_uring` for Linux.
//!
//! The kernel and the application share a pair of ring buffers: the
//! application writes 64-byte submission entries and publishes a tail,
//! the kernel writes 16-byte completion entries and publishes another
//! tail, and one syscall moves any number of operations in each
//! direction. This crate maps those rings and exposes them with their
//! semantics intact, batching, operation linking, registered buffers and
//! registered files included, rather than hiding them behind a runtime.
//!
//! The layers, bottom up:
//!
//! - [`Ring`]: setup, the shared mappings, submission and completion, and
//!   kernel registration. Lock-free and lock-less: one producer, one
//!   consumer, by contract.
//! - [`opcode`]: preparers that fill a submission entry per opcode.
//! - [`buf::fixed`]: a pre-registered buffer arena checked out slice by
//!   slice for zero-copy I/O.
//! - [`fd`]: a registered file table with stable slot indices.
//! - [`Queue`] and [`fs`]: a thread-safe submit-and-wait dispatcher and a
//!   blocking file facade on top of it.
//!
//! ```no_run
//! use uring::{opcode, Ring};
//!
//! let ring = Ring::new(8)?;
//!
//! let sqe = ring.get_sqe()?;
//! opcode::nop(sqe);
//! sqe.set_user_data(0x42);
//!
//! ring.submit(1)?;
//! let cqe = ring.get_cqe(1)?;
//! assert_eq!(cqe.user_data(), 0x42);
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! Linux 5.6 or newer is assumed; there is no fallback path for kernels
//! without `io_uring`.

pub mod buf;
pub mod cqueue;
pub mod fd;
pub mod fs;
pub mod opcode;
pub mod squeue;

mod queue;
mod ring;
mod sys;
mod util;

pub use queue::Queue;
pub use ring::{Builder, Ring};
