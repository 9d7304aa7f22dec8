//! Pre-registered buffers for zero-copy reads and writes.
//!
//! A [`FixedBufPool`] maps one contiguous arena, registers it with the
//! kernel once, and carves it into equal slices that many threads can
//! check out and return concurrently. Operations issued against a slice
//! skip per-operation page pinning: the SQE carries the slice address and
//! the registered buffer index from the handle.

mod handle;
pub use handle::FixedBuf;

mod pool;
use pool::Shared;

use std::io;
use std::sync::Arc;

use crate::ring::Ring;

/// A pool of equally sized buffers registered with the kernel as one
/// arena.
///
/// Cloning the pool produces another reference to the same arena. The
/// arena is unregistered and unmapped once every pool clone and every
/// outstanding [`FixedBuf`] handle is gone.
///
/// ```no_run
/// use std::sync::Arc;
/// use uring::{buf::fixed::FixedBufPool, opcode, Ring};
///
/// let ring = Arc::new(Ring::new(8)?);
/// let pool = FixedBufPool::new(ring.clone(), 4096, 64)?;
///
/// let mut buf = pool.get();
/// buf[..5].copy_from_slice(b"hello");
/// let sqe = ring.get_sqe()?;
/// opcode::write_fixed(sqe, 1, buf.stable_ptr(), 5, 0, buf.buf_index());
/// ring.submit(1)?;
/// let cqe = ring.get_cqe(1)?;
/// // reap before the handle goes back to the pool
/// cqe.io_result()?;
/// drop(buf);
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Clone)]
pub struct FixedBufPool {
    inner: Arc<Shared>,
}

impl FixedBufPool {
    /// Maps `buf_size * count` anonymous bytes and registers the region
    /// with `ring`. A ring supports one buffer registration at a time, so
    /// at most one pool may exist per ring.
    pub fn new(ring: Arc<Ring>, buf_size: usize, count: usize) -> io::Result<FixedBufPool> {
        Ok(FixedBufPool {
            inner: Arc::new(Shared::new(ring, buf_size, count)?),
        })
    }

    /// Checks out a buffer, blocking until one is free.
    pub fn get(&self) -> FixedBuf {
        FixedBuf::new(self.inner.clone(), self.inner.check_out())
    }

    /// Checks out a buffer without blocking; `None` when the pool is
    /// exhausted.
    pub fn try_get(&self) -> Option<FixedBuf> {
        let index = self.inner.try_check_out()?;
        Some(FixedBuf::new(self.inner.clone(), index))
    }

    /// Per-buffer size in bytes.
    pub fn buf_size(&self) -> usize {
        self.inner.buf_size()
    }

    /// Number of buffers in the arena.
    pub fn count(&self) -> usize {
        self.inner.count()
    }
}
