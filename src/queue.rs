//! Completion dispatch over a shared ring.
//!
//! [`Queue`] is the concurrency harness the bare [`Ring`] refuses to be:
//! a mutex enforces the single-producer contract on the submission side,
//! and a dedicated reaper thread is the single consumer of completions,
//! matching each one to the caller that submitted it by user-data tag.
//! Callers block on their own completion, so buffers borrowed by an
//! operation stay alive for exactly as long as the kernel can touch them.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::{debug, trace};
use slab::Slab;

use crate::cqueue;
use crate::opcode;
use crate::ring::Ring;
use crate::squeue;

// Reserved tag for the shutdown nop; slab keys stay far below it.
const WAKE: u64 = u64::MAX;

struct Waiter {
    cqe: Mutex<Option<io::Result<cqueue::Entry>>>,
    done: Condvar,
}

impl Waiter {
    fn complete(&self, result: io::Result<cqueue::Entry>) {
        *self.cqe.lock().unwrap() = Some(result);
        self.done.notify_one();
    }
}

struct Shared {
    ring: Arc<Ring>,
    // Held across get_sqe + submit: the single-producer discipline.
    submit: Mutex<()>,
    pending: Mutex<Slab<Arc<Waiter>>>,
    shutdown: AtomicBool,
}

/// A blocking submit-and-wait interface over a [`Ring`], usable from many
/// threads at once.
pub struct Queue {
    shared: Arc<Shared>,
    reaper: Option<thread::JoinHandle<()>>,
}

impl Queue {
    /// Takes a shared ring and starts the reaper thread.
    pub fn start(ring: Arc<Ring>) -> Queue {
        let shared = Arc::new(Shared {
            ring,
            submit: Mutex::new(()),
            pending: Mutex::new(Slab::with_capacity(64)),
            shutdown: AtomicBool::new(false),
        });

        let reaper = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("uring-reaper".into())
                .spawn(move || shared.reap())
                .expect("failed to spawn reaper thread")
        };

        Queue {
            shared,
            reaper: Some(reaper),
        }
    }

    /// Prepares one operation, submits it, and blocks until its
    /// completion arrives. Returns the raw completion entry; a negative
    /// result is not turned into an error at this layer.
    pub fn call(&self, prep: impl FnOnce(&mut squeue::Entry)) -> io::Result<cqueue::Entry> {
        let waiter = Arc::new(Waiter {
            cqe: Mutex::new(None),
            done: Condvar::new(),
        });
        let key = self.shared.pending.lock().unwrap().insert(waiter.clone());

        let submitted = self.submit_one(key as u64, prep);
        if let Err(err) = submitted {
            self.shared.pending.lock().unwrap().remove(key);
            return Err(err);
        }

        let mut cqe = waiter.cqe.lock().unwrap();
        while cqe.is_none() {
            cqe = waiter.done.wait(cqe).unwrap();
        }
        cqe.take().unwrap()
    }

    /// The ring this queue dispatches for.
    pub fn ring(&self) -> &Ring {
        &self.shared.ring
    }

    /// A shared handle to the ring, for wiring up collaborators such as
    /// [`FixedFiles`](crate::fd::FixedFiles) or a
    /// [`FixedBufPool`](crate::buf::fixed::FixedBufPool).
    pub fn ring_handle(&self) -> Arc<Ring> {
        self.shared.ring.clone()
    }

    fn submit_one(
        &self,
        user_data: u64,
        prep: impl FnOnce(&mut squeue::Entry),
    ) -> io::Result<()> {
        let ring = &self.shared.ring;
        let _producer = self.shared.submit.lock().unwrap();

        let sqe = loop {
            match ring.get_sqe() {
                Ok(sqe) => break sqe,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Everything we publish is submitted right away, so a
                    // full ring means the kernel is still chewing;
                    // flushing and yielding is all there is to do.
                    ring.submit(0)?;
                    thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        };
        prep(sqe);
        sqe.set_user_data(user_data);
        ring.submit(0)?;
        Ok(())
    }
}

impl Shared {
    fn reap(&self) {
        trace!("reaper running");
        loop {
            let cqe = match self.ring.get_cqe(1) {
                Ok(cqe) => cqe,
                Err(err) => {
                    debug!("reaper failed to wait for completions: {err}");
                    self.fail_pending(&err);
                    break;
                }
            };

            if cqe.user_data() == WAKE {
                if self.shutdown.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }

            // try_remove tolerates tags we never handed out, e.g. a
            // spurious completion from a linked timeout.
            let waiter = self
                .pending
                .lock()
                .unwrap()
                .try_remove(cqe.user_data() as usize);

            if let Some(waiter) = waiter {
                waiter.complete(Ok(cqe));
            }
        }
        trace!("reaper exited");
    }

    // A dead reaper must not leave callers parked forever.
    fn fail_pending(&self, err: &io::Error) {
        let mut pending = self.pending.lock().unwrap();
        for waiter in pending.drain() {
            let err = match err.raw_os_error() {
                Some(code) => io::Error::from_raw_os_error(code),
                None => io::Error::new(err.kind(), err.to_string()),
            };
            waiter.complete(Err(err));
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Let in-flight calls finish; their callers hold references into
        // buffers the kernel may still write. A reaper that died already
        // failed every pending call.
        while !self.shared.pending.lock().unwrap().is_empty() {
            if self.reaper.as_ref().is_some_and(|r| r.is_finished()) {
                break;
            }
            thread::yield_now();
        }

        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _producer = self.shared.submit.lock().unwrap();
            if let Ok(sqe) = self.shared.ring.get_sqe() {
                opcode::nop(sqe);
                sqe.set_user_data(WAKE);
                let _ = self.shared.ring.submit(0);
            }
        }

        if let Some(reaper) = self.reaper.take() {
            let _ = reaper.join();
        }
    }
}
