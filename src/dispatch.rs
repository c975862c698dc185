//! The coordinating thread.
//!
//! One thread per [`SessionRegistry`](crate::registry::SessionRegistry) is
//! distinguished as *the* coordinating thread: it owns the default session's
//! graph, runs default-session resets, and executes serialized commits and
//! coordinating-thread merges. [`Coordinator`] wraps that thread as a worker
//! fed `FnOnce` jobs over a flume channel.
//!
//! [`Coordinator::run`] blocks the caller until the job has finished on the
//! coordinating thread. Calls made *from* the coordinating thread execute the
//! job inline, so dispatch is reentrant and cannot self-deadlock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Coordinator {
    tx: Option<flume::Sender<Job>>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Spawn the coordinating thread and return a shared handle to it.
    pub fn spawn() -> Arc<Self> {
        let (tx, rx) = flume::unbounded::<Job>();
        let (id_tx, id_rx) = flume::bounded(1);

        let handle = thread::Builder::new()
            .name("relaystore-coordinator".into())
            .spawn(move || {
                let _ = id_tx.send(thread::current().id());
                while let Ok(job) = rx.recv() {
                    // A panicking job must not take the coordinating thread
                    // down with it; the waiting caller observes the dropped
                    // reply channel instead.
                    let _ = catch_unwind(AssertUnwindSafe(move || job()));
                }
                trace!("coordinating thread stopped");
            })
            .expect("failed to spawn coordinating thread");

        let thread_id = id_rx.recv().expect("coordinating thread did not start");
        Arc::new(Self {
            tx: Some(tx),
            thread_id,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// True when the current thread is this registry's coordinating thread.
    pub fn is_coordinating_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Execute `job` on the coordinating thread, blocking the caller until it
    /// completes. Runs inline when already on the coordinating thread.
    pub fn run<R, F>(&self, job: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_coordinating_thread() {
            return job();
        }

        let (reply_tx, reply_rx) = flume::bounded(1);
        let wrapped: Job = Box::new(move || {
            let _ = reply_tx.send(job());
        });
        self.tx
            .as_ref()
            .expect("coordinator stopped")
            .send(wrapped)
            .expect("coordinating thread terminated");
        reply_rx
            .recv()
            .expect("job panicked on the coordinating thread")
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop; join so queued jobs drain.
        self.tx.take();
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}
