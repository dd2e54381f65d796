//! # Serialized Driver Worker
//!
//! Every operation that touches the WebGPU driver — buffer creation, queue
//! writes, command submission, staging maps, resource release — executes on
//! a **single dedicated worker thread**. Host threads never call the driver
//! directly; they enqueue closures here.
//!
//! ## Scheduling model
//!
//! * [`Worker::enqueue_async`] — fire-and-forget; the closure runs on the
//!   worker in FIFO order relative to every other enqueued task.
//! * [`Worker::enqueue_sync`] — blocks the caller on a one-shot reply
//!   channel until the closure has run and returns its result.
//!
//! FIFO execution is the ordering backbone of the runtime: a write enqueued
//! before a dispatch is observed by that dispatch, and a dispatch enqueued
//! before a read completes before the staging copy.
//!
//! ## Re-entrancy
//!
//! A synchronous enqueue **from the worker thread itself** runs the closure
//! inline instead of deadlocking on its own queue. Conversion-kernel helpers
//! rely on this when they dispatch from within a worker task.
//!
//! ## Single-threaded hosts
//!
//! [`Worker::inline`] builds a degenerate worker for hosts that cannot spawn
//! threads: both enqueue flavors invoke the closure immediately on the
//! calling thread. Ordering guarantees hold trivially.
//!
//! ## Teardown
//!
//! [`Worker::shutdown`] closes the queue and joins the thread. Tasks already
//! enqueued run to completion; enqueues after teardown fail with
//! [`GpuError::WorkerStopped`].

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

use crate::runtime::error::{GpuError, GpuResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Mode {
    /// Dedicated thread draining a FIFO queue.
    Dedicated {
        sender: Mutex<Option<mpsc::Sender<Job>>>,
        handle: Mutex<Option<JoinHandle<()>>>,
        thread_id: ThreadId,
    },
    /// Degenerate executor for single-threaded hosts: closures run inline.
    Inline,
}

/// Serialized executor owning all driver access.
pub struct Worker {
    mode: Mode,
}

impl Worker {
    /// Spawns the dedicated worker thread.
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let (id_sender, id_receiver) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("gpu-runtime-worker".into())
            .spawn(move || {
                let _ = id_sender.send(thread::current().id());
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("failed to spawn gpu worker thread");

        let thread_id = id_receiver
            .recv()
            .expect("gpu worker thread exited before reporting its id");

        Self {
            mode: Mode::Dedicated {
                sender: Mutex::new(Some(sender)),
                handle: Mutex::new(Some(handle)),
                thread_id,
            },
        }
    }

    /// Builds the inline executor for single-threaded hosts.
    pub fn inline() -> Self {
        Self { mode: Mode::Inline }
    }

    /// Returns `true` when called from the worker's own thread (always true
    /// in inline mode).
    #[inline]
    pub fn on_worker_thread(&self) -> bool {
        match &self.mode {
            Mode::Dedicated { thread_id, .. } => thread::current().id() == *thread_id,
            Mode::Inline => true,
        }
    }

    /// Enqueues a fire-and-forget task.
    ///
    /// ## Errors
    /// Fails with [`GpuError::WorkerStopped`] after [`Worker::shutdown`].
    pub fn enqueue_async(&self, job: impl FnOnce() + Send + 'static) -> GpuResult<()> {
        match &self.mode {
            Mode::Dedicated { sender, .. } => {
                let guard = sender.lock().unwrap_or_else(|p| p.into_inner());
                match guard.as_ref() {
                    Some(tx) => tx.send(Box::new(job)).map_err(|_| GpuError::WorkerStopped),
                    None => Err(GpuError::WorkerStopped),
                }
            }
            Mode::Inline => {
                job();
                Ok(())
            }
        }
    }

    /// Enqueues a task and blocks until it has run, returning its result.
    ///
    /// Runs the task inline when already on the worker thread, so worker
    /// tasks may call back into the runtime without deadlocking.
    ///
    /// ## Errors
    /// Fails with [`GpuError::WorkerStopped`] if the queue is closed before
    /// the task runs.
    pub fn enqueue_sync<T, F>(&self, job: F) -> GpuResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.on_worker_thread() {
            return Ok(job());
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        self.enqueue_async(move || {
            let _ = reply_tx.send(job());
        })?;

        reply_rx.recv().map_err(|_| GpuError::WorkerStopped)
    }

    /// Returns `true` once the queue has been closed.
    pub fn is_stopped(&self) -> bool {
        match &self.mode {
            Mode::Dedicated { sender, .. } => sender
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .is_none(),
            Mode::Inline => false,
        }
    }

    /// Drains the queue and joins the worker thread.
    ///
    /// Tasks already enqueued complete; subsequent enqueues fail with
    /// [`GpuError::WorkerStopped`]. Idempotent.
    pub fn shutdown(&self) {
        if let Mode::Dedicated {
            sender,
            handle,
            thread_id,
        } = &self.mode
        {
            let tx = sender.lock().unwrap_or_else(|p| p.into_inner()).take();
            drop(tx);

            // Joining from the worker itself would deadlock; the thread is
            // already unwinding its queue and exits on its own.
            if thread::current().id() == *thread_id {
                return;
            }

            let joinable = handle.lock().unwrap_or_else(|p| p.into_inner()).take();
            if let Some(joinable) = joinable {
                if joinable.join().is_err() {
                    log::error!("gpu worker thread panicked during shutdown");
                }
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
