//! # Compute Runtime Core
//!
//! This module implements the **typed buffer-and-kernel runtime** on top of
//! the `wgpu` backend, enabling clients to allocate typed device buffers,
//! upload host arrays, bind buffers to WGSL compute kernels, dispatch across
//! a 3-D workgroup grid, and read results back without touching WebGPU
//! directly.
//!
//! ## High-level execution model
//!
//! All driver access funnels through three cooperating pieces:
//!
//! 1. **Worker** — a single dedicated thread executing every driver-touching
//!    task in FIFO order ([`worker`]).
//! 2. **Device context** — owner of instance/adapter/device/queue with
//!    device-loss detection and lazy re-initialization ([`context`]).
//! 3. **Shared-resource lock** — serializes buffer writes against compute
//!    dispatches, so a write can never interleave with a dispatch reading
//!    the same buffer.
//!
//! ## Module structure
//!
//! * [`types`] — logical data types, size arithmetic, type codes
//! * [`error`] — error taxonomy
//! * [`worker`] — serialized driver executor
//! * [`context`] — device context and lifecycle
//! * [`pack`] — host-side word packing
//! * [`buffer`] — typed buffers, staging readback
//! * [`shader`] — compute shaders, pipeline cache, dispatcher
//! * [`kernels`] — on-device pack/unpack conversion kernels
//!
//! ## Ownership
//!
//! [`GpuRuntime`] is a cheaply cloneable handle over the shared state.
//! Buffers and shaders hold their own handle clones, so they stay usable for
//! the worker tasks they enqueue even while the creating handle is dropped.
//! The worker shuts down when the last handle (and last buffer/shader)
//! goes away.

pub mod buffer;
pub mod context;
pub mod error;
pub mod kernels;
pub mod pack;
pub mod shader;
pub mod types;
pub mod worker;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::runtime::context::{DeviceContext, RuntimeOptions};
use crate::runtime::error::GpuResult;
use crate::runtime::worker::Worker;

/// State shared by the runtime handle and every buffer/shader it creates.
pub(crate) struct RuntimeShared {
    pub(crate) worker: Worker,
    pub(crate) context: Mutex<DeviceContext>,
    /// Serializes writes and dispatches across all buffers and shaders.
    /// Coarse, but the workload does not justify finer locking.
    pub(crate) exec_lock: Mutex<()>,
}

impl RuntimeShared {
    #[inline]
    pub(crate) fn context(&self) -> MutexGuard<'_, DeviceContext> {
        self.context.lock().unwrap_or_else(|p| p.into_inner())
    }

    #[inline]
    pub(crate) fn exec_guard(&self) -> MutexGuard<'_, ()> {
        self.exec_lock.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Handle to the compute runtime.
///
/// ## Role
/// Entry point for context lifecycle and the buffer/shader factories. The
/// C-ABI façade binds one process-wide instance; embedders may construct as
/// many independent runtimes as they need.
///
/// ## Lifecycle
/// Construction spawns the worker but performs no driver work; the device
/// context initializes lazily on first use or explicitly via
/// [`GpuRuntime::initialize`].
#[derive(Clone)]
pub struct GpuRuntime {
    pub(crate) shared: Arc<RuntimeShared>,
}

impl GpuRuntime {
    /// Creates a runtime with a dedicated worker thread.
    pub fn new(options: RuntimeOptions) -> Self {
        Self::build(Worker::spawn(), options)
    }

    /// Creates a runtime whose worker runs inline on the calling thread.
    ///
    /// For intrinsically single-threaded hosts; ordering guarantees hold
    /// trivially because every task runs to completion at its enqueue site.
    pub fn new_inline(options: RuntimeOptions) -> Self {
        Self::build(Worker::inline(), options)
    }

    fn build(worker: Worker, options: RuntimeOptions) -> Self {
        Self {
            shared: Arc::new(RuntimeShared {
                worker,
                context: Mutex::new(DeviceContext::new(options)),
                exec_lock: Mutex::new(()),
            }),
        }
    }

    /// Initializes the device context on the worker. Idempotent; returns
    /// once adapter, device, and queue are live.
    pub fn initialize(&self) -> GpuResult<()> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .worker
            .enqueue_sync(move || shared.context().initialize())?
    }

    /// Runs [`GpuRuntime::initialize`] on the worker and hands the outcome
    /// to `callback` there. The callback must not block.
    pub fn initialize_async(
        &self,
        callback: impl FnOnce(GpuResult<()>) + Send + 'static,
    ) -> GpuResult<()> {
        let shared = Arc::clone(&self.shared);
        self.shared.worker.enqueue_async(move || {
            let result = shared.context().initialize();
            if let Err(ref e) = result {
                log::error!("async context initialization failed: {e}");
            }
            callback(result);
        })
    }

    /// Tears the device context down on the worker. Buffers created before
    /// this call become invalid.
    pub fn destroy(&self) -> GpuResult<()> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .worker
            .enqueue_sync(move || shared.context().destroy())
    }

    /// Returns `true` while the device context is live.
    pub fn is_initialized(&self) -> bool {
        self.shared.context().is_ready()
    }

    /// Generation of the current device context; bumps on every recovery
    /// from device loss.
    pub fn context_generation(&self) -> u64 {
        self.shared.context().generation()
    }

    /// Clears the ready flag exactly as the device-lost callback would, so
    /// recovery paths can be exercised without real device loss.
    pub fn simulate_device_loss(&self) {
        self.shared.context().mark_lost_for_testing();
    }
}
