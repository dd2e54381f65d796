//! # Device Context
//!
//! Ownership and lifecycle of the WebGPU driver objects: instance, adapter,
//! device, and queue. The context is created uninitialized, acquires the
//! driver lazily on first use, detects device loss through the driver's
//! lost callback, and re-initializes transparently on the next access.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized → Initializing → Ready → Lost → Initializing → Ready → Destroyed
//! ```
//!
//! `Lost` is reachable only from `Ready`, and only via the device-lost
//! callback. The callback clears the shared `ready` flag and nothing else;
//! it must not block or touch device resources. Subsequent accessor calls
//! observe the cleared flag and rebuild the context, bumping the
//! **generation** counter so handles minted against the lost device can be
//! rejected with an invalid-state error instead of touching freed driver
//! state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::runtime::error::{GpuError, GpuResult};

/// Adapter and device acquisition options.
///
/// Defaults request the high-performance adapter, matching the workloads
/// this runtime targets.
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    /// Power preference passed to the adapter request.
    pub power_preference: wgpu::PowerPreference,
    /// Accept a software fallback adapter when no hardware adapter exists.
    pub force_fallback_adapter: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

/// Owner of the WebGPU instance, adapter, device, and queue.
///
/// ## Thread model
/// The context itself is plain data; the runtime serializes all access
/// through its worker, so no internal locking happens here.
pub struct DeviceContext {
    options: RuntimeOptions,
    instance: Option<wgpu::Instance>,
    adapter: Option<wgpu::Adapter>,
    device: Option<wgpu::Device>,
    queue: Option<wgpu::Queue>,
    /// Shared with the device-lost callback of the current device.
    ready: Arc<AtomicBool>,
    /// Bumped on every successful (re)initialization.
    generation: u64,
}

impl DeviceContext {
    /// Creates an uninitialized context. No driver work happens here.
    pub fn new(options: RuntimeOptions) -> Self {
        Self {
            options,
            instance: None,
            adapter: None,
            device: None,
            queue: None,
            ready: Arc::new(AtomicBool::new(false)),
            generation: 0,
        }
    }

    /// Returns `true` while the device is live and usable.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.device.is_some() && self.ready.load(Ordering::Acquire)
    }

    /// Generation of the current device. Handles record this at creation
    /// and are rejected once it moves on.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Acquires adapter, device, and queue. Idempotent: returns immediately
    /// when the context is already live.
    ///
    /// ## Errors
    /// [`GpuError::DriverUnavailable`] when no adapter is found, the adapter
    /// cannot run compute shaders, or the device request is denied. No
    /// partially constructed context is left behind on failure.
    pub fn initialize(&mut self) -> GpuResult<()> {
        if self.is_ready() {
            return Ok(());
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: self.options.power_preference,
            force_fallback_adapter: self.options.force_fallback_adapter,
            compatible_surface: None,
        }))
        .map_err(|e| GpuError::DriverUnavailable {
            stage: "adapter",
            detail: e.to_string(),
        })?;

        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(GpuError::DriverUnavailable {
                stage: "adapter",
                detail: "adapter does not support compute shaders".into(),
            });
        }

        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
                label: Some("gpu_runtime_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            }))
            .map_err(|e| GpuError::DriverUnavailable {
                stage: "device",
                detail: e.to_string(),
            })?;

        let ready = Arc::new(AtomicBool::new(true));
        let lost_flag = Arc::clone(&ready);
        device.set_device_lost_callback(move |reason, message| {
            log::error!("gpu device lost ({reason:?}): {message}");
            lost_flag.store(false, Ordering::Release);
        });

        let info = adapter.get_info();
        log::info!(
            "gpu context initialized: {} ({:?}, generation {})",
            info.name,
            info.backend,
            self.generation + 1
        );

        self.instance = Some(instance);
        self.adapter = Some(adapter);
        self.device = Some(device);
        self.queue = Some(queue);
        self.ready = ready;
        self.generation += 1;
        Ok(())
    }

    /// Releases queue, device, adapter, and instance, in that order, and
    /// clears the ready flag.
    pub fn destroy(&mut self) {
        if self.device.is_none() && self.instance.is_none() {
            return;
        }
        self.ready.store(false, Ordering::Release);
        self.queue = None;
        self.device = None;
        self.adapter = None;
        self.instance = None;
        log::info!("gpu context destroyed");
    }

    /// Rebuilds the context if the device was lost; no-op while live.
    ///
    /// Handles created against the previous generation remain invalid after
    /// recovery.
    pub fn ensure_valid(&mut self) -> GpuResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        if self.device.is_some() {
            log::warn!("gpu device was lost; re-initializing context");
            self.destroy();
        }
        self.initialize()
    }

    /// The live device, (re)initializing the context if required.
    pub fn device(&mut self) -> GpuResult<&wgpu::Device> {
        self.ensure_valid()?;
        self.device
            .as_ref()
            .ok_or(GpuError::InvalidState { what: "device" })
    }

    /// The live queue, (re)initializing the context if required.
    pub fn queue(&mut self) -> GpuResult<&wgpu::Queue> {
        self.ensure_valid()?;
        self.queue
            .as_ref()
            .ok_or(GpuError::InvalidState { what: "queue" })
    }

    /// The live instance, (re)initializing the context if required.
    pub fn instance(&mut self) -> GpuResult<&wgpu::Instance> {
        self.ensure_valid()?;
        self.instance
            .as_ref()
            .ok_or(GpuError::InvalidState { what: "instance" })
    }

    /// Device and queue together, for encode-and-submit paths.
    pub fn device_queue(&mut self) -> GpuResult<(&wgpu::Device, &wgpu::Queue)> {
        self.ensure_valid()?;
        match (self.device.as_ref(), self.queue.as_ref()) {
            (Some(device), Some(queue)) => Ok((device, queue)),
            _ => Err(GpuError::InvalidState { what: "context" }),
        }
    }

    /// Simulates device loss by clearing the ready flag, exactly as the
    /// lost callback would. Intended for recovery tests.
    pub fn mark_lost_for_testing(&mut self) {
        self.ready.store(false, Ordering::Release);
    }
}
