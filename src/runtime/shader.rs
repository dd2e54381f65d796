//! # Compute Shaders and the Pipeline Cache
//!
//! A [`ComputeShader`] owns a WGSL kernel, an ordered set of buffer
//! bindings, and the five driver artifacts derived from them: shader
//! module, bind-group layout, pipeline layout, compute pipeline, and bind
//! group. Building those artifacts is the dominant cost of a dispatch, so
//! they are cached and rebuilt **only** when their inputs change.
//!
//! ## Invalidation model
//!
//! Two dirty bits drive the cache:
//!
//! * `pipeline_dirty` — set when the kernel source changes. Rebuilds the
//!   shader module, both layouts, and the pipeline, and implies
//!   `bindings_dirty` because the bind group must match the new layout.
//! * `bindings_dirty` — set when a binding slot changes. Rebuilds only the
//!   bind group.
//!
//! [`ComputeShader::fingerprint`] exposes a stable hash of the full cache
//! key (source, ordered binding identities, last group size) for
//! diagnostics; build counters make cache behavior observable in tests.
//!
//! A typical workload dispatches one kernel on fixed bindings thousands of
//! times while only buffer *contents* change, which the cache turns into
//! exactly one artifact build.
//!
//! ## Binding model
//!
//! Every slot is a read-write storage buffer with compute visibility, bound
//! over its full extent, matching the kernel-side declaration
//! `@group(0) @binding(N) var<storage, read_write>`. The entry point is
//! always `main`.
//!
//! ## Dispatch
//!
//! Dispatches are encoded and submitted on the runtime worker under the
//! shared resource lock, so they serialize against buffer writes. The
//! caller-facing [`ComputeShader::dispatch`] is fire-and-forget;
//! [`ComputeShader::dispatch_async`] additionally invokes a callback on the
//! worker after submission. Submission is not GPU completion: callers that
//! need results must follow with a read, which the worker FIFO orders after
//! the dispatch.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::runtime::buffer::{Buffer, BufferId};
use crate::runtime::error::{GpuError, GpuResult};
use crate::runtime::{GpuRuntime, RuntimeShared};

/// Entry point every kernel must export.
pub const ENTRY_POINT: &str = "main";

#[inline]
pub(crate) fn hash_str(s: &str) -> u64 {
    let mut h = DefaultHasher::new();
    s.hash(&mut h);
    h.finish()
}

/// One bound buffer slot: the device handle plus the identity and
/// generation used for cache fingerprints and staleness checks.
struct BindingSlot {
    raw: Arc<wgpu::Buffer>,
    id: BufferId,
    generation: u64,
}

#[derive(Default)]
struct ShaderState {
    source: String,
    bindings: Vec<Option<BindingSlot>>,
    module: Option<wgpu::ShaderModule>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: Option<wgpu::PipelineLayout>,
    pipeline: Option<wgpu::ComputePipeline>,
    bind_group: Option<wgpu::BindGroup>,
    pipeline_dirty: bool,
    bindings_dirty: bool,
    last_group_size: [u32; 3],
    pipeline_builds: u64,
    bind_group_builds: u64,
}

impl ShaderState {
    /// Rebuilds the minimum artifact set implied by the dirty bits.
    ///
    /// Predecessor artifacts are released as their replacements are
    /// installed.
    fn update_if_needed(&mut self, device: &wgpu::Device) -> GpuResult<()> {
        if self.pipeline_dirty {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("gpu_runtime_kernel"),
                source: wgpu::ShaderSource::Wgsl(self.source.as_str().into()),
            });

            let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = self
                .bindings
                .iter()
                .enumerate()
                .filter_map(|(slot, binding)| binding.as_ref().map(|_| slot))
                .map(|slot| wgpu::BindGroupLayoutEntry {
                    binding: slot as u32,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();

            if layout_entries.is_empty() {
                return Err(GpuError::InvalidState {
                    what: "compute shader has no buffers bound",
                });
            }

            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("gpu_runtime_bgl"),
                    entries: &layout_entries,
                });

            let pipeline_layout =
                device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("gpu_runtime_pipeline_layout"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("gpu_runtime_pipeline"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(ENTRY_POINT),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

            self.module = Some(module);
            self.bind_group_layout = Some(bind_group_layout);
            self.pipeline_layout = Some(pipeline_layout);
            self.pipeline = Some(pipeline);
            self.pipeline_builds += 1;
            self.pipeline_dirty = false;
            // The bind group must match the fresh layout.
            self.bindings_dirty = true;
        }

        if self.bindings_dirty {
            let layout = self.bind_group_layout.as_ref().ok_or(GpuError::InvalidState {
                what: "bind group requested before pipeline build",
            })?;

            let entries: Vec<wgpu::BindGroupEntry<'_>> = self
                .bindings
                .iter()
                .enumerate()
                .filter_map(|(slot, binding)| {
                    binding.as_ref().map(|b| wgpu::BindGroupEntry {
                        binding: slot as u32,
                        resource: b.raw.as_entire_binding(),
                    })
                })
                .collect();

            if entries.is_empty() {
                return Err(GpuError::InvalidState {
                    what: "compute shader has no buffers bound",
                });
            }

            self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("gpu_runtime_bind_group"),
                layout,
                entries: &entries,
            }));
            self.bind_group_builds += 1;
            self.bindings_dirty = false;
        }

        Ok(())
    }

    /// Checks the preconditions a dispatch must meet before encoding.
    fn validate_dispatch(&self, context_generation: u64) -> GpuResult<()> {
        if self.source.is_empty() {
            return Err(GpuError::InvalidState {
                what: "dispatch without a loaded kernel",
            });
        }
        if self.bindings.is_empty() {
            return Err(GpuError::InvalidState {
                what: "dispatch without bound buffers",
            });
        }
        for (slot, binding) in self.bindings.iter().enumerate() {
            match binding {
                None => {
                    log::error!("binding slot {slot} has no buffer");
                    return Err(GpuError::InvalidState {
                        what: "dispatch with an unbound slot",
                    });
                }
                Some(b) if b.generation != context_generation => {
                    return Err(GpuError::InvalidState {
                        what: "binding from a lost device",
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn fingerprint(&self) -> u64 {
        // FNV-1a over the cache key: source hash, ordered binding
        // identities, last group size.
        let mut hash: u64 = 1469598103934665603;
        let mut mix = |value: u64| {
            hash ^= value;
            hash = hash.wrapping_mul(1099511628211);
        };
        mix(hash_str(&self.source));
        for binding in &self.bindings {
            mix(binding.as_ref().map(|b| b.id).unwrap_or(0));
        }
        for dim in self.last_group_size {
            mix(dim as u64);
        }
        hash
    }
}

/// Handle to a compiled compute kernel and its bound resources.
///
/// Artifacts are owned per handle, not shared across shaders, and are
/// released on the worker when the handle drops.
pub struct ComputeShader {
    shared: Arc<RuntimeShared>,
    state: Arc<Mutex<ShaderState>>,
}

impl GpuRuntime {
    /// Creates an empty compute shader bound to this runtime.
    pub fn create_shader(&self) -> ComputeShader {
        ComputeShader {
            shared: Arc::clone(&self.shared),
            state: Arc::new(Mutex::new(ShaderState::default())),
        }
    }
}

impl ComputeShader {
    #[inline]
    fn state(&self) -> MutexGuard<'_, ShaderState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Loads WGSL kernel source. Empty or unchanged source is a no-op;
    /// changed source marks the pipeline dirty for the next dispatch.
    pub fn load_kernel(&self, source: &str) {
        if source.is_empty() {
            log::warn!("ignoring empty kernel source");
            return;
        }
        let mut state = self.state();
        if state.source == source {
            return;
        }
        state.source = source.to_owned();
        state.pipeline_dirty = true;
    }

    /// Reads WGSL kernel source from a file and loads it.
    ///
    /// ## Errors
    /// [`GpuError::InvalidArgument`] when the file cannot be read.
    pub fn load_kernel_file(&self, path: impl AsRef<Path>) -> GpuResult<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            log::error!("failed to read kernel file {}: {e}", path.display());
            GpuError::InvalidArgument {
                what: "unreadable kernel file",
            }
        })?;
        self.load_kernel(&source);
        Ok(())
    }

    /// Returns `true` once kernel source has been loaded.
    pub fn has_kernel(&self) -> bool {
        !self.state().source.is_empty()
    }

    /// Binds `buffer` to `slot`, growing the slot table as needed.
    ///
    /// Rebinding the same buffer is a no-op; any actual change marks the
    /// bind group dirty. Buffers without a device allocation are ignored
    /// with a warning.
    pub fn set_buffer(&self, slot: usize, buffer: &Buffer) {
        let Some(raw) = buffer.raw_arc() else {
            log::warn!("ignoring binding of empty buffer to slot {slot}");
            return;
        };

        let mut state = self.state();
        if slot >= state.bindings.len() {
            state.bindings.resize_with(slot + 1, || None);
        }
        if let Some(existing) = &state.bindings[slot] {
            if existing.id == buffer.id() {
                return;
            }
        }
        state.bindings[slot] = Some(BindingSlot {
            raw: Arc::clone(raw),
            id: buffer.id(),
            generation: buffer.generation(),
        });
        state.bindings_dirty = true;
    }

    /// Clears a binding slot, if set.
    pub fn clear_buffer(&self, slot: usize) {
        let mut state = self.state();
        if let Some(binding) = state.bindings.get_mut(slot) {
            if binding.take().is_some() {
                state.bindings_dirty = true;
            }
        }
    }

    /// Stable hash of the cache key (kernel source, ordered binding
    /// identities, last group size).
    pub fn fingerprint(&self) -> u64 {
        self.state().fingerprint()
    }

    /// Number of pipeline-artifact builds performed so far.
    pub fn pipeline_builds(&self) -> u64 {
        self.state().pipeline_builds
    }

    /// Number of bind-group builds performed so far.
    pub fn bind_group_builds(&self) -> u64 {
        self.state().bind_group_builds
    }

    /// Encodes and submits a compute pass over `(gx, gy, gz)` workgroups.
    ///
    /// Fire-and-forget: the pass is encoded on the worker, serialized
    /// against writes by the shared resource lock. Zero dimensions are a
    /// no-op. Validation failures (missing kernel, unbound slot, stale
    /// binding) skip the dispatch with a logged error.
    pub fn dispatch(&self, gx: u32, gy: u32, gz: u32) -> GpuResult<()> {
        self.enqueue_dispatch(gx, gy, gz, None)
    }

    /// Like [`ComputeShader::dispatch`], but invokes `callback` on the
    /// worker after submission. The callback fires even when the dispatch
    /// is skipped, and must not block.
    ///
    /// Submission is not GPU completion; follow with a read to observe
    /// results.
    pub fn dispatch_async(
        &self,
        gx: u32,
        gy: u32,
        gz: u32,
        callback: impl FnOnce() + Send + 'static,
    ) -> GpuResult<()> {
        self.enqueue_dispatch(gx, gy, gz, Some(Box::new(callback)))
    }

    fn enqueue_dispatch(
        &self,
        gx: u32,
        gy: u32,
        gz: u32,
        callback: Option<Box<dyn FnOnce() + Send>>,
    ) -> GpuResult<()> {
        if gx == 0 || gy == 0 || gz == 0 {
            if let Some(callback) = callback {
                return self.shared.worker.enqueue_async(callback);
            }
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let state = Arc::clone(&self.state);
        self.shared.worker.enqueue_async(move || {
            if let Err(e) = run_dispatch(&shared, &state, gx, gy, gz) {
                log::error!("dispatch skipped: {e}");
            }
            if let Some(callback) = callback {
                callback();
            }
        })
    }
}

/// Worker-side dispatch body: validate, rebuild stale artifacts, encode,
/// submit.
fn run_dispatch(
    shared: &RuntimeShared,
    state: &Mutex<ShaderState>,
    gx: u32,
    gy: u32,
    gz: u32,
) -> GpuResult<()> {
    let _exec = shared.exec_guard();
    let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
    let mut context = shared.context();
    context.ensure_valid()?;
    let generation = context.generation();
    state.validate_dispatch(generation)?;

    state.last_group_size = [gx, gy, gz];

    let (device, queue) = context.device_queue()?;
    state.update_if_needed(device)?;

    let (pipeline, bind_group) = match (&state.pipeline, &state.bind_group) {
        (Some(pipeline), Some(bind_group)) => (pipeline, bind_group),
        _ => {
            return Err(GpuError::InvalidState {
                what: "pipeline artifacts missing after rebuild",
            })
        }
    };

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("gpu_runtime_compute_encoder"),
    });

    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("gpu_runtime_compute_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(gx, gy, gz);
    }

    queue.submit(Some(encoder.finish()));
    Ok(())
}

impl Drop for ComputeShader {
    fn drop(&mut self) {
        // Artifact release must happen on the worker; if it is already
        // stopped the state drops wherever the last clone dies.
        let state = Arc::clone(&self.state);
        let _ = self.shared.worker.enqueue_async(move || {
            let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
            state.bind_group = None;
            state.pipeline = None;
            state.pipeline_layout = None;
            state.bind_group_layout = None;
            state.module = None;
        });
    }
}
