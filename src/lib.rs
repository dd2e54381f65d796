//! # GPU Compute Runtime
//!
//! Minimal, typed buffer-and-kernel compute runtime on top of `wgpu`.
//!
//! ## Design Goals
//! - Typed device buffers for all common scalar widths (8/16/32/64-bit,
//!   signed, unsigned, float), packed transparently into 32-bit storage
//! - One serialized worker for every driver operation
//! - Compute pipelines cached with precise dirty-bit invalidation
//! - Device-loss detection with transparent re-initialization
//!
//! This crate builds as both:
//! - `rlib` (for Rust usage & integration tests)
//! - `cdylib` (for FFI / DLL usage via the [`ffi`] façade)
//!
//! ## Quick start
//! ```no_run
//! use gpu_runtime::prelude::*;
//!
//! let runtime = GpuRuntime::new(RuntimeOptions::default());
//! runtime.initialize()?;
//!
//! let input = runtime.create_buffer(100, DataType::F32)?;
//! let output = runtime.create_buffer(100, DataType::F32)?;
//! input.write::<f32>(&(0..100).map(|i| i as f32).collect::<Vec<_>>())?;
//!
//! let shader = runtime.create_shader();
//! shader.load_kernel(r#"
//!     @group(0) @binding(0) var<storage, read_write> inp: array<f32>;
//!     @group(0) @binding(1) var<storage, read_write> out: array<f32>;
//!     @compute @workgroup_size(256)
//!     fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
//!         let i = gid.x;
//!         if (i < arrayLength(&inp)) { out[i] = inp[i] + 0.2; }
//!     }
//! "#);
//! shader.set_buffer(0, &input);
//! shader.set_buffer(1, &output);
//! shader.dispatch(1, 1, 1)?;
//!
//! let mut results = vec![0.0f32; 100];
//! output.read(&mut results, 0)?;
//! # Ok::<(), gpu_runtime::GpuError>(())
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod ffi;
pub mod runtime;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use runtime::GpuRuntime;

pub use runtime::buffer::{Buffer, BufferId};

pub use runtime::context::RuntimeOptions;

pub use runtime::error::{GpuError, GpuResult};

pub use runtime::shader::{ComputeShader, ENTRY_POINT};

pub use runtime::types::{DataType, Element};

pub use runtime::kernels;

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used runtime types.
///
/// Import with:
/// ```rust
/// use gpu_runtime::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Buffer,
        ComputeShader,
        DataType,
        Element,
        GpuError,
        GpuResult,
        GpuRuntime,
        RuntimeOptions,
    };
}
