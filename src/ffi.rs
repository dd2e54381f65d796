//! # C-ABI Façade
//!
//! C-callable exports over a **process-wide runtime instance**, consumed by
//! language bindings. Every export is a thin delegation: pointer and
//! argument validation here, all semantics in [`crate::runtime`].
//!
//! ## Conventions
//!
//! * One runtime per process, created lazily on first use. `gpurt_destroy_context`
//!   tears down the device context but keeps the worker alive so a later
//!   call can re-initialize.
//! * Shaders and buffers are opaque heap pointers (`Box::into_raw`); the
//!   matching `gpurt_destroy_*` call frees them. Null pointers are logged
//!   and ignored, never dereferenced.
//! * Callbacks are nullary `extern "C"` functions invoked on the runtime
//!   worker. They fire on error as well (completion signal); callers that
//!   need error state must check side state. They must not block and must
//!   not enqueue synchronously onto the worker.
//! * Errors are logged through the `log` facade; status-returning exports
//!   use `1` for success and `0` for failure.
//!
//! ## Type codes
//!
//! `0: f16 (alias f32), 1: f32, 2: f64, 3: i8, 4: i16, 5: i32, 6: i64,
//! 7: u8, 8: u16, 9: u32, 10: u64`. Unknown codes degrade to f32 with a
//! logged warning.

use std::ffi::{c_char, c_int, CStr};
use std::sync::Mutex;

use crate::runtime::buffer::Buffer;
use crate::runtime::context::RuntimeOptions;
use crate::runtime::shader::ComputeShader;
use crate::runtime::types::DataType;
use crate::runtime::GpuRuntime;

/// Nullary completion callback delivered on the runtime worker.
pub type GpurtCallback = extern "C" fn();

/// Opaque buffer handle exposed through the C ABI.
pub struct GpurtBuffer {
    inner: Buffer,
}

/// Opaque compute-shader handle exposed through the C ABI.
pub struct GpurtComputeShader {
    inner: ComputeShader,
}

/// Raw host pointer that crosses onto the worker for async readback. The
/// caller guarantees the pointee outlives the callback, per the C contract.
struct SendPtr<T>(*mut T);
unsafe impl<T> Send for SendPtr<T> {}

static RUNTIME: Mutex<Option<GpuRuntime>> = Mutex::new(None);

/// Runs `f` against the process-wide runtime, creating it on first use.
fn with_runtime<R>(f: impl FnOnce(&GpuRuntime) -> R) -> R {
    let mut guard = RUNTIME.lock().unwrap_or_else(|p| p.into_inner());
    let runtime = guard.get_or_insert_with(|| GpuRuntime::new(RuntimeOptions::default()));
    f(runtime)
}

/// Initializes the process-wide device context. Idempotent.
///
/// Returns `1` on success, `0` when no adapter or device could be acquired.
#[no_mangle]
pub extern "C" fn gpurt_initialize_context() -> c_int {
    match with_runtime(|rt| rt.initialize()) {
        Ok(()) => 1,
        Err(e) => {
            log::error!("context initialization failed: {e}");
            0
        }
    }
}

/// Initializes the context on the worker, then invokes `callback` there.
/// The callback fires whether or not initialization succeeded.
#[no_mangle]
pub extern "C" fn gpurt_initialize_context_async(callback: Option<GpurtCallback>) {
    let result = with_runtime(|rt| {
        rt.initialize_async(move |result| {
            if let Err(e) = result {
                log::error!("async context initialization failed: {e}");
            }
            if let Some(callback) = callback {
                callback();
            }
        })
    });
    if let Err(e) = result {
        log::error!("could not enqueue context initialization: {e}");
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Tears down the device context. Buffers created before this call become
/// invalid; the runtime itself stays usable and re-initializes on demand.
#[no_mangle]
pub extern "C" fn gpurt_destroy_context() {
    let guard = RUNTIME.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(runtime) = guard.as_ref() {
        if let Err(e) = runtime.destroy() {
            log::error!("context teardown failed: {e}");
        }
    } else {
        log::error!("context is already destroyed or was never initialized");
    }
}

/// Creates an empty compute shader. Never null.
#[no_mangle]
pub extern "C" fn gpurt_create_compute_shader() -> *mut GpurtComputeShader {
    let inner = with_runtime(|rt| rt.create_shader());
    Box::into_raw(Box::new(GpurtComputeShader { inner }))
}

/// Destroys a compute shader created by [`gpurt_create_compute_shader`].
///
/// # Safety
/// `shader` must be null or a pointer previously returned by
/// [`gpurt_create_compute_shader`] that has not been destroyed.
#[no_mangle]
pub unsafe extern "C" fn gpurt_destroy_compute_shader(shader: *mut GpurtComputeShader) {
    if shader.is_null() {
        log::error!("invalid shader pointer (null)");
        return;
    }
    drop(unsafe { Box::from_raw(shader) });
}

/// Loads WGSL kernel source into a shader.
///
/// # Safety
/// `shader` must be a live shader handle; `source` must be null or a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn gpurt_load_kernel(
    shader: *mut GpurtComputeShader,
    source: *const c_char,
) {
    if shader.is_null() {
        log::error!("invalid shader pointer (null)");
        return;
    }
    if source.is_null() {
        log::error!("invalid kernel source pointer (null)");
        return;
    }
    let source = unsafe { CStr::from_ptr(source) };
    match source.to_str() {
        Ok("") => log::error!("empty kernel string provided"),
        Ok(source) => unsafe { &*shader }.inner.load_kernel(source),
        Err(_) => log::error!("kernel source is not valid UTF-8"),
    }
}

/// Returns `1` once kernel source has been loaded, `0` otherwise.
///
/// # Safety
/// `shader` must be null or a live shader handle.
#[no_mangle]
pub unsafe extern "C" fn gpurt_has_kernel(shader: *mut GpurtComputeShader) -> c_int {
    if shader.is_null() {
        log::error!("invalid shader pointer (null)");
        return 0;
    }
    unsafe { &*shader }.inner.has_kernel() as c_int
}

/// Binds `buffer` to `slot` on a shader.
///
/// # Safety
/// `shader` and `buffer` must be null or live handles.
#[no_mangle]
pub unsafe extern "C" fn gpurt_set_buffer(
    shader: *mut GpurtComputeShader,
    slot: c_int,
    buffer: *mut GpurtBuffer,
) {
    if shader.is_null() || buffer.is_null() {
        log::error!("invalid shader or buffer pointer");
        return;
    }
    if slot < 0 {
        log::error!("invalid binding slot {slot}");
        return;
    }
    let shader = unsafe { &*shader };
    let buffer = unsafe { &*buffer };
    shader.inner.set_buffer(slot as usize, &buffer.inner);
}

/// Dispatches a compute pass over `(gx, gy, gz)` workgroups. Non-positive
/// dimensions are a no-op.
///
/// # Safety
/// `shader` must be null or a live shader handle.
#[no_mangle]
pub unsafe extern "C" fn gpurt_dispatch(
    shader: *mut GpurtComputeShader,
    gx: c_int,
    gy: c_int,
    gz: c_int,
) {
    if shader.is_null() {
        log::error!("invalid shader pointer (null)");
        return;
    }
    if gx <= 0 || gy <= 0 || gz <= 0 {
        return;
    }
    let shader = unsafe { &*shader };
    if let Err(e) = shader.inner.dispatch(gx as u32, gy as u32, gz as u32) {
        log::error!("dispatch enqueue failed: {e}");
    }
}

/// Like [`gpurt_dispatch`], invoking `callback` on the worker after
/// submission. The callback fires even when the dispatch is skipped.
///
/// # Safety
/// `shader` must be null or a live shader handle.
#[no_mangle]
pub unsafe extern "C" fn gpurt_dispatch_async(
    shader: *mut GpurtComputeShader,
    gx: c_int,
    gy: c_int,
    gz: c_int,
    callback: Option<GpurtCallback>,
) {
    if shader.is_null() {
        log::error!("invalid shader pointer (null)");
        return;
    }
    let shader = unsafe { &*shader };
    let (gx, gy, gz) = if gx <= 0 || gy <= 0 || gz <= 0 {
        (0, 0, 0)
    } else {
        (gx as u32, gy as u32, gz as u32)
    };
    let result = shader.inner.dispatch_async(gx, gy, gz, move || {
        if let Some(callback) = callback {
            callback();
        }
    });
    if let Err(e) = result {
        log::error!("dispatch enqueue failed: {e}");
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Allocates a typed buffer of `element_count` elements. Returns null when
/// allocation fails.
#[no_mangle]
pub extern "C" fn gpurt_create_buffer(element_count: usize, type_code: c_int) -> *mut GpurtBuffer {
    let data_type = DataType::from_type_code(type_code);
    match with_runtime(|rt| rt.create_buffer(element_count, data_type)) {
        Ok(inner) => Box::into_raw(Box::new(GpurtBuffer { inner })),
        Err(e) => {
            log::error!("buffer creation failed: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Releases and destroys a buffer created by [`gpurt_create_buffer`].
///
/// # Safety
/// `buffer` must be null or a pointer previously returned by
/// [`gpurt_create_buffer`] that has not been destroyed.
#[no_mangle]
pub unsafe extern "C" fn gpurt_destroy_buffer(buffer: *mut GpurtBuffer) {
    if buffer.is_null() {
        log::error!("invalid buffer pointer (null)");
        return;
    }
    let mut buffer = unsafe { Box::from_raw(buffer) };
    buffer.inner.release();
}

macro_rules! transfer_exports {
    ($t:ty, $write:ident, $read_sync:ident, $read_async:ident, $label:literal) => {
        #[doc = concat!("Uploads `byte_size` bytes of ", $label, " data.")]
        ///
        /// # Safety
        /// `buffer` must be null or a live buffer handle; `data` must be
        /// null or valid for `byte_size` bytes of reads.
        #[no_mangle]
        pub unsafe extern "C" fn $write(
            buffer: *mut GpurtBuffer,
            data: *const $t,
            byte_size: usize,
        ) {
            if buffer.is_null() || data.is_null() {
                log::error!(concat!("invalid buffer or input pointer (", $label, ")"));
                return;
            }
            let buffer = unsafe { &*buffer };
            let count = byte_size / std::mem::size_of::<$t>();
            let data = unsafe { std::slice::from_raw_parts(data, count) };
            if let Err(e) = buffer.inner.write(data) {
                log::error!(concat!("write failed (", $label, "): {}"), e);
            }
        }

        #[doc = concat!("Reads up to `element_count` ", $label, " elements at `element_offset`.")]
        ///
        /// # Safety
        /// `buffer` must be null or a live buffer handle; `out` must be null
        /// or valid for `element_count` elements of writes.
        #[no_mangle]
        pub unsafe extern "C" fn $read_sync(
            buffer: *mut GpurtBuffer,
            out: *mut $t,
            element_count: usize,
            element_offset: usize,
        ) {
            if buffer.is_null() || out.is_null() {
                log::error!(concat!("invalid buffer or output pointer (", $label, ")"));
                return;
            }
            let buffer = unsafe { &*buffer };
            let out = unsafe { std::slice::from_raw_parts_mut(out, element_count) };
            if let Err(e) = buffer.inner.read(out, element_offset) {
                log::error!(concat!("read failed (", $label, "): {}"), e);
            }
        }

        #[doc = concat!("Asynchronous ", $label, " read; `callback` fires on the worker once ")]
        /// the copy completes, on error as well.
        ///
        /// # Safety
        /// `buffer` must be null or a live buffer handle; `out` must be null
        /// or valid for `element_count` elements of writes until the
        /// callback has fired.
        #[no_mangle]
        pub unsafe extern "C" fn $read_async(
            buffer: *mut GpurtBuffer,
            out: *mut $t,
            element_count: usize,
            element_offset: usize,
            callback: Option<GpurtCallback>,
        ) {
            if buffer.is_null() || out.is_null() {
                log::error!(concat!("invalid buffer or output pointer (", $label, ")"));
                return;
            }
            let buffer = unsafe { &*buffer };
            let out = SendPtr(out);
            let result = buffer.inner.read_async::<$t>(
                element_count,
                element_offset,
                move |result| {
                    let out = out;
                    match result {
                        Ok(values) => {
                            // The C contract keeps `out` valid until the
                            // callback fires; lengths are clamped upstream.
                            unsafe {
                                std::ptr::copy_nonoverlapping(
                                    values.as_ptr(),
                                    out.0,
                                    values.len(),
                                );
                            }
                        }
                        Err(e) => {
                            log::error!(concat!("async read failed (", $label, "): {}"), e)
                        }
                    }
                    if let Some(callback) = callback {
                        callback();
                    }
                },
            );
            if let Err(e) = result {
                log::error!(concat!("async read enqueue failed (", $label, "): {}"), e);
                if let Some(callback) = callback {
                    callback();
                }
            }
        }
    };
}

transfer_exports!(f32, gpurt_write_f32, gpurt_read_sync_f32, gpurt_read_async_f32, "f32");
transfer_exports!(f64, gpurt_write_f64, gpurt_read_sync_f64, gpurt_read_async_f64, "f64");
transfer_exports!(i8, gpurt_write_i8, gpurt_read_sync_i8, gpurt_read_async_i8, "i8");
transfer_exports!(i16, gpurt_write_i16, gpurt_read_sync_i16, gpurt_read_async_i16, "i16");
transfer_exports!(i32, gpurt_write_i32, gpurt_read_sync_i32, gpurt_read_async_i32, "i32");
transfer_exports!(i64, gpurt_write_i64, gpurt_read_sync_i64, gpurt_read_async_i64, "i64");
transfer_exports!(u8, gpurt_write_u8, gpurt_read_sync_u8, gpurt_read_async_u8, "u8");
transfer_exports!(u16, gpurt_write_u16, gpurt_read_sync_u16, gpurt_read_async_u16, "u16");
transfer_exports!(u32, gpurt_write_u32, gpurt_read_sync_u32, gpurt_read_async_u32, "u32");
transfer_exports!(u64, gpurt_write_u64, gpurt_read_sync_u64, gpurt_read_async_u64, "u64");
