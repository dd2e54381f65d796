//! # Typed Device Buffers
//!
//! A [`Buffer`] is a region of device storage tagged with a logical
//! [`DataType`] and element count. The write path packs host arrays into the
//! 32-bit word layout the device stores ([`crate::runtime::pack`]); the read
//! path stages the containing words through a short-lived mapping buffer and
//! unpacks them back to host form.
//!
//! ## Data flow
//!
//! * **write**: host array → (optional CPU pack) → queue write, offset 0.
//! * **read**: storage buffer → staging buffer (copy-dst + map-read) →
//!   async map + event-pump wait → host copy → (optional CPU unpack).
//!
//! Both run on the runtime worker; writes additionally hold the shared
//! resource lock so they cannot interleave with a dispatch reading the same
//! buffer.
//!
//! ## Lifecycle
//!
//! `Empty → Allocated → Released`. Buffers move but never copy. Release is
//! idempotent and defers the driver-side drop onto the worker; when the
//! worker is already stopped at drop time the handle is leaked with a
//! warning, which is acceptable at process exit.
//!
//! Buffers record the device generation they were created under. After a
//! device loss the context rebuilds with a new generation and operations on
//! pre-loss buffers fail with an invalid-state error instead of touching
//! freed driver state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use bytemuck::Zeroable;

use crate::runtime::error::{GpuError, GpuResult};
use crate::runtime::pack;
use crate::runtime::types::{pad_to_word, DataType, Element};
use crate::runtime::{GpuRuntime, RuntimeShared};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable process-unique buffer identity, used in binding fingerprints.
pub type BufferId = u64;

/// Typed region of device storage.
pub struct Buffer {
    shared: Arc<RuntimeShared>,
    raw: Option<Arc<wgpu::Buffer>>,
    id: BufferId,
    data_type: DataType,
    count: usize,
    physical_bytes: usize,
    packed: bool,
    generation: u64,
    released: bool,
}

/// Byte window of the source buffer a read must stage, plus the lane offset
/// of the first requested element within the first fetched word.
struct ReadPlan {
    byte_start: u64,
    byte_len: usize,
    lane_offset: usize,
}

fn read_plan(data_type: DataType, offset: usize, count: usize) -> ReadPlan {
    match data_type.lanes_per_word() {
        0 => {
            let stride = data_type.native_read_stride();
            ReadPlan {
                byte_start: (offset * stride) as u64,
                byte_len: count * stride,
                lane_offset: 0,
            }
        }
        lanes => {
            let first_word = offset / lanes;
            let end_word = (offset + count).div_ceil(lanes);
            ReadPlan {
                byte_start: (first_word * 4) as u64,
                byte_len: (end_word - first_word) * 4,
                lane_offset: offset % lanes,
            }
        }
    }
}

#[inline]
fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Packs a host slice into the byte image uploaded to device storage.
fn pack_for_upload<T: Element>(data: &[T]) -> Vec<u8> {
    match T::DATA_TYPE {
        DataType::F32 | DataType::I32 | DataType::U32 => bytemuck::cast_slice(data).to_vec(),
        DataType::I8 | DataType::U8 => {
            let words = pack::pack_bytes(bytemuck::cast_slice(data));
            bytemuck::cast_slice(&words).to_vec()
        }
        DataType::I16 | DataType::U16 => {
            let words = pack::pack_halves(bytemuck::cast_slice(data));
            bytemuck::cast_slice(&words).to_vec()
        }
        DataType::F64 | DataType::I64 | DataType::U64 => {
            let words = pack::pack_pairs(bytemuck::cast_slice(data));
            bytemuck::cast_slice(&words).to_vec()
        }
    }
}

/// Unpacks a staged byte image back into host elements.
fn unpack_from_staging<T: Element>(bytes: &[u8], lane_offset: usize, count: usize) -> Vec<T> {
    let mut out = vec![T::zeroed(); count];
    let out_bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
    match T::DATA_TYPE {
        DataType::F32 | DataType::I32 | DataType::U32 => {
            out_bytes.copy_from_slice(&bytes[..out_bytes.len()]);
        }
        DataType::I8 | DataType::U8 => {
            let words = bytes_to_words(bytes);
            out_bytes.copy_from_slice(&pack::unpack_bytes(&words, lane_offset, count));
        }
        DataType::I16 | DataType::U16 => {
            let words = bytes_to_words(bytes);
            let halves = pack::unpack_halves(&words, lane_offset, count);
            out_bytes.copy_from_slice(bytemuck::cast_slice(&halves));
        }
        DataType::F64 | DataType::I64 | DataType::U64 => {
            let words = bytes_to_words(bytes);
            let pairs = pack::unpack_pairs(&words, count);
            out_bytes.copy_from_slice(bytemuck::cast_slice(&pairs));
        }
    }
    out
}

/// Device-side half of a read: copy the planned window into a staging
/// buffer, map it, and return the raw bytes. Runs on the worker.
fn stage_read(
    shared: &RuntimeShared,
    raw: &wgpu::Buffer,
    generation: u64,
    plan: &ReadPlan,
) -> GpuResult<Vec<u8>> {
    let mut context = shared.context();
    context.ensure_valid()?;
    if context.generation() != generation {
        return Err(GpuError::InvalidState {
            what: "buffer created before device loss",
        });
    }
    let (device, queue) = context.device_queue()?;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("gpu_runtime_staging"),
        size: plan.byte_len as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("gpu_runtime_readback"),
    });
    encoder.copy_buffer_to_buffer(raw, plan.byte_start, &staging, 0, plan.byte_len as u64);
    let submission = queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (map_tx, map_rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = map_tx.send(result);
    });

    // A failed wait means the device itself went away, not the map.
    device
        .poll(wgpu::PollType::WaitForSubmissionIndex(submission))
        .map_err(|e| GpuError::DeviceLost {
            reason: format!("poll failed during readback: {e:?}"),
        })?;

    map_rx
        .recv()
        .map_err(|_| GpuError::MapFailed {
            detail: "map callback never fired".into(),
        })?
        .map_err(|e| GpuError::MapFailed {
            detail: e.to_string(),
        })?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

impl GpuRuntime {
    /// Allocates a buffer for `count` elements of `data_type`.
    ///
    /// Physical size is the packed footprint padded to a 4-byte multiple
    /// (minimum 4 bytes); usage requests storage plus both copy directions.
    /// A `count` of 0 yields a null-handle buffer whose operations are
    /// no-ops except release.
    ///
    /// ## Errors
    /// Propagates context initialization and worker failures.
    pub fn create_buffer(&self, count: usize, data_type: DataType) -> GpuResult<Buffer> {
        let shared = Arc::clone(&self.shared);
        let id = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        let packed = data_type.needs_packing();

        if count == 0 {
            return Ok(Buffer {
                shared,
                raw: None,
                id,
                data_type,
                count: 0,
                physical_bytes: 0,
                packed,
                generation: 0,
                released: false,
            });
        }

        let physical_bytes = pad_to_word(data_type.required_bytes(count));
        let task_shared = Arc::clone(&shared);
        let (raw, generation) = self.shared.worker.enqueue_sync(move || {
            let mut context = task_shared.context();
            let generation_after = {
                context.ensure_valid()?;
                context.generation()
            };
            let device = context.device()?;
            let raw = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("gpu_runtime_storage"),
                size: physical_bytes as u64,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            Ok::<_, GpuError>((Arc::new(raw), generation_after))
        })??;

        log::trace!("created {data_type} buffer: {count} elements, {physical_bytes} bytes");

        Ok(Buffer {
            shared,
            raw: Some(raw),
            id,
            data_type,
            count,
            physical_bytes,
            packed,
            generation,
            released: false,
        })
    }
}

impl Buffer {
    /// Logical element type.
    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Logical element count.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` for zero-element or released buffers.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Physical allocation size in bytes (multiple of 4, or 0 when empty).
    #[inline]
    pub fn physical_size(&self) -> usize {
        self.physical_bytes
    }

    /// Returns `true` when device storage uses a 32-bit surrogate layout.
    #[inline]
    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// Process-unique identity, stable for the buffer's lifetime.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub(crate) fn raw_arc(&self) -> Option<&Arc<wgpu::Buffer>> {
        self.raw.as_ref()
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Uploads `data`, packing narrow and 64-bit types into their word
    /// layouts first.
    ///
    /// The element type of the call drives the layout; it does not have to
    /// match the buffer's logical type, only fit its physical capacity.
    ///
    /// ## Errors
    /// * [`GpuError::SizeMismatch`] when the packed footprint exceeds the
    ///   physical allocation.
    /// * [`GpuError::InvalidState`] on released buffers or buffers from a
    ///   lost device.
    pub fn write<T: Element>(&self, data: &[T]) -> GpuResult<()> {
        if self.released {
            return Err(GpuError::InvalidState {
                what: "released buffer",
            });
        }
        let Some(raw) = self.raw.as_ref() else {
            return Ok(());
        };
        if data.is_empty() {
            return Ok(());
        }

        let required = T::DATA_TYPE.required_bytes(data.len());
        if required > self.physical_bytes {
            return Err(GpuError::SizeMismatch {
                data_type: T::DATA_TYPE,
                required,
                available: self.physical_bytes,
            });
        }

        let bytes = pack_for_upload(data);
        let shared = Arc::clone(&self.shared);
        let raw = Arc::clone(raw);
        let generation = self.generation;

        self.shared.worker.enqueue_sync(move || {
            let _exec = shared.exec_guard();
            let mut context = shared.context();
            context.ensure_valid()?;
            if context.generation() != generation {
                return Err(GpuError::InvalidState {
                    what: "buffer created before device loss",
                });
            }
            let queue = context.queue()?;
            queue.write_buffer(&raw, 0, &bytes);
            Ok(())
        })?
    }

    /// Reads up to `out.len()` elements starting at `offset`, returning the
    /// number actually read.
    ///
    /// Out-of-range offsets read zero elements and leave `out` untouched;
    /// ranges crossing the end clamp to the stored count. Sign and bit
    /// patterns round-trip exactly.
    ///
    /// ## Errors
    /// * [`GpuError::InvalidArgument`] when `T` does not match the buffer's
    ///   logical type.
    /// * [`GpuError::MapFailed`] when the staging map does not complete.
    /// * [`GpuError::InvalidState`] on released or stale buffers.
    pub fn read<T: Element>(&self, out: &mut [T], offset: usize) -> GpuResult<usize> {
        let staged = self.read_to_vec::<T>(out.len(), offset)?;
        out[..staged.len()].copy_from_slice(&staged);
        Ok(staged.len())
    }

    /// Enqueues a read of up to `count` elements at `offset`; `callback`
    /// receives the result on the worker once copy and unpack complete.
    ///
    /// The callback fires on error as well, carrying the failure. It must
    /// not block and must not enqueue synchronously onto the worker.
    pub fn read_async<T: Element>(
        &self,
        count: usize,
        offset: usize,
        callback: impl FnOnce(GpuResult<Vec<T>>) + Send + 'static,
    ) -> GpuResult<()> {
        match self.read_setup::<T>(count, offset) {
            Ok(None) => {
                self.shared.worker.enqueue_async(move || callback(Ok(Vec::new())))
            }
            Ok(Some((clamped, plan))) => {
                let shared = Arc::clone(&self.shared);
                // Checked non-null by read_setup.
                let raw = Arc::clone(self.raw.as_ref().expect("buffer handle"));
                let generation = self.generation;
                self.shared.worker.enqueue_async(move || {
                    let result = stage_read(&shared, &raw, generation, &plan)
                        .map(|bytes| unpack_from_staging::<T>(&bytes, plan.lane_offset, clamped));
                    if let Err(ref e) = result {
                        log::error!("async read failed: {e}");
                    }
                    callback(result);
                })
            }
            Err(e) => {
                log::error!("async read rejected: {e}");
                self.shared
                    .worker
                    .enqueue_async(move || callback(Err(e)))
            }
        }
    }

    /// Validates a read request and computes its staging window.
    ///
    /// Returns `Ok(None)` for the trivially empty cases (null handle, zero
    /// count, offset past the end).
    fn read_setup<T: Element>(
        &self,
        count: usize,
        offset: usize,
    ) -> GpuResult<Option<(usize, ReadPlan)>> {
        if self.released {
            return Err(GpuError::InvalidState {
                what: "released buffer",
            });
        }
        if T::DATA_TYPE != self.data_type {
            return Err(GpuError::InvalidArgument {
                what: "read element type does not match buffer type",
            });
        }
        if self.raw.is_none() || count == 0 || offset >= self.count {
            return Ok(None);
        }
        let clamped = count.min(self.count - offset);
        Ok(Some((clamped, read_plan(self.data_type, offset, clamped))))
    }

    fn read_to_vec<T: Element>(&self, count: usize, offset: usize) -> GpuResult<Vec<T>> {
        let Some((clamped, plan)) = self.read_setup::<T>(count, offset)? else {
            return Ok(Vec::new());
        };
        let shared = Arc::clone(&self.shared);
        // Checked non-null by read_setup.
        let raw = Arc::clone(self.raw.as_ref().expect("buffer handle"));
        let generation = self.generation;
        let lane_offset = plan.lane_offset;

        let bytes = self
            .shared
            .worker
            .enqueue_sync(move || stage_read(&shared, &raw, generation, &plan))??;
        // Unpacking happens on the calling thread; the worker only stages.
        Ok(unpack_from_staging::<T>(&bytes, lane_offset, clamped))
    }

    /// Releases the device handle via the worker and zeroes the buffer
    /// state. Idempotent; safe to call before drop.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.count = 0;
        self.physical_bytes = 0;
        if let Some(raw) = self.raw.take() {
            defer_drop(&self.shared, raw);
        }
    }
}

/// Moves a device handle onto the worker for destruction. Handles that
/// cannot be forwarded (worker already stopped) are leaked with a warning,
/// which is acceptable at process exit.
fn defer_drop(shared: &RuntimeShared, raw: Arc<wgpu::Buffer>) {
    if shared.worker.enqueue_async(move || drop(raw)).is_err() {
        log::warn!("worker stopped; leaking device buffer at release");
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            defer_drop(&self.shared, raw);
        }
    }
}
