//! # On-Device Conversion Kernels
//!
//! A closed library of WGSL kernels implementing, on the GPU, the same
//! pack/unpack transforms as the host-side word packing. They serve callers
//! that already hold data on the device as a **wide surrogate** (one 32-bit
//! value per narrow element) and need the packed representation, or the
//! reverse, without a host round-trip.
//!
//! Every kernel is a 1-D compute pass with workgroup size 256 and two
//! storage bindings (source at slot 0, destination at slot 1). Each
//! invocation bounds-checks against **both** array lengths, so partial tail
//! words are handled without over-reading or over-writing.
//!
//! ## 64-bit transforms
//!
//! WGSL has no 64-bit scalars; 64-bit buffers exist on the device only as
//! little-endian low/high word pairs. The 64-bit helpers therefore convert
//! between the interleaved pair layout and **planar** low/high word planes
//! (all low words first, then all high words), which is the useful
//! addressable form for kernels that operate on one half at a time.
//!
//! ## Limits
//!
//! Helpers dispatch along X only and reject requests beyond 65 535
//! workgroups or `256 × 65 535` total invocations with a
//! dispatch-too-large error.

use crate::runtime::buffer::Buffer;
use crate::runtime::error::{GpuError, GpuResult};
use crate::runtime::types::DataType;
use crate::runtime::GpuRuntime;

/// Workgroup size every conversion kernel declares.
pub const WORKGROUP_SIZE: usize = 256;
/// Backend limit on workgroups in the X dimension.
pub const MAX_WORKGROUPS_X: usize = 65_535;
/// Conservative backend limit on total invocations per dispatch.
pub const MAX_TOTAL_INVOCATIONS: usize = WORKGROUP_SIZE * MAX_WORKGROUPS_X;

/// Unpacks four i8 lanes per word into sign-extended i32 values.
pub const UNPACK_I8_TO_I32: &str = r#"
@group(0) @binding(0) var<storage, read_write> packed: array<i32>;
@group(0) @binding(1) var<storage, read_write> wide: array<i32>;

fn extend_i8(v: i32) -> i32 {
    return (v << 24u) >> 24u;
}

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let word = gid.x;
    if (word >= arrayLength(&packed)) {
        return;
    }
    let bits = packed[word];
    let base = word * 4u;
    let limit = arrayLength(&wide);
    for (var lane = 0u; lane < 4u; lane = lane + 1u) {
        let index = base + lane;
        if (index < limit) {
            wide[index] = extend_i8((bits >> (8u * lane)) & 0xFF);
        }
    }
}
"#;

/// Packs the low 8 bits of four i32 values into one word.
pub const PACK_I32_TO_I8: &str = r#"
@group(0) @binding(0) var<storage, read_write> wide: array<i32>;
@group(0) @binding(1) var<storage, read_write> packed: array<i32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let word = gid.x;
    if (word >= arrayLength(&packed)) {
        return;
    }
    let base = word * 4u;
    let limit = arrayLength(&wide);
    var bits: i32 = 0;
    for (var lane = 0u; lane < 4u; lane = lane + 1u) {
        let index = base + lane;
        if (index < limit) {
            bits = bits | ((wide[index] & 0xFF) << (8u * lane));
        }
    }
    packed[word] = bits;
}
"#;

/// Unpacks four u8 lanes per word into zero-extended u32 values.
pub const UNPACK_U8_TO_U32: &str = r#"
@group(0) @binding(0) var<storage, read_write> packed: array<u32>;
@group(0) @binding(1) var<storage, read_write> wide: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let word = gid.x;
    if (word >= arrayLength(&packed)) {
        return;
    }
    let bits = packed[word];
    let base = word * 4u;
    let limit = arrayLength(&wide);
    for (var lane = 0u; lane < 4u; lane = lane + 1u) {
        let index = base + lane;
        if (index < limit) {
            wide[index] = (bits >> (8u * lane)) & 0xFFu;
        }
    }
}
"#;

/// Packs the low 8 bits of four u32 values into one word.
pub const PACK_U32_TO_U8: &str = r#"
@group(0) @binding(0) var<storage, read_write> wide: array<u32>;
@group(0) @binding(1) var<storage, read_write> packed: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let word = gid.x;
    if (word >= arrayLength(&packed)) {
        return;
    }
    let base = word * 4u;
    let limit = arrayLength(&wide);
    var bits: u32 = 0u;
    for (var lane = 0u; lane < 4u; lane = lane + 1u) {
        let index = base + lane;
        if (index < limit) {
            bits = bits | ((wide[index] & 0xFFu) << (8u * lane));
        }
    }
    packed[word] = bits;
}
"#;

/// Unpacks two i16 lanes per word into sign-extended i32 values.
pub const UNPACK_I16_TO_I32: &str = r#"
@group(0) @binding(0) var<storage, read_write> packed: array<i32>;
@group(0) @binding(1) var<storage, read_write> wide: array<i32>;

fn extend_i16(v: i32) -> i32 {
    return (v << 16u) >> 16u;
}

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let word = gid.x;
    if (word >= arrayLength(&packed)) {
        return;
    }
    let bits = packed[word];
    let base = word * 2u;
    let limit = arrayLength(&wide);
    for (var lane = 0u; lane < 2u; lane = lane + 1u) {
        let index = base + lane;
        if (index < limit) {
            wide[index] = extend_i16((bits >> (16u * lane)) & 0xFFFF);
        }
    }
}
"#;

/// Packs the low 16 bits of two i32 values into one word.
pub const PACK_I32_TO_I16: &str = r#"
@group(0) @binding(0) var<storage, read_write> wide: array<i32>;
@group(0) @binding(1) var<storage, read_write> packed: array<i32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let word = gid.x;
    if (word >= arrayLength(&packed)) {
        return;
    }
    let base = word * 2u;
    let limit = arrayLength(&wide);
    var bits: i32 = 0;
    for (var lane = 0u; lane < 2u; lane = lane + 1u) {
        let index = base + lane;
        if (index < limit) {
            bits = bits | ((wide[index] & 0xFFFF) << (16u * lane));
        }
    }
    packed[word] = bits;
}
"#;

/// Unpacks two u16 lanes per word into zero-extended u32 values.
pub const UNPACK_U16_TO_U32: &str = r#"
@group(0) @binding(0) var<storage, read_write> packed: array<u32>;
@group(0) @binding(1) var<storage, read_write> wide: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let word = gid.x;
    if (word >= arrayLength(&packed)) {
        return;
    }
    let bits = packed[word];
    let base = word * 2u;
    let limit = arrayLength(&wide);
    for (var lane = 0u; lane < 2u; lane = lane + 1u) {
        let index = base + lane;
        if (index < limit) {
            wide[index] = (bits >> (16u * lane)) & 0xFFFFu;
        }
    }
}
"#;

/// Packs the low 16 bits of two u32 values into one word.
pub const PACK_U32_TO_U16: &str = r#"
@group(0) @binding(0) var<storage, read_write> wide: array<u32>;
@group(0) @binding(1) var<storage, read_write> packed: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let word = gid.x;
    if (word >= arrayLength(&packed)) {
        return;
    }
    let base = word * 2u;
    let limit = arrayLength(&wide);
    var bits: u32 = 0u;
    for (var lane = 0u; lane < 2u; lane = lane + 1u) {
        let index = base + lane;
        if (index < limit) {
            bits = bits | ((wide[index] & 0xFFFFu) << (16u * lane));
        }
    }
    packed[word] = bits;
}
"#;

/// Splits interleaved low/high word pairs into planar low and high planes.
pub const SPLIT_PAIRS_TO_PLANES: &str = r#"
@group(0) @binding(0) var<storage, read_write> interleaved: array<u32>;
@group(0) @binding(1) var<storage, read_write> planar: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    let n = min(arrayLength(&interleaved), arrayLength(&planar)) / 2u;
    if (i >= n) {
        return;
    }
    planar[i] = interleaved[2u * i];
    planar[n + i] = interleaved[2u * i + 1u];
}
"#;

/// Merges planar low and high planes back into interleaved pairs.
pub const MERGE_PLANES_TO_PAIRS: &str = r#"
@group(0) @binding(0) var<storage, read_write> planar: array<u32>;
@group(0) @binding(1) var<storage, read_write> interleaved: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    let n = min(arrayLength(&interleaved), arrayLength(&planar)) / 2u;
    if (i >= n) {
        return;
    }
    interleaved[2u * i] = planar[i];
    interleaved[2u * i + 1u] = planar[n + i];
}
"#;

/// Computes the 1-D workgroup count for `invocations`, enforcing backend
/// dispatch limits.
///
/// ## Errors
/// [`GpuError::DispatchTooLarge`] past 65 535 workgroups or the total
/// invocation ceiling.
pub fn workgroups_for(invocations: usize) -> GpuResult<u32> {
    let workgroups = invocations.div_ceil(WORKGROUP_SIZE);
    let total = workgroups * WORKGROUP_SIZE;
    if workgroups > MAX_WORKGROUPS_X || total > MAX_TOTAL_INVOCATIONS {
        return Err(GpuError::DispatchTooLarge {
            workgroups,
            max_workgroups: MAX_WORKGROUPS_X,
            invocations: total,
            max_invocations: MAX_TOTAL_INVOCATIONS,
        });
    }
    Ok(workgroups as u32)
}

fn expect_type(buffer: &Buffer, expected: DataType, what: &'static str) -> GpuResult<()> {
    if buffer.data_type() != expected {
        log::error!(
            "conversion kernel expected a {expected} buffer, got {}",
            buffer.data_type()
        );
        return Err(GpuError::InvalidArgument { what });
    }
    Ok(())
}

fn expect_capacity(narrow: &Buffer, wide: &Buffer) -> GpuResult<()> {
    if wide.len() < narrow.len() {
        return Err(GpuError::SizeMismatch {
            data_type: wide.data_type(),
            required: wide.data_type().required_bytes(narrow.len()),
            available: wide.physical_size(),
        });
    }
    Ok(())
}

/// Loads `source` into a transient shader and dispatches it over the two
/// conversion bindings.
fn run_conversion(
    runtime: &GpuRuntime,
    source: &str,
    src: &Buffer,
    dst: &Buffer,
    invocations: usize,
) -> GpuResult<()> {
    if invocations == 0 {
        log::warn!("conversion kernel invoked with zero elements; nothing to do");
        return Ok(());
    }
    let workgroups = workgroups_for(invocations)?;

    let shader = runtime.create_shader();
    shader.load_kernel(source);
    shader.set_buffer(0, src);
    shader.set_buffer(1, dst);
    shader.dispatch(workgroups, 1, 1)
}

/// Unpacks a packed i8 buffer into a wide i32 buffer (one element per i32,
/// sign-extended). `wide` must hold at least `packed.len()` elements.
pub fn unpack_i8(runtime: &GpuRuntime, packed: &Buffer, wide: &Buffer) -> GpuResult<()> {
    expect_type(packed, DataType::I8, "unpack source must be i8")?;
    expect_type(wide, DataType::I32, "unpack destination must be i32")?;
    expect_capacity(packed, wide)?;
    run_conversion(runtime, UNPACK_I8_TO_I32, packed, wide, packed.len().div_ceil(4))
}

/// Packs a wide i32 buffer (low 8 bits per element) into a packed i8
/// buffer. `wide` must hold at least `packed.len()` elements.
pub fn pack_i8(runtime: &GpuRuntime, wide: &Buffer, packed: &Buffer) -> GpuResult<()> {
    expect_type(wide, DataType::I32, "pack source must be i32")?;
    expect_type(packed, DataType::I8, "pack destination must be i8")?;
    expect_capacity(packed, wide)?;
    run_conversion(runtime, PACK_I32_TO_I8, wide, packed, packed.len().div_ceil(4))
}

/// Unpacks a packed u8 buffer into a wide u32 buffer (zero-extended).
pub fn unpack_u8(runtime: &GpuRuntime, packed: &Buffer, wide: &Buffer) -> GpuResult<()> {
    expect_type(packed, DataType::U8, "unpack source must be u8")?;
    expect_type(wide, DataType::U32, "unpack destination must be u32")?;
    expect_capacity(packed, wide)?;
    run_conversion(runtime, UNPACK_U8_TO_U32, packed, wide, packed.len().div_ceil(4))
}

/// Packs a wide u32 buffer (low 8 bits per element) into a packed u8
/// buffer.
pub fn pack_u8(runtime: &GpuRuntime, wide: &Buffer, packed: &Buffer) -> GpuResult<()> {
    expect_type(wide, DataType::U32, "pack source must be u32")?;
    expect_type(packed, DataType::U8, "pack destination must be u8")?;
    expect_capacity(packed, wide)?;
    run_conversion(runtime, PACK_U32_TO_U8, wide, packed, packed.len().div_ceil(4))
}

/// Unpacks a packed i16 buffer into a wide i32 buffer (sign-extended).
pub fn unpack_i16(runtime: &GpuRuntime, packed: &Buffer, wide: &Buffer) -> GpuResult<()> {
    expect_type(packed, DataType::I16, "unpack source must be i16")?;
    expect_type(wide, DataType::I32, "unpack destination must be i32")?;
    expect_capacity(packed, wide)?;
    run_conversion(runtime, UNPACK_I16_TO_I32, packed, wide, packed.len().div_ceil(2))
}

/// Packs a wide i32 buffer (low 16 bits per element) into a packed i16
/// buffer.
pub fn pack_i16(runtime: &GpuRuntime, wide: &Buffer, packed: &Buffer) -> GpuResult<()> {
    expect_type(wide, DataType::I32, "pack source must be i32")?;
    expect_type(packed, DataType::I16, "pack destination must be i16")?;
    expect_capacity(packed, wide)?;
    run_conversion(runtime, PACK_I32_TO_I16, wide, packed, packed.len().div_ceil(2))
}

/// Unpacks a packed u16 buffer into a wide u32 buffer (zero-extended).
pub fn unpack_u16(runtime: &GpuRuntime, packed: &Buffer, wide: &Buffer) -> GpuResult<()> {
    expect_type(packed, DataType::U16, "unpack source must be u16")?;
    expect_type(wide, DataType::U32, "unpack destination must be u32")?;
    expect_capacity(packed, wide)?;
    run_conversion(runtime, UNPACK_U16_TO_U32, packed, wide, packed.len().div_ceil(2))
}

/// Packs a wide u32 buffer (low 16 bits per element) into a packed u16
/// buffer.
pub fn pack_u16(runtime: &GpuRuntime, wide: &Buffer, packed: &Buffer) -> GpuResult<()> {
    expect_type(wide, DataType::U32, "pack source must be u32")?;
    expect_type(packed, DataType::U16, "pack destination must be u16")?;
    expect_capacity(packed, wide)?;
    run_conversion(runtime, PACK_U32_TO_U16, wide, packed, packed.len().div_ceil(2))
}

fn expect_wide64(buffer: &Buffer, what: &'static str) -> GpuResult<()> {
    match buffer.data_type() {
        DataType::F64 | DataType::I64 | DataType::U64 => Ok(()),
        other => {
            log::error!("64-bit conversion expected f64/i64/u64, got {other}");
            Err(GpuError::InvalidArgument { what })
        }
    }
}

/// Splits a 64-bit buffer's interleaved low/high pairs into planar word
/// planes held by a u32 buffer of at least `2 * pairs.len()` elements.
pub fn split_word_pairs(runtime: &GpuRuntime, pairs: &Buffer, planes: &Buffer) -> GpuResult<()> {
    expect_wide64(pairs, "split source must be a 64-bit buffer")?;
    expect_type(planes, DataType::U32, "split destination must be u32")?;
    if planes.len() < pairs.len() * 2 {
        return Err(GpuError::SizeMismatch {
            data_type: DataType::U32,
            required: pairs.len() * 2 * 4,
            available: planes.physical_size(),
        });
    }
    run_conversion(runtime, SPLIT_PAIRS_TO_PLANES, pairs, planes, pairs.len())
}

/// Merges planar low/high word planes back into a 64-bit buffer's
/// interleaved pairs.
pub fn merge_word_pairs(runtime: &GpuRuntime, planes: &Buffer, pairs: &Buffer) -> GpuResult<()> {
    expect_type(planes, DataType::U32, "merge source must be u32")?;
    expect_wide64(pairs, "merge destination must be a 64-bit buffer")?;
    if planes.len() < pairs.len() * 2 {
        return Err(GpuError::SizeMismatch {
            data_type: DataType::U32,
            required: pairs.len() * 2 * 4,
            available: planes.physical_size(),
        });
    }
    run_conversion(runtime, MERGE_PLANES_TO_PAIRS, planes, pairs, pairs.len())
}
