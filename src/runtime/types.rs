//! Logical Data Types and Size Arithmetic
//!
//! This module defines the **logical data types** a buffer can store and the
//! size arithmetic that maps them onto WebGPU storage memory. These
//! definitions are shared across buffer allocation, the host pack/unpack
//! paths, the conversion-kernel library, and the C-ABI façade.
//!
//! ## Storage model
//!
//! WebGPU storage buffers natively address 32-bit scalars only. Types wider
//! or narrower than 32 bits are therefore stored as a 32-bit **surrogate**:
//!
//! - 8-bit types pack four elements per `u32` word,
//! - 16-bit types pack two elements per word,
//! - 64-bit types expand into little-endian low/high word pairs,
//! - `f32`/`i32`/`u32` are stored directly.
//!
//! The [`DataType::needs_packing`] predicate distinguishes the two regimes;
//! [`DataType::required_bytes`] computes the physical footprint of a logical
//! element count, always padded up to a 4-byte multiple.
//!
//! ## Host binding
//!
//! The sealed [`Element`] trait ties the Rust scalar types to their
//! [`DataType`] tags so the typed read/write paths can be written once,
//! generically.

use std::fmt;

/// Number of bytes every physical allocation is padded and aligned to.
pub const WORD_BYTES: usize = 4;

/// Logical element type of a buffer.
///
/// The discriminants double as the stable type codes of the C-ABI surface
/// (code `0` is the f16 placeholder, which aliases `F32`; see
/// [`DataType::from_type_code`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit IEEE float, stored directly.
    F32,
    /// 64-bit IEEE float, stored as low/high word pairs.
    F64,
    /// Signed 8-bit integer, packed four per word.
    I8,
    /// Unsigned 8-bit integer, packed four per word.
    U8,
    /// Signed 16-bit integer, packed two per word.
    I16,
    /// Unsigned 16-bit integer, packed two per word.
    U16,
    /// Signed 32-bit integer, stored directly.
    I32,
    /// Unsigned 32-bit integer, stored directly.
    U32,
    /// Signed 64-bit integer, stored as low/high word pairs.
    I64,
    /// Unsigned 64-bit integer, stored as low/high word pairs.
    U64,
}

impl DataType {
    /// Size of one logical element on the host, in bytes.
    #[inline]
    pub const fn host_size(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
        }
    }

    /// Returns `true` if device storage uses a 32-bit surrogate layout
    /// instead of the host representation.
    #[inline]
    pub const fn needs_packing(self) -> bool {
        !matches!(self, DataType::F32 | DataType::I32 | DataType::U32)
    }

    /// Number of logical elements sharing one 32-bit word, or 0 for types
    /// that span whole words themselves.
    #[inline]
    pub const fn lanes_per_word(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 4,
            DataType::I16 | DataType::U16 => 2,
            _ => 0,
        }
    }

    /// Physical bytes required to store `count` logical elements.
    ///
    /// Direct types occupy one word per element; 8/16-bit types occupy one
    /// word per 4 / 2 elements (rounded up); 64-bit types occupy two words
    /// per element. The result is always a multiple of 4.
    #[inline]
    pub const fn required_bytes(self, count: usize) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => count * WORD_BYTES,
            DataType::I8 | DataType::U8 => count.div_ceil(4) * WORD_BYTES,
            DataType::I16 | DataType::U16 => count.div_ceil(2) * WORD_BYTES,
            DataType::F64 | DataType::I64 | DataType::U64 => count * 8,
        }
    }

    /// Device-side stride used by the readback path, in bytes.
    ///
    /// Packed narrow types read whole words (stride 4), 64-bit types read
    /// word pairs (stride 8), direct types read their host size.
    #[inline]
    pub const fn native_read_stride(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 | DataType::I16 | DataType::U16 => WORD_BYTES,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
            direct => direct.host_size(),
        }
    }

    /// Decodes a C-ABI type code.
    ///
    /// Code `0` is the half-precision placeholder and aliases [`DataType::F32`].
    /// Unknown codes degrade to `F32` with a logged warning rather than
    /// failing, matching the façade contract.
    pub fn from_type_code(code: i32) -> DataType {
        match code {
            0 => {
                log::warn!("type code 0 (f16) is a placeholder; treating as f32");
                DataType::F32
            }
            1 => DataType::F32,
            2 => DataType::F64,
            3 => DataType::I8,
            4 => DataType::I16,
            5 => DataType::I32,
            6 => DataType::I64,
            7 => DataType::U8,
            8 => DataType::U16,
            9 => DataType::U32,
            10 => DataType::U64,
            other => {
                log::warn!("unknown buffer type code {other}; defaulting to f32");
                DataType::F32
            }
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I8 => "i8",
            DataType::U8 => "u8",
            DataType::I16 => "i16",
            DataType::U16 => "u16",
            DataType::I32 => "i32",
            DataType::U32 => "u32",
            DataType::I64 => "i64",
            DataType::U64 => "u64",
        };
        f.write_str(name)
    }
}

/// Rounds a byte size up to the next word boundary, with a one-word floor
/// for non-empty allocations.
#[inline]
pub const fn pad_to_word(bytes: usize) -> usize {
    let padded = (bytes + (WORD_BYTES - 1)) & !(WORD_BYTES - 1);
    if padded == 0 && bytes == 0 {
        0
    } else if padded < WORD_BYTES {
        WORD_BYTES
    } else {
        padded
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Host scalar types that can live in a typed buffer.
///
/// Sealed: exactly the ten logical types implement it. The `Pod` bound lets
/// the transfer paths reinterpret slices as raw bytes without copies.
pub trait Element: sealed::Sealed + bytemuck::Pod + Send + Sync + 'static {
    /// The logical type tag for this scalar.
    const DATA_TYPE: DataType;
}

macro_rules! element {
    ($($rust:ty => $tag:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $rust {}
            impl Element for $rust {
                const DATA_TYPE: DataType = DataType::$tag;
            }
        )*
    };
}

element! {
    f32 => F32,
    f64 => F64,
    i8  => I8,
    u8  => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
}

/// All logical types, in type-code order of the non-placeholder codes.
pub const ALL_DATA_TYPES: [DataType; 10] = [
    DataType::F32,
    DataType::F64,
    DataType::I8,
    DataType::I16,
    DataType::I32,
    DataType::I64,
    DataType::U8,
    DataType::U16,
    DataType::U32,
    DataType::U64,
];
