//! # Host-Side Word Packing
//!
//! Pure transforms between host arrays and the 32-bit word layouts used in
//! device storage. The GPU conversion kernels implement the same layouts
//! on-device; both sides must agree bit for bit.
//!
//! ## Layouts
//!
//! * **8-bit**: four lanes per word; lane `k` occupies bits `[8k, 8k+8)`,
//!   little-endian within the lane.
//! * **16-bit**: two lanes per word; lane `k` occupies bits `[16k, 16k+16)`.
//! * **64-bit**: two words per element; the low word at the even index, the
//!   high word at the odd index. `f64` travels as its raw bit pattern, so
//!   round-trips are bit-exact.
//!
//! Sign handling is purely representational: packing keeps the low bits of
//! each element and unpacking reinterprets them at the original width, so
//! `-128i8` survives the trip as `-128`, never `128`.
//!
//! The unpack functions accept a **lane offset** so a read that starts
//! mid-word can fetch whole words from the device and discard the leading
//! lanes.
//!
//! Large arrays pack in parallel; small ones stay sequential to avoid the
//! fork overhead.

use rayon::prelude::*;

/// Element count above which packing fans out across the rayon pool.
const PARALLEL_THRESHOLD: usize = 1 << 16;

#[inline]
fn byte_word(chunk: &[u8]) -> u32 {
    let mut word = 0u32;
    for (lane, &byte) in chunk.iter().enumerate() {
        word |= (byte as u32) << (8 * lane);
    }
    word
}

#[inline]
fn half_word(chunk: &[u16]) -> u32 {
    let mut word = 0u32;
    for (lane, &half) in chunk.iter().enumerate() {
        word |= (half as u32) << (16 * lane);
    }
    word
}

/// Packs 8-bit values four per word. The final word is zero-padded.
pub fn pack_bytes(values: &[u8]) -> Vec<u32> {
    if values.len() >= PARALLEL_THRESHOLD {
        values.par_chunks(4).map(byte_word).collect()
    } else {
        values.chunks(4).map(byte_word).collect()
    }
}

/// Unpacks `count` 8-bit values from packed words, starting `lane_offset`
/// lanes into the first word.
pub fn unpack_bytes(words: &[u32], lane_offset: usize, count: usize) -> Vec<u8> {
    debug_assert!(lane_offset < 4);
    debug_assert!((lane_offset + count).div_ceil(4) <= words.len());

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let lane = lane_offset + i;
        let word = words[lane / 4];
        out.push((word >> (8 * (lane % 4))) as u8);
    }
    out
}

/// Packs 16-bit values two per word. The final word is zero-padded.
pub fn pack_halves(values: &[u16]) -> Vec<u32> {
    if values.len() >= PARALLEL_THRESHOLD {
        values.par_chunks(2).map(half_word).collect()
    } else {
        values.chunks(2).map(half_word).collect()
    }
}

/// Unpacks `count` 16-bit values from packed words, starting `lane_offset`
/// lanes into the first word.
pub fn unpack_halves(words: &[u32], lane_offset: usize, count: usize) -> Vec<u16> {
    debug_assert!(lane_offset < 2);
    debug_assert!((lane_offset + count).div_ceil(2) <= words.len());

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let lane = lane_offset + i;
        let word = words[lane / 2];
        out.push((word >> (16 * (lane % 2))) as u16);
    }
    out
}

/// Splits 64-bit values into little-endian low/high word pairs.
pub fn pack_pairs(values: &[u64]) -> Vec<u32> {
    let mut out = vec![0u32; values.len() * 2];
    if values.len() >= PARALLEL_THRESHOLD {
        out.par_chunks_mut(2)
            .zip(values.par_iter())
            .for_each(|(pair, &value)| {
                pair[0] = value as u32;
                pair[1] = (value >> 32) as u32;
            });
    } else {
        for (pair, &value) in out.chunks_mut(2).zip(values.iter()) {
            pair[0] = value as u32;
            pair[1] = (value >> 32) as u32;
        }
    }
    out
}

/// Reassembles 64-bit values from low/high word pairs.
pub fn unpack_pairs(words: &[u32], count: usize) -> Vec<u64> {
    debug_assert!(count * 2 <= words.len());

    let mut out = Vec::with_capacity(count);
    for pair in words[..count * 2].chunks_exact(2) {
        out.push((pair[0] as u64) | ((pair[1] as u64) << 32));
    }
    out
}
