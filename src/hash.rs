// MIT License
//
// Copyright (c) 2026 Raja Lehtihet & Wael El Oraiby
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
//
//! Seedable hash primitives shared by every sketch in this crate.
//!
//! `fasthash64`/`fasthash32` are bit-exact ports of zilong-huang's fasthash
//! (the version vendored into smhasher), and `murmur3` is a bit-exact port of
//! `MurmurHash3_x86_32`. All three are pure functions of `(bytes, seed)`: no
//! interior mutability, so they are `Send + Sync` for free and safe to call
//! concurrently from every worker in the parallel driver.

const FASTHASH_M: u64 = 0x880355f21e6d1965;

#[inline]
fn fasthash_mix(mut h: u64) -> u64 {
    h ^= h >> 23;
    h = h.wrapping_mul(0x2127_599b_f432_5c37);
    h ^= h >> 47;
    h
}

/// 64-bit fasthash of `data`, seeded with `seed`.
///
/// # Example
/// ```rust
/// use sketchdrive::hash::fasthash64;
///
/// let a = fasthash64(b"hello", 0);
/// let b = fasthash64(b"hello", 1);
/// assert_ne!(a, b, "different seeds should (almost always) disagree");
/// ```
pub fn fasthash64(data: &[u8], seed: u64) -> u64 {
    let len = data.len();
    let mut h = seed ^ (len as u64).wrapping_mul(FASTHASH_M);

    let nblocks = len / 8;
    for chunk in data[..nblocks * 8].chunks_exact(8) {
        let v = u64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));
        h ^= fasthash_mix(v);
        h = h.wrapping_mul(FASTHASH_M);
    }

    let tail = &data[nblocks * 8..];
    if !tail.is_empty() {
        let mut buf = [0_u8; 8];
        buf[..tail.len()].copy_from_slice(tail);
        let v = u64::from_le_bytes(buf);
        h ^= fasthash_mix(v);
        h = h.wrapping_mul(FASTHASH_M);
    }

    fasthash_mix(h)
}

/// 32-bit fasthash, derived from [`fasthash64`] via the Fermat-residue fold
/// used by the reference implementation (`h - (h >> 32)`, truncated to `u32`).
///
/// # Example
/// ```rust
/// use sketchdrive::hash::fasthash32;
///
/// assert_eq!(fasthash32(b"test", 0), 2542785854);
/// assert_eq!(fasthash32(b"abc", 1), 558486214);
/// ```
pub fn fasthash32(data: &[u8], seed: u32) -> u32 {
    let h = fasthash64(data, seed as u64);
    h.wrapping_sub(h >> 32) as u32
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

const MURMUR3_C1: u32 = 0xcc9e_2d51;
const MURMUR3_C2: u32 = 0x1b87_3593;

/// MurmurHash3_x86_32 of `data`, seeded with `seed`.
///
/// # Example
/// ```rust
/// use sketchdrive::hash::murmur3;
///
/// assert_eq!(murmur3(b"test", 0), 3127628307);
/// assert_eq!(murmur3(b"abc", 1), 2859854335);
/// ```
pub fn murmur3(data: &[u8], seed: u32) -> u32 {
    let len = data.len();
    let nblocks = len / 4;
    let mut h1 = seed;

    for chunk in data[..nblocks * 4].chunks_exact(4) {
        let mut k1 = u32::from_le_bytes(chunk.try_into().expect("4-byte chunk"));
        k1 = k1.wrapping_mul(MURMUR3_C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(MURMUR3_C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = &data[nblocks * 4..];
    let mut k1 = 0_u32;
    match tail.len() {
        3 => {
            k1 ^= (tail[2] as u32) << 16;
            k1 ^= (tail[1] as u32) << 8;
            k1 ^= tail[0] as u32;
        }
        2 => {
            k1 ^= (tail[1] as u32) << 8;
            k1 ^= tail[0] as u32;
        }
        1 => {
            k1 ^= tail[0] as u32;
        }
        _ => {}
    }
    if !tail.is_empty() {
        k1 = k1.wrapping_mul(MURMUR3_C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(MURMUR3_C2);
        h1 ^= k1;
    }

    h1 ^= len as u32;
    fmix32(h1)
}

/// Index of a count-min/heavy-hitter row's bucket for `key`, i.e.
/// `fasthash64(key, row) mod width`.
#[inline]
pub(crate) fn row_bucket(key: &[u8], row: u64, width: usize) -> usize {
    (fasthash64(key, row) % (width as u64)) as usize
}
