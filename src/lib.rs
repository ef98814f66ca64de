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
//! Mergeable probabilistic sketches for scalable approximate analytics.
//!
//! The crate currently exposes:
//! - [`cms::Cms`] for approximate frequency estimation (linear and two
//!   logarithmic counter encodings).
//! - [`hh::HeavyHitters`] for approximate top-k heavy-hitter detection.
//! - [`hll::HyperLogLog`] for approximate cardinality estimation.
//! - [`jacard`] for approximate set-overlap/Jaccard helpers.
//! - [`hash`] for the seedable hash primitives every sketch is built on.
//! - [`slab`] for the named shared-memory abstraction sketches attach to.
//! - [`parallel`] for a multi-worker ingest driver that builds and merges
//!   sketch replicas concurrently.

mod archive;
#[cfg(test)]
mod test_support;
pub mod cms;
pub mod error;
pub mod hash;
pub mod hh;
pub mod hll;
pub mod jacard;
pub mod parallel;
pub mod slab;

pub use cms::Cms;
pub use error::SketchError;
pub use hh::HeavyHitters;
pub use hll::HyperLogLog;

/// SplitMix64 mixer used for deriving independent row/RNG seeds.
pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitmix64_is_deterministic_and_seed_sensitive() {
        assert_eq!(splitmix64(42), splitmix64(42));
        assert_ne!(splitmix64(42), splitmix64(43));
    }
}
