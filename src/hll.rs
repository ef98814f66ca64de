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
//! Mergeable HyperLogLog cardinality sketch over byte-string keys.
//!
//! Keyed by [`crate::hash::fasthash64`] rather than `std::hash::Hash`, so
//! every worker in the parallel driver observes the exact same register
//! updates regardless of process/thread identity.

use std::path::Path;

use crate::error::{Result, SketchError};
use crate::hash::fasthash64;
use crate::jacard::JacardIndex;
use crate::slab::{Slab, SlabName};
use crate::archive;

const MIN_PRECISION: u8 = 4;
const MAX_PRECISION: u8 = 18;

/// Construction parameters for [`HyperLogLog::new`].
#[derive(Debug, Clone, Copy)]
pub struct HllParams {
    pub p: u8,
    pub seed: u32,
    pub shared_memory: bool,
}

impl HllParams {
    pub fn new(p: u8, seed: u32, shared_memory: bool) -> Self {
        HllParams { p, seed, shared_memory }
    }

    fn validate(&self) -> Result<()> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&self.p) {
            return Err(SketchError::InvalidParameter("p must be in the inclusive range [4, 18]"));
        }
        Ok(())
    }
}

enum Storage {
    Private(Box<[u8]>),
    Shared(Slab),
}

impl Storage {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Storage::Private(b) => b,
            Storage::Shared(s) => s.as_bytes(),
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Private(b) => b,
            Storage::Shared(s) => s.as_bytes_mut(),
        }
    }

    fn len(&self) -> usize {
        self.as_bytes().len()
    }
}

/// Approximate distinct-key counter backed by `2^p` byte registers.
///
/// # Example
/// ```rust
/// use sketchdrive::hll::{HyperLogLog, HllParams};
///
/// let mut hll = HyperLogLog::new(HllParams::new(12, 0, false)).unwrap();
/// for i in 0..10_000_u32 {
///     hll.add(&i.to_le_bytes());
/// }
///
/// let estimate = hll.query();
/// assert!(estimate > 9_000 && estimate < 11_000);
/// ```
pub struct HyperLogLog {
    params: HllParams,
    storage: Storage,
}

impl HyperLogLog {
    pub fn new(params: HllParams) -> Result<Self> {
        params.validate()?;
        let m = 1_usize << params.p;
        let storage = if params.shared_memory {
            let name = SlabName::generate("hll");
            Storage::Shared(Slab::create(name, m)?)
        } else {
            Storage::Private(vec![0_u8; m].into_boxed_slice())
        };
        tracing::debug!(p = params.p, registers = m, "hyperloglog created");
        Ok(HyperLogLog { params, storage })
    }

    pub fn attach(params: HllParams, name: &SlabName) -> Result<Self> {
        params.validate()?;
        let m = 1_usize << params.p;
        let slab = Slab::attach(name)?;
        if slab.len() != m {
            return Err(SketchError::IncompatibleSketches(
                "attached slab length does not match this HLL's precision",
            ));
        }
        Ok(HyperLogLog { params, storage: Storage::Shared(slab) })
    }

    pub fn precision(&self) -> u8 {
        self.params.p
    }

    pub fn register_count(&self) -> usize {
        self.storage.len()
    }

    /// The slab this sketch is backed by, if it was constructed with
    /// `shared_memory: true`.
    pub(crate) fn slab_name(&self) -> Option<&SlabName> {
        match &self.storage {
            Storage::Shared(slab) => Some(slab.name()),
            Storage::Private(_) => None,
        }
    }

    /// Releases this sketch's shared-memory slab, if it owns one.
    ///
    /// # Errors
    /// Returns [`SketchError::ResourceLeak`] if attacher handles are still
    /// live over the slab.
    pub fn release_shared_memory(self) -> Result<()> {
        match self.storage {
            Storage::Shared(slab) => slab.release(),
            Storage::Private(_) => Ok(()),
        }
    }

    fn registers(&self) -> &[u8] {
        self.storage.as_bytes()
    }

    fn registers_mut(&mut self) -> &mut [u8] {
        self.storage.as_bytes_mut()
    }

    /// Leading-one position (1-indexed) of the high `64-p` bits of `h`,
    /// clamped to `64-p+1`.
    fn rho(h: u64, p: u8) -> u8 {
        let w = h >> p;
        let zeros = w.leading_zeros() as i64 - p as i64;
        let max_rho = (64 - p as i64) + 1;
        (zeros + 1).clamp(1, max_rho) as u8
    }

    /// Adds one key to the sketch.
    pub fn add(&mut self, key: &[u8]) {
        let h = fasthash64(key, self.params.seed as u64);
        let idx = (h & ((1_u64 << self.params.p) - 1)) as usize;
        let rho = Self::rho(h, self.params.p);
        let registers = self.registers_mut();
        if rho > registers[idx] {
            registers[idx] = rho;
        }
    }

    pub fn update<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        for key in keys {
            self.add(key.as_ref());
        }
    }

    fn alpha(m: usize) -> f64 {
        match m {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m as f64),
        }
    }

    fn estimate_f64(&self) -> f64 {
        let m = self.register_count() as f64;
        let alpha = Self::alpha(self.register_count());
        let harmonic_sum: f64 = self.registers().iter().map(|&r| 2_f64.powi(-(r as i32))).sum();
        let raw = alpha * m * m / harmonic_sum;

        let zero_registers = self.registers().iter().filter(|&&r| r == 0).count() as f64;
        let corrected = if raw <= 2.5 * m && zero_registers > 0.0 {
            m * (m / zero_registers).ln()
        } else {
            raw
        };

        let two_to_64 = (u64::MAX as f64) + 1.0;
        if corrected > two_to_64 / 30.0 {
            let ratio = (corrected / two_to_64).min(1.0 - f64::EPSILON);
            -two_to_64 * (1.0 - ratio).ln()
        } else {
            corrected
        }
    }

    /// Returns the bias-corrected cardinality estimate, rounded to `u64`.
    pub fn query(&self) -> u64 {
        self.estimate_f64().round() as u64
    }

    /// Merges another HLL's registers into `self`, element-wise maximum.
    ///
    /// # Errors
    /// Returns [`SketchError::IncompatibleSketches`] when `p` differs.
    pub fn merge(&mut self, other: &HyperLogLog) -> Result<()> {
        if self.params.p != other.params.p {
            return Err(SketchError::IncompatibleSketches("HLL merge requires equal p"));
        }
        let other_registers = other.registers().to_vec();
        for (left, &right) in self.registers_mut().iter_mut().zip(other_registers.iter()) {
            *left = (*left).max(right);
        }
        Ok(())
    }

    /// Estimated union cardinality `|A ∪ B|`, via a merged private clone.
    pub fn union_estimate(&self, other: &HyperLogLog) -> Result<f64> {
        if self.params.p != other.params.p {
            return Err(SketchError::IncompatibleSketches("HLL union requires equal p"));
        }
        let mut union = HyperLogLog::new(HllParams::new(self.params.p, self.params.seed, false))?;
        union.registers_mut().copy_from_slice(self.registers());
        union.merge(other)?;
        Ok(union.estimate_f64())
    }

    /// Estimated intersection cardinality via inclusion-exclusion, clamped
    /// to `[0, min(|A|, |B|)]`.
    pub fn intersection_estimate(&self, other: &HyperLogLog) -> Result<f64> {
        let union = self.union_estimate(other)?;
        let a = self.estimate_f64();
        let b = other.estimate_f64();
        Ok((a + b - union).max(0.0).min(a.min(b)))
    }

    /// Estimated Jaccard index `|A ∩ B| / |A ∪ B|`; `1.0` by convention when
    /// both sets are empty.
    pub fn jaccard_estimate(&self, other: &HyperLogLog) -> Result<f64> {
        let union = self.union_estimate(other)?;
        if union == 0.0 {
            return Ok(1.0);
        }
        let intersection = self.intersection_estimate(other)?;
        Ok((intersection / union).clamp(0.0, 1.0))
    }

    /// Writes a self-describing archive to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        archive::save(
            path,
            "hll",
            vec![self.params.p as u64, self.params.seed as u64],
            self.registers().to_vec(),
            None,
        )
    }

    /// Loads a sketch from an archive written by [`Self::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let archive = archive::load(path, "hll")?;
        if archive.params.len() != 2 {
            return Err(SketchError::IncompatibleSketches("malformed HLL archive parameter vector"));
        }
        let params = HllParams {
            p: archive.params[0] as u8,
            seed: archive.params[1] as u32,
            shared_memory: false,
        };
        let mut hll = HyperLogLog::new(params)?;
        if archive.payload.len() != hll.register_count() {
            return Err(SketchError::IncompatibleSketches("archive payload length mismatch"));
        }
        hll.registers_mut().copy_from_slice(&archive.payload);
        Ok(hll)
    }
}

impl JacardIndex for HyperLogLog {
    fn jaccard_index(&self, other: &Self) -> Result<f64> {
        self.jaccard_estimate(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{T_CRITICAL_99, one_sample_t_statistic};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn merge_is_commutative(
            left_keys in prop::collection::vec(0_u32..500, 0..200),
            right_keys in prop::collection::vec(0_u32..500, 0..200),
        ) {
            let build = |keys: &[u32]| {
                let mut hll = HyperLogLog::new(HllParams::new(8, 0, false)).unwrap();
                for k in keys {
                    hll.add(&k.to_le_bytes());
                }
                hll
            };

            let mut a_then_b = build(&left_keys);
            let b = build(&right_keys);
            a_then_b.merge(&b).unwrap();

            let mut b_then_a = build(&right_keys);
            let a = build(&left_keys);
            b_then_a.merge(&a).unwrap();

            prop_assert_eq!(a_then_b.query(), b_then_a.query());
        }
    }

    /// Runs `n_trials` independent estimates of the same exact cardinality,
    /// each with a distinct hash seed, and t-tests the mean error against zero.
    fn cardinality_t_test(n_trials: u32, exact: u32, p: u8) {
        let residuals: Vec<f64> = (0..n_trials)
            .map(|seed| {
                let mut hll = HyperLogLog::new(HllParams::new(p, seed, false)).unwrap();
                for i in 0..exact {
                    hll.add(&i.to_le_bytes());
                }
                hll.query() as f64 - exact as f64
            })
            .collect();
        let t = one_sample_t_statistic(&residuals);
        assert!(t.abs() < T_CRITICAL_99, "t={t}");
    }

    #[test]
    fn cardinality_error_across_trials_fails_to_reject_the_null_scaled() {
        cardinality_t_test(20, 5_000, 12);
    }

    #[test]
    #[ignore = "full-scale scenario test per SPEC_FULL.md §8.4; run explicitly with `cargo test -- --ignored`"]
    fn cardinality_error_across_trials_fails_to_reject_the_null_full_scale() {
        cardinality_t_test(100, 100_000, 14);
    }

    #[test]
    fn precision_range_is_enforced() {
        assert!(HyperLogLog::new(HllParams::new(3, 0, false)).is_err());
        assert!(HyperLogLog::new(HllParams::new(4, 0, false)).is_ok());
        assert!(HyperLogLog::new(HllParams::new(19, 0, false)).is_err());
    }

    #[test]
    fn empty_sketch_estimates_zero() {
        let hll = HyperLogLog::new(HllParams::new(12, 0, false)).unwrap();
        assert_eq!(hll.query(), 0);
    }

    #[test]
    fn estimate_is_reasonable_for_medium_cardinality() {
        let mut hll = HyperLogLog::new(HllParams::new(12, 0, false)).unwrap();
        let exact = 10_000_u32;
        for i in 0..exact {
            hll.add(&i.to_le_bytes());
        }
        let estimate = hll.query() as f64;
        let relative_error = (estimate - exact as f64).abs() / exact as f64;
        assert!(relative_error <= 0.1, "estimate={estimate}");
    }

    #[test]
    fn merge_combines_observations() {
        let mut left = HyperLogLog::new(HllParams::new(12, 0, false)).unwrap();
        let mut right = HyperLogLog::new(HllParams::new(12, 0, false)).unwrap();
        for i in 0..7_500_u32 {
            left.add(&i.to_le_bytes());
        }
        for i in 7_500_u32..15_000 {
            right.add(&i.to_le_bytes());
        }
        left.merge(&right).unwrap();
        let estimate = left.query() as f64;
        let relative_error = (estimate - 15_000.0).abs() / 15_000.0;
        assert!(relative_error <= 0.12, "estimate={estimate}");
    }

    #[test]
    fn merge_rejects_mismatched_precision() {
        let mut left = HyperLogLog::new(HllParams::new(10, 0, false)).unwrap();
        let right = HyperLogLog::new(HllParams::new(11, 0, false)).unwrap();
        assert!(left.merge(&right).is_err());
    }

    #[test]
    fn union_estimate_tracks_combined_set() {
        let mut left = HyperLogLog::new(HllParams::new(14, 0, false)).unwrap();
        let mut right = HyperLogLog::new(HllParams::new(14, 0, false)).unwrap();
        for i in 0..10_000_u32 {
            left.add(&i.to_le_bytes());
        }
        for i in 5_000_u32..15_000 {
            right.add(&i.to_le_bytes());
        }
        let union = left.union_estimate(&right).unwrap();
        assert!(union > 12_000.0 && union < 18_000.0, "union={union}");
    }

    #[test]
    fn jaccard_estimate_matches_partial_overlap() {
        let mut left = HyperLogLog::new(HllParams::new(14, 0, false)).unwrap();
        let mut right = HyperLogLog::new(HllParams::new(14, 0, false)).unwrap();
        for i in 0..10_000_u32 {
            left.add(&i.to_le_bytes());
        }
        for i in 5_000_u32..15_000 {
            right.add(&i.to_le_bytes());
        }
        let estimate = left.jaccard_estimate(&right).unwrap();
        let exact = 5_000.0 / 15_000.0;
        assert!((estimate - exact).abs() <= 0.12, "estimate={estimate}");
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hll.bin");

        let mut hll = HyperLogLog::new(HllParams::new(10, 7, false)).unwrap();
        for i in 0..2_000_u32 {
            hll.add(&i.to_le_bytes());
        }
        hll.save(&path).unwrap();

        let loaded = HyperLogLog::load(&path).unwrap();
        assert_eq!(loaded.query(), hll.query());
    }

    #[test]
    fn idempotent_attach_yields_identical_estimate() {
        let params = HllParams::new(10, 0, true);
        let mut owner = HyperLogLog::new(params).unwrap();
        for i in 0..500_u32 {
            owner.add(&i.to_le_bytes());
        }
        let name = match &owner.storage {
            Storage::Shared(slab) => slab.name().clone(),
            Storage::Private(_) => unreachable!(),
        };
        let first = HyperLogLog::attach(params, &name).unwrap();
        let second = HyperLogLog::attach(params, &name).unwrap();
        assert_eq!(first.query(), second.query());
        assert_eq!(first.query(), owner.query());
    }
}
