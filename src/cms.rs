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
//! Count-Min Sketch with three counter encodings.
//!
//! `Linear` counters saturate at `u32::MAX`. `Log16`/`Log8` trade precision
//! for space: below `num_reserved` they count exactly, above it they grow by
//! a probabilistic increment whose expectation is the reciprocal of the
//! counter's current log-scale weight, giving geometric compression with an
//! unbiased estimator.

use std::path::Path;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, SketchError};
use crate::slab::{Slab, SlabName, pad_to, typed_slice, typed_slice_mut};
use crate::{archive, splitmix64};

/// Counter encoding used by a [`Cms`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmsVariant {
    /// 32-bit saturating counters.
    Linear,
    /// 16-bit log-base-1.00025 counters.
    Log16,
    /// 8-bit log counters, base chosen so `255` maps to `max_count`.
    Log8,
}

impl CmsVariant {
    fn tag(self) -> &'static str {
        match self {
            CmsVariant::Linear => "linear",
            CmsVariant::Log16 => "log16",
            CmsVariant::Log8 => "log8",
        }
    }

    fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "linear" => Ok(CmsVariant::Linear),
            "log16" => Ok(CmsVariant::Log16),
            "log8" => Ok(CmsVariant::Log8),
            _ => Err(SketchError::IncompatibleSketches(
                "archive variant is not a known CMS encoding",
            )),
        }
    }

    fn counter_size(self) -> usize {
        match self {
            CmsVariant::Linear => 4,
            CmsVariant::Log16 => 2,
            CmsVariant::Log8 => 1,
        }
    }

    fn max_raw(self) -> u64 {
        match self {
            CmsVariant::Linear => u32::MAX as u64,
            CmsVariant::Log16 => u16::MAX as u64,
            CmsVariant::Log8 => u8::MAX as u64,
        }
    }
}

/// Construction parameters for [`Cms::new`].
///
/// `max_count` is only consulted for [`CmsVariant::Log8`] (it fixes the log
/// base so the top counter value maps to it); `num_reserved` is only
/// consulted for the log variants.
#[derive(Debug, Clone, Copy)]
pub struct CmsParams {
    pub variant: CmsVariant,
    pub width: usize,
    pub depth: usize,
    pub max_count: u64,
    pub num_reserved: u32,
    pub shared_memory: bool,
}

impl CmsParams {
    pub fn linear(width: usize, depth: usize, shared_memory: bool) -> Self {
        CmsParams {
            variant: CmsVariant::Linear,
            width,
            depth,
            max_count: 0,
            num_reserved: 0,
            shared_memory,
        }
    }

    pub fn log16(width: usize, depth: usize, num_reserved: u32, shared_memory: bool) -> Self {
        CmsParams {
            variant: CmsVariant::Log16,
            width,
            depth,
            max_count: 0,
            num_reserved,
            shared_memory,
        }
    }

    pub fn log8(
        width: usize,
        depth: usize,
        max_count: u64,
        num_reserved: u32,
        shared_memory: bool,
    ) -> Self {
        CmsParams {
            variant: CmsVariant::Log8,
            width,
            depth,
            max_count,
            num_reserved,
            shared_memory,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.depth == 0 {
            return Err(SketchError::InvalidParameter("width and depth must be positive"));
        }
        match self.variant {
            CmsVariant::Linear => {}
            CmsVariant::Log16 => {
                if self.num_reserved as u64 >= CmsVariant::Log16.max_raw() {
                    return Err(SketchError::InvalidParameter(
                        "num_reserved must be below the log16 counter's max value",
                    ));
                }
            }
            CmsVariant::Log8 => {
                if self.num_reserved as u64 >= CmsVariant::Log8.max_raw() {
                    return Err(SketchError::InvalidParameter(
                        "num_reserved must be below the log8 counter's max value",
                    ));
                }
                if self.max_count <= self.num_reserved as u64 {
                    return Err(SketchError::InvalidParameter(
                        "max_count must exceed num_reserved for log8",
                    ));
                }
            }
        }
        Ok(())
    }

    fn base(&self) -> f64 {
        match self.variant {
            CmsVariant::Linear => 1.0,
            CmsVariant::Log16 => 1.00025,
            CmsVariant::Log8 => solve_log8_base(self.num_reserved, self.max_count),
        }
    }
}

/// Finds the log base `b > 1` such that the top log-8 counter value (255)
/// maps to `max_count` under the inverse mapping, via bisection (the forward
/// relationship is monotonic in `b`).
fn solve_log8_base(num_reserved: u32, max_count: u64) -> f64 {
    let n = (u8::MAX as u32 - num_reserved) as f64;
    let target = (max_count - num_reserved as u64) as f64;

    let value_at = |base: f64| -> f64 {
        if n <= 0.0 {
            return 0.0;
        }
        (base.powf(n) - 1.0) / (base - 1.0)
    };

    let mut lo = 1.0 + 1e-9;
    let mut hi = 2.0;
    while value_at(hi) < target {
        hi *= 2.0;
        if hi > 1.0e6 {
            break;
        }
    }
    for _ in 0..200 {
        let mid = (lo + hi) / 2.0;
        if value_at(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
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

struct Layout {
    counters_len: usize,
    n_added_offset: usize,
    total_len: usize,
}

fn layout_for(depth: usize, width: usize, counter_size: usize) -> Layout {
    let counters_bytes = depth * width * counter_size;
    let n_added_offset = pad_to(counters_bytes, 8);
    Layout {
        counters_len: depth * width,
        n_added_offset,
        total_len: n_added_offset + 16,
    }
}

/// Mergeable Count-Min Sketch.
///
/// # Example
/// ```rust
/// use sketchdrive::cms::{Cms, CmsParams};
///
/// let mut cms = Cms::new(CmsParams::linear(2048, 6, false)).unwrap();
/// for _ in 0..50 {
///     cms.add(b"frequent-key");
/// }
/// cms.add(b"rare-key");
///
/// assert!(cms.query(b"frequent-key") >= 50);
/// assert!(cms.query(b"frequent-key") > cms.query(b"rare-key"));
/// ```
pub struct Cms {
    params: CmsParams,
    base: f64,
    layout: Layout,
    storage: Storage,
    rng: SmallRng,
}

impl Cms {
    pub fn new(params: CmsParams) -> Result<Self> {
        params.validate()?;
        let layout = layout_for(params.depth, params.width, params.variant.counter_size());
        let storage = if params.shared_memory {
            let name = SlabName::generate("cms");
            Storage::Shared(Slab::create(name, layout.total_len)?)
        } else {
            Storage::Private(vec![0_u8; layout.total_len].into_boxed_slice())
        };
        let base = params.base();
        let rng = SmallRng::seed_from_u64(splitmix64(0xC7A5_1000 ^ params.width as u64));
        tracing::debug!(variant = params.variant.tag(), width = params.width, depth = params.depth, "cms created");
        Ok(Cms { params, base, layout, storage, rng })
    }

    /// Attaches to an existing owner's slab, reconstructing a handle from
    /// the same construction parameters the owner used.
    pub fn attach(params: CmsParams, name: &SlabName) -> Result<Self> {
        params.validate()?;
        let layout = layout_for(params.depth, params.width, params.variant.counter_size());
        let slab = Slab::attach(name)?;
        if slab.len() != layout.total_len {
            return Err(SketchError::IncompatibleSketches(
                "attached slab length does not match these CMS parameters",
            ));
        }
        let base = params.base();
        let rng = SmallRng::seed_from_u64(splitmix64(0xC7A5_1000 ^ params.width as u64));
        Ok(Cms {
            params,
            base,
            layout,
            storage: Storage::Shared(slab),
            rng,
        })
    }

    pub fn variant(&self) -> CmsVariant {
        self.params.variant
    }

    pub fn width(&self) -> usize {
        self.params.width
    }

    pub fn depth(&self) -> usize {
        self.params.depth
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

    fn row_col(&self, key: &[u8], row: usize) -> usize {
        crate::hash::row_bucket(key, row as u64, self.params.width)
    }

    fn n_added_slice(&self) -> &[u64] {
        // SAFETY: `n_added_offset` is 8-byte aligned by construction and the
        // two u64s fit within `total_len`.
        unsafe { typed_slice(self.storage.as_bytes(), self.layout.n_added_offset, 2) }
    }

    fn n_added_slice_mut(&mut self) -> &mut [u64] {
        let offset = self.layout.n_added_offset;
        // SAFETY: see `n_added_slice`.
        unsafe { typed_slice_mut(self.storage.as_bytes_mut(), offset, 2) }
    }

    pub fn n_added(&self) -> u64 {
        self.n_added_slice()[0]
    }

    pub fn n_records(&self) -> u64 {
        self.n_added_slice()[1]
    }

    /// Stamps the worker-visible record count (used by the parallel driver).
    pub(crate) fn set_n_records(&mut self, value: u64) {
        self.n_added_slice_mut()[1] = value;
    }

    fn raw_get(&self, row: usize, col: usize) -> u64 {
        let idx = row * self.params.width + col;
        match self.params.variant {
            CmsVariant::Linear => unsafe { typed_slice::<u32>(self.storage.as_bytes(), idx * 4, 1)[0] as u64 },
            CmsVariant::Log16 => unsafe { typed_slice::<u16>(self.storage.as_bytes(), idx * 2, 1)[0] as u64 },
            CmsVariant::Log8 => self.storage.as_bytes()[idx],
        }
    }

    fn raw_set(&mut self, row: usize, col: usize, value: u64) {
        let idx = row * self.params.width + col;
        match self.params.variant {
            CmsVariant::Linear => {
                let slice: &mut [u32] = unsafe { typed_slice_mut(self.storage.as_bytes_mut(), idx * 4, 1) };
                slice[0] = value as u32;
            }
            CmsVariant::Log16 => {
                let slice: &mut [u16] = unsafe { typed_slice_mut(self.storage.as_bytes_mut(), idx * 2, 1) };
                slice[0] = value as u16;
            }
            CmsVariant::Log8 => {
                self.storage.as_bytes_mut()[idx] = value as u8;
            }
        }
    }

    /// Converts a stored log-counter value to its expected-count estimate.
    fn expected_count(&self, raw: u64) -> f64 {
        if raw <= self.params.num_reserved as u64 {
            return raw as f64;
        }
        let v = (raw - self.params.num_reserved as u64) as f64;
        self.params.num_reserved as f64 + (self.base.powf(v) - 1.0) / (self.base - 1.0)
    }

    /// Inverse of [`Self::expected_count`], clamped to the counter's range.
    fn to_log_counter(&self, expected: f64) -> u64 {
        if expected <= self.params.num_reserved as f64 {
            return expected.round() as u64;
        }
        let delta = expected - self.params.num_reserved as f64;
        let v = self.params.num_reserved as f64 + (1.0 + delta * (self.base - 1.0)).ln() / self.base.ln();
        v.round().clamp(0.0, self.params.variant.max_raw() as f64) as u64
    }

    fn bump(&mut self, row: usize, col: usize) {
        let raw = self.raw_get(row, col);
        let updated = match self.params.variant {
            CmsVariant::Linear => raw.saturating_add(1).min(CmsVariant::Linear.max_raw()),
            CmsVariant::Log16 | CmsVariant::Log8 => {
                if raw < self.params.num_reserved as u64 {
                    raw + 1
                } else {
                    let shift = (raw - self.params.num_reserved as u64) as f64;
                    let p = self.base.powf(-shift);
                    if self.rng.r#gen::<f64>() < p {
                        (raw + 1).min(self.params.variant.max_raw())
                    } else {
                        raw
                    }
                }
            }
        };
        self.raw_set(row, col, updated);
    }

    /// Adds one occurrence of `key`.
    pub fn add(&mut self, key: &[u8]) {
        self.n_added_slice_mut()[0] += 1;
        for row in 0..self.params.depth {
            let col = self.row_col(key, row);
            self.bump(row, col);
        }
    }

    /// Adds every key in `keys`, in order.
    pub fn update<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        for key in keys {
            self.add(key.as_ref());
        }
    }

    /// Adds every contiguous `n`-byte window of `key` (or `key` itself if
    /// shorter than `n`).
    pub fn add_ngram(&mut self, key: &[u8], n: usize) -> Result<()> {
        if n == 0 {
            return Err(SketchError::InvalidParameter("ngram size must be positive"));
        }
        if key.len() <= n {
            self.add(key);
            return Ok(());
        }
        for window in key.windows(n) {
            self.add(window);
        }
        Ok(())
    }

    pub fn update_ngram<I, K>(&mut self, keys: I, n: usize) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        for key in keys {
            self.add_ngram(key.as_ref(), n)?;
        }
        Ok(())
    }

    /// Returns the estimated frequency of `key` — the row-wise minimum.
    pub fn query(&self, key: &[u8]) -> u64 {
        (0..self.params.depth)
            .map(|row| {
                let col = self.row_col(key, row);
                let raw = self.raw_get(row, col);
                match self.params.variant {
                    CmsVariant::Linear => raw,
                    CmsVariant::Log16 | CmsVariant::Log8 => self.expected_count(raw).round() as u64,
                }
            })
            .min()
            .unwrap_or(0)
    }

    /// Merges `other` into `self`, cell by cell.
    ///
    /// # Errors
    /// Returns [`SketchError::IncompatibleSketches`] if dimensions or variant differ.
    pub fn merge(&mut self, other: &Cms) -> Result<()> {
        if self.params.variant != other.params.variant
            || self.params.width != other.params.width
            || self.params.depth != other.params.depth
            || self.params.num_reserved != other.params.num_reserved
        {
            return Err(SketchError::IncompatibleSketches(
                "CMS merge requires identical variant, width, depth, and num_reserved",
            ));
        }

        for row in 0..self.params.depth {
            for col in 0..self.params.width {
                let a = self.raw_get(row, col);
                let b = other.raw_get(row, col);
                let merged = match self.params.variant {
                    CmsVariant::Linear => a.saturating_add(b).min(CmsVariant::Linear.max_raw()),
                    CmsVariant::Log16 | CmsVariant::Log8 => {
                        let reserved = self.params.num_reserved as u64;
                        if a <= reserved && b <= reserved {
                            (a + b).min(reserved)
                        } else {
                            let combined = self.expected_count(a) + self.expected_count(b);
                            self.to_log_counter(combined)
                        }
                    }
                };
                self.raw_set(row, col, merged);
            }
        }
        self.n_added_slice_mut()[0] += other.n_added();
        Ok(())
    }

    /// Writes a self-describing archive to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let params = vec![
            self.params.width as u64,
            self.params.depth as u64,
            self.params.max_count,
            self.params.num_reserved as u64,
        ];
        archive::save(
            path,
            self.params.variant.tag(),
            params,
            self.storage.as_bytes()[..self.layout.n_added_offset].to_vec(),
            Some([self.n_added(), self.n_records()]),
        )
    }

    /// Loads a sketch from an archive written by [`Self::save`].
    pub fn load(path: &Path, variant: CmsVariant) -> Result<Self> {
        let archive = archive::load(path, variant.tag())?;
        if archive.params.len() != 4 {
            return Err(SketchError::IncompatibleSketches("malformed CMS archive parameter vector"));
        }
        let params = CmsParams {
            variant,
            width: archive.params[0] as usize,
            depth: archive.params[1] as usize,
            max_count: archive.params[2],
            num_reserved: archive.params[3] as u32,
            shared_memory: false,
        };
        let mut cms = Cms::new(params)?;
        let counters_len = cms.layout.n_added_offset;
        if archive.payload.len() != counters_len {
            return Err(SketchError::IncompatibleSketches("archive payload length mismatch"));
        }
        cms.storage.as_bytes_mut()[..counters_len].copy_from_slice(&archive.payload);
        if let Some(n_added) = archive.n_added {
            cms.n_added_slice_mut().copy_from_slice(&n_added);
        }
        Ok(cms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{T_CRITICAL_99, one_sample_t_statistic};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn linear_merge_is_commutative(
            left_counts in prop::collection::vec(1_u32..20, 5..30),
            right_counts in prop::collection::vec(1_u32..20, 5..30),
        ) {
            let build = |counts: &[u32]| {
                let mut cms = Cms::new(CmsParams::linear(512, 6, false)).unwrap();
                for (i, &n) in counts.iter().enumerate() {
                    let key = (i as u32).to_le_bytes();
                    for _ in 0..n {
                        cms.add(&key);
                    }
                }
                cms
            };

            let mut a_then_b = build(&left_counts);
            let b = build(&right_counts);
            a_then_b.merge(&b).unwrap();

            let mut b_then_a = build(&right_counts);
            let a = build(&left_counts);
            b_then_a.merge(&a).unwrap();

            let n = left_counts.len().max(right_counts.len()) as u32;
            for i in 0..n {
                let key = i.to_le_bytes();
                prop_assert_eq!(a_then_b.query(&key), b_then_a.query(&key));
            }
        }

        // `merge` itself is cell-wise commutative for every counter encoding
        // (addition and min/max are all commutative); the log variants'
        // internal RNG is seeded solely from `width`, so rebuilding the same
        // insert sequence twice reproduces the same probabilistic bumps.
        #[test]
        fn log16_merge_is_commutative(
            left_counts in prop::collection::vec(1_u32..20, 5..30),
            right_counts in prop::collection::vec(1_u32..20, 5..30),
        ) {
            let build = |counts: &[u32]| {
                let mut cms = Cms::new(CmsParams::log16(512, 6, 64, false)).unwrap();
                for (i, &n) in counts.iter().enumerate() {
                    let key = (i as u32).to_le_bytes();
                    for _ in 0..n {
                        cms.add(&key);
                    }
                }
                cms
            };

            let mut a_then_b = build(&left_counts);
            let b = build(&right_counts);
            a_then_b.merge(&b).unwrap();

            let mut b_then_a = build(&right_counts);
            let a = build(&left_counts);
            b_then_a.merge(&a).unwrap();

            let n = left_counts.len().max(right_counts.len()) as u32;
            for i in 0..n {
                let key = i.to_le_bytes();
                prop_assert_eq!(a_then_b.query(&key), b_then_a.query(&key));
            }
        }

        #[test]
        fn log8_merge_is_commutative(
            left_counts in prop::collection::vec(1_u32..20, 5..30),
            right_counts in prop::collection::vec(1_u32..20, 5..30),
        ) {
            let build = |counts: &[u32]| {
                let mut cms = Cms::new(CmsParams::log8(512, 6, 10_000, 32, false)).unwrap();
                for (i, &n) in counts.iter().enumerate() {
                    let key = (i as u32).to_le_bytes();
                    for _ in 0..n {
                        cms.add(&key);
                    }
                }
                cms
            };

            let mut a_then_b = build(&left_counts);
            let b = build(&right_counts);
            a_then_b.merge(&b).unwrap();

            let mut b_then_a = build(&right_counts);
            let a = build(&left_counts);
            b_then_a.merge(&a).unwrap();

            let n = left_counts.len().max(right_counts.len()) as u32;
            for i in 0..n {
                let key = i.to_le_bytes();
                prop_assert_eq!(a_then_b.query(&key), b_then_a.query(&key));
            }
        }
    }

    #[test]
    fn linear_query_lower_bounds_true_count() {
        let mut cms = Cms::new(CmsParams::linear(1024, 8, false)).unwrap();
        for i in 0..1024_u32 {
            let key = i.to_le_bytes();
            for _ in 0..=i % 1024 {
                cms.add(&key);
            }
        }
        for i in 0..1024_u32 {
            let key = i.to_le_bytes();
            let true_count = (i % 1024 + 1) as u64;
            assert!(cms.query(&key) >= true_count);
        }
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let mut a = Cms::new(CmsParams::linear(256, 4, false)).unwrap();
        for _ in 0..10 {
            a.add(b"hello");
        }
        let before = a.query(b"hello");
        let empty = Cms::new(CmsParams::linear(256, 4, false)).unwrap();
        a.merge(&empty).unwrap();
        assert_eq!(a.query(b"hello"), before);
    }

    #[test]
    fn merge_rejects_mismatched_shape() {
        let mut a = Cms::new(CmsParams::linear(256, 4, false)).unwrap();
        let b = Cms::new(CmsParams::linear(128, 4, false)).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cms.bin");

        let mut cms = Cms::new(CmsParams::linear(512, 6, false)).unwrap();
        for _ in 0..42 {
            cms.add(b"roundtrip");
        }
        cms.save(&path).unwrap();

        let loaded = Cms::load(&path, CmsVariant::Linear).unwrap();
        assert_eq!(loaded.query(b"roundtrip"), cms.query(b"roundtrip"));
        assert_eq!(loaded.n_added(), cms.n_added());
    }

    #[test]
    fn log8_counter_stays_within_byte_range_under_heavy_load() {
        let mut cms = Cms::new(CmsParams::log8(64, 4, 1_000_000, 32, false)).unwrap();
        for _ in 0..50_000 {
            cms.add(b"hot-key");
        }
        // a byte counter can never exceed 255, regardless of insert volume.
        assert!(cms.query(b"hot-key") > 0);
    }

    /// Inserts `n_keys` keys up to each checkpoint and runs a one-sample
    /// t-test of `query - true_count` across all keys at that checkpoint.
    fn log8_checkpoint_t_test(n_keys: u32, checkpoints: &[u32]) {
        let max_checkpoint = *checkpoints.iter().max().unwrap();
        let mut cms = Cms::new(CmsParams::log8(n_keys as usize * 10, 4, max_checkpoint as u64, 32, false)).unwrap();
        let mut counts = vec![0_u64; n_keys as usize];
        let mut next = 0;
        for step in 1..=max_checkpoint {
            for k in 0..n_keys {
                let key = k.to_le_bytes();
                cms.add(&key);
                counts[k as usize] += 1;
            }
            if next < checkpoints.len() && step == checkpoints[next] {
                let residuals: Vec<f64> = (0..n_keys)
                    .map(|k| {
                        let key = k.to_le_bytes();
                        cms.query(&key) as f64 - counts[k as usize] as f64
                    })
                    .collect();
                let t = one_sample_t_statistic(&residuals);
                assert!(t.abs() < T_CRITICAL_99, "checkpoint step={step} t={t}");
                next += 1;
            }
        }
    }

    #[test]
    fn log8_update_error_fails_to_reject_the_null_at_checkpoints_scaled() {
        log8_checkpoint_t_test(50, &[2, 50, 200]);
    }

    #[test]
    #[ignore = "full-scale scenario test per SPEC_FULL.md §8.2; run explicitly with `cargo test -- --ignored`"]
    fn log8_update_error_fails_to_reject_the_null_at_checkpoints_full_scale() {
        log8_checkpoint_t_test(500, &[15, 5_000, 100_000]);
    }

    #[test]
    fn log16_merge_error_fails_to_reject_the_null() {
        let n_keys = 100_u32;
        let mut a = Cms::new(CmsParams::log16(4096, 6, 64, false)).unwrap();
        let mut b = Cms::new(CmsParams::log16(4096, 6, 64, false)).unwrap();
        for k in 0..n_keys {
            let key = k.to_le_bytes();
            for _ in 0..5_000 {
                a.add(&key);
            }
            for _ in 0..300 {
                b.add(&key);
            }
        }
        a.merge(&b).unwrap();

        let residuals: Vec<f64> = (0..n_keys)
            .map(|k| {
                let key = k.to_le_bytes();
                a.query(&key) as f64 - 5_300.0
            })
            .collect();
        let t = one_sample_t_statistic(&residuals);
        assert!(t.abs() < T_CRITICAL_99, "t={t}");
    }

    #[test]
    fn add_ngram_windows_short_keys_as_a_single_add() {
        let mut cms = Cms::new(CmsParams::linear(256, 4, false)).unwrap();
        cms.add_ngram(b"ab", 4).unwrap();
        assert_eq!(cms.query(b"ab"), 1);
    }

    #[test]
    fn add_ngram_windows_long_keys_into_overlapping_grams() {
        let mut cms = Cms::new(CmsParams::linear(256, 4, false)).unwrap();
        cms.add_ngram(b"abccompanyxyz", 3).unwrap();
        assert!(cms.query(b"abc") >= 1);
        assert!(cms.query(b"xyz") >= 1);
    }

    #[test]
    fn add_ngram_rejects_zero_size() {
        let mut cms = Cms::new(CmsParams::linear(256, 4, false)).unwrap();
        assert!(cms.add_ngram(b"nonempty", 0).is_err());
    }

    #[test]
    fn invalid_dimensions_are_rejected() {
        assert!(Cms::new(CmsParams::linear(0, 4, false)).is_err());
        assert!(Cms::new(CmsParams::linear(256, 0, false)).is_err());
        assert!(Cms::new(CmsParams::log8(256, 4, 10, 200, false)).is_err());
    }

    #[test]
    fn shared_memory_cms_can_be_attached_by_name() {
        let params = CmsParams::linear(128, 4, true);
        let mut owner = Cms::new(params).unwrap();
        owner.add(b"shared-key");
        let name = match &owner.storage {
            Storage::Shared(slab) => slab.name().clone(),
            Storage::Private(_) => unreachable!(),
        };

        let attached = Cms::attach(params, &name).unwrap();
        assert_eq!(attached.query(b"shared-key"), owner.query(b"shared-key"));
    }
}
