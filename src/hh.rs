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
//! Topkapi heavy-hitter sketch.
//!
//! A `depth x width` grid of leader-election buckets: each bucket holds at
//! most one candidate key and a saturating count. `add` either strengthens
//! the resident candidate, installs a new one into an empty bucket, or
//! weakens the resident (classic majority/Misra-Gries-style eviction,
//! applied independently per hashed bucket).

use std::path::Path;

use crate::error::{Result, SketchError};
use crate::slab::{Slab, SlabName, pad_to, typed_slice, typed_slice_mut};
use crate::{archive, hash};

/// Construction parameters for [`HeavyHitters::new`].
#[derive(Debug, Clone, Copy)]
pub struct HhParams {
    pub width: usize,
    pub depth: usize,
    pub max_key_len: u8,
    /// Default threshold consulted by [`HeavyHitters::top_hitters`].
    pub default_threshold: u64,
    pub shared_memory: bool,
}

impl HhParams {
    pub fn new(width: usize, depth: usize, max_key_len: u8, default_threshold: u64, shared_memory: bool) -> Self {
        HhParams { width, depth, max_key_len, default_threshold, shared_memory }
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.depth == 0 {
            return Err(SketchError::InvalidParameter("width and depth must be positive"));
        }
        if self.max_key_len == 0 {
            return Err(SketchError::InvalidParameter("max_key_len must be positive"));
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

struct Layout {
    keys_offset: usize,
    key_lens_offset: usize,
    counts_offset: usize,
    n_added_offset: usize,
    total_len: usize,
}

fn layout_for(depth: usize, width: usize, max_key_len: usize) -> Layout {
    let cells = depth * width;
    let keys_offset = 0;
    let keys_len = cells * max_key_len;
    let key_lens_offset = keys_offset + keys_len;
    let key_lens_len = cells;
    let counts_offset = pad_to(key_lens_offset + key_lens_len, 4);
    let counts_len_bytes = cells * 4;
    let n_added_offset = pad_to(counts_offset + counts_len_bytes, 8);
    Layout {
        keys_offset,
        key_lens_offset,
        counts_offset,
        n_added_offset,
        total_len: n_added_offset + 16,
    }
}

/// A single surviving heavy-hitter candidate returned by a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hitter {
    pub key: Vec<u8>,
    pub estimate: u64,
}

struct Memo {
    n_added_snapshot: u64,
    threshold: u64,
    candidates: Vec<Hitter>,
}

/// Mergeable Topkapi heavy-hitter sketch.
///
/// # Example
/// ```rust
/// use sketchdrive::hh::{HeavyHitters, HhParams};
///
/// let mut hh = HeavyHitters::new(HhParams::new(256, 6, 32, 0, false)).unwrap();
/// for _ in 0..1000 {
///     hh.add(b"popular");
/// }
/// hh.add(b"rare");
///
/// let top = hh.query(1, 10);
/// assert_eq!(top[0].key, b"popular");
/// ```
pub struct HeavyHitters {
    params: HhParams,
    layout: Layout,
    storage: Storage,
    memo: Option<Memo>,
}

impl HeavyHitters {
    pub fn new(params: HhParams) -> Result<Self> {
        params.validate()?;
        let layout = layout_for(params.depth, params.width, params.max_key_len as usize);
        let storage = if params.shared_memory {
            let name = SlabName::generate("hh");
            Storage::Shared(Slab::create(name, layout.total_len)?)
        } else {
            Storage::Private(vec![0_u8; layout.total_len].into_boxed_slice())
        };
        tracing::debug!(width = params.width, depth = params.depth, "heavy hitters sketch created");
        Ok(HeavyHitters { params, layout, storage, memo: None })
    }

    pub fn attach(params: HhParams, name: &SlabName) -> Result<Self> {
        params.validate()?;
        let layout = layout_for(params.depth, params.width, params.max_key_len as usize);
        let slab = Slab::attach(name)?;
        if slab.len() != layout.total_len {
            return Err(SketchError::IncompatibleSketches(
                "attached slab length does not match these HH parameters",
            ));
        }
        Ok(HeavyHitters { params, layout, storage: Storage::Shared(slab), memo: None })
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

    fn truncate<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        let max = self.params.max_key_len as usize;
        if key.len() > max { &key[..max] } else { key }
    }

    fn cell_index(&self, row: usize, col: usize) -> usize {
        row * self.params.width + col
    }

    fn key_slot(&self, row: usize, col: usize) -> &[u8] {
        let idx = self.cell_index(row, col);
        let max_key_len = self.params.max_key_len as usize;
        let start = self.layout.keys_offset + idx * max_key_len;
        &self.storage.as_bytes()[start..start + max_key_len]
    }

    fn key_len_at(&self, row: usize, col: usize) -> u8 {
        let idx = self.cell_index(row, col);
        self.storage.as_bytes()[self.layout.key_lens_offset + idx]
    }

    fn count_at(&self, row: usize, col: usize) -> u32 {
        let idx = self.cell_index(row, col);
        unsafe { typed_slice::<u32>(self.storage.as_bytes(), self.layout.counts_offset + idx * 4, 1)[0] }
    }

    fn set_count(&mut self, row: usize, col: usize, value: u32) {
        let idx = self.cell_index(row, col);
        let offset = self.layout.counts_offset + idx * 4;
        unsafe { typed_slice_mut::<u32>(self.storage.as_bytes_mut(), offset, 1)[0] = value };
    }

    fn install(&mut self, row: usize, col: usize, key: &[u8], count: u32) {
        let idx = self.cell_index(row, col);
        let max_key_len = self.params.max_key_len as usize;
        let start = self.layout.keys_offset + idx * max_key_len;
        let slot = &mut self.storage.as_bytes_mut()[start..start + max_key_len];
        slot.fill(0);
        slot[..key.len()].copy_from_slice(key);
        self.storage.as_bytes_mut()[self.layout.key_lens_offset + idx] = key.len() as u8;
        self.set_count(row, col, count);
    }

    fn matches(&self, row: usize, col: usize, key: &[u8]) -> bool {
        let len = self.key_len_at(row, col) as usize;
        len == key.len() && &self.key_slot(row, col)[..len] == key
    }

    fn n_added_slice(&self) -> &[u64] {
        unsafe { typed_slice(self.storage.as_bytes(), self.layout.n_added_offset, 2) }
    }

    fn n_added_slice_mut(&mut self) -> &mut [u64] {
        let offset = self.layout.n_added_offset;
        unsafe { typed_slice_mut(self.storage.as_bytes_mut(), offset, 2) }
    }

    pub fn n_added(&self) -> u64 {
        self.n_added_slice()[0]
    }

    pub fn n_records(&self) -> u64 {
        self.n_added_slice()[1]
    }

    pub(crate) fn set_n_records(&mut self, value: u64) {
        self.n_added_slice_mut()[1] = value;
    }

    /// Adds one occurrence of `key`.
    pub fn add(&mut self, key: &[u8]) {
        self.n_added_slice_mut()[0] += 1;
        let max_key_len = self.params.max_key_len as usize;
        let owned;
        let truncated: &[u8] = if key.len() > max_key_len {
            owned = key[..max_key_len].to_vec();
            &owned
        } else {
            key
        };

        for row in 0..self.params.depth {
            let col = hash::row_bucket(truncated, row as u64, self.params.width);
            if self.matches(row, col, truncated) {
                let count = self.count_at(row, col);
                self.set_count(row, col, count.saturating_add(1));
            } else if self.count_at(row, col) == 0 {
                self.install(row, col, truncated, 1);
            } else {
                let count = self.count_at(row, col);
                self.set_count(row, col, count.saturating_sub(1));
            }
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

    /// Point lookup mirroring the original source's `__getitem__`: does not
    /// touch the memoized candidate set used by [`Self::query`].
    pub fn estimate(&self, key: &[u8]) -> u64 {
        let max_key_len = self.params.max_key_len as usize;
        let truncated = if key.len() > max_key_len { &key[..max_key_len] } else { key };

        let mut best = 0_u64;
        for row in 0..self.params.depth {
            let col = hash::row_bucket(truncated, row as u64, self.params.width);
            if self.matches(row, col, truncated) {
                best = best.max(self.count_at(row, col) as u64);
            }
        }
        best
    }

    /// Returns the top-`k` keys whose estimated count exceeds `threshold`,
    /// descending by estimate, ties broken by lexicographic key order.
    ///
    /// The candidate set (all row-0 residents and their estimates) is
    /// memoized and only recomputed when `n_added` or `threshold` has
    /// changed since the last call.
    pub fn query(&mut self, k: usize, threshold: u64) -> Vec<Hitter> {
        let n_added = self.n_added();
        let needs_refresh = match &self.memo {
            Some(memo) => memo.n_added_snapshot != n_added || memo.threshold != threshold,
            None => true,
        };
        if needs_refresh {
            let candidates = self.compute_candidates(threshold);
            self.memo = Some(Memo { n_added_snapshot: n_added, threshold, candidates });
        }
        self.memo.as_ref().unwrap().candidates.iter().take(k).cloned().collect()
    }

    /// Convenience query using the sketch's configured default threshold.
    pub fn top_hitters(&mut self, k: usize) -> Vec<Hitter> {
        let threshold = self.params.default_threshold;
        self.query(k, threshold)
    }

    fn compute_candidates(&self, threshold: u64) -> Vec<Hitter> {
        let mut candidates = Vec::new();
        for col in 0..self.params.width {
            let count0 = self.count_at(0, col);
            if count0 == 0 {
                continue;
            }
            let len0 = self.key_len_at(0, col) as usize;
            let key = self.key_slot(0, col)[..len0].to_vec();

            let mut estimate = 0_u64;
            let mut found = false;
            for row in 0..self.params.depth {
                let col_r = hash::row_bucket(&key, row as u64, self.params.width);
                if self.matches(row, col_r, &key) {
                    estimate = estimate.max(self.count_at(row, col_r) as u64);
                    found = true;
                }
            }
            if !found || estimate <= threshold {
                continue;
            }
            candidates.push(Hitter { key, estimate });
        }
        candidates.sort_by(|a, b| b.estimate.cmp(&a.estimate).then_with(|| a.key.cmp(&b.key)));
        candidates
    }

    /// Merges `other` into `self`, cell by cell.
    ///
    /// # Errors
    /// Returns [`SketchError::IncompatibleSketches`] if dimensions differ.
    pub fn merge(&mut self, other: &HeavyHitters) -> Result<()> {
        if self.params.width != other.params.width
            || self.params.depth != other.params.depth
            || self.params.max_key_len != other.params.max_key_len
        {
            return Err(SketchError::IncompatibleSketches(
                "HH merge requires identical width, depth, and max_key_len",
            ));
        }

        for row in 0..self.params.depth {
            for col in 0..self.params.width {
                let a_count = self.count_at(row, col);
                let b_count = other.count_at(row, col);
                let a_len = self.key_len_at(row, col) as usize;
                let b_len = other.key_len_at(row, col) as usize;
                let a_key = self.key_slot(row, col)[..a_len].to_vec();
                let b_key = other.key_slot(row, col)[..b_len].to_vec();

                if a_count == 0 && b_count == 0 {
                    continue;
                }
                let same_key = a_len == b_len && a_key == b_key;
                if same_key {
                    self.set_count(row, col, a_count.saturating_add(b_count));
                } else if a_count >= b_count {
                    self.set_count(row, col, a_count - b_count);
                } else {
                    self.install(row, col, &b_key, b_count - a_count);
                }
            }
        }
        self.n_added_slice_mut()[0] += other.n_added();
        self.memo = None;
        Ok(())
    }

    /// Writes a self-describing archive to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let params = vec![
            self.params.width as u64,
            self.params.depth as u64,
            self.params.max_key_len as u64,
            self.params.default_threshold,
        ];
        archive::save(
            path,
            "hh",
            params,
            self.storage.as_bytes()[..self.layout.n_added_offset].to_vec(),
            Some([self.n_added(), self.n_records()]),
        )
    }

    /// Loads a sketch from an archive written by [`Self::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let archive = archive::load(path, "hh")?;
        if archive.params.len() != 4 {
            return Err(SketchError::IncompatibleSketches("malformed HH archive parameter vector"));
        }
        let params = HhParams {
            width: archive.params[0] as usize,
            depth: archive.params[1] as usize,
            max_key_len: archive.params[2] as u8,
            default_threshold: archive.params[3],
            shared_memory: false,
        };
        let mut hh = HeavyHitters::new(params)?;
        let body_len = hh.layout.n_added_offset;
        if archive.payload.len() != body_len {
            return Err(SketchError::IncompatibleSketches("archive payload length mismatch"));
        }
        hh.storage.as_bytes_mut()[..body_len].copy_from_slice(&archive.payload);
        if let Some(n_added) = archive.n_added {
            hh.n_added_slice_mut().copy_from_slice(&n_added);
        }
        Ok(hh)
    }
}
