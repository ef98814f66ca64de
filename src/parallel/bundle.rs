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
//! Result type and tunables for [`super::parallel_add`].

use crate::cms::CmsParams;
use crate::error::{Result, SketchError};
use crate::hh::HhParams;
use crate::hll::HllParams;
use crate::{Cms, HeavyHitters, HyperLogLog};

/// The sketches `parallel_add` built, in its fixed lexicographic order.
///
/// Each field is populated iff the corresponding `*_args` was set on
/// [`ParallelAddConfig`].
#[derive(Default)]
pub struct SketchBundle {
    pub cms: Option<Cms>,
    pub hh: Option<HeavyHitters>,
    pub hll: Option<HyperLogLog>,
}

/// Tunables for [`super::parallel_add`].
///
/// `n_workers` defaults to the configured [`super::ParallelismProbe`]; at
/// least one of `cms_args`/`hh_args`/`hll_args` should be set or the call
/// does no useful work.
#[derive(Default, Clone, Copy)]
pub struct ParallelAddConfig {
    pub(crate) n_workers: Option<usize>,
    pub(crate) ngram: Option<usize>,
    pub(crate) cms_args: Option<CmsParams>,
    pub(crate) hh_args: Option<HhParams>,
    pub(crate) hll_args: Option<HllParams>,
}

impl ParallelAddConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_workers(mut self, n_workers: usize) -> Self {
        self.n_workers = Some(n_workers);
        self
    }

    /// Splits every key into overlapping `n`-byte windows before applying
    /// it to CMS/HH (HLL always sees whole keys).
    pub fn with_ngram(mut self, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(SketchError::InvalidParameter("ngram size must be positive"));
        }
        self.ngram = Some(n);
        Ok(self)
    }

    pub fn with_cms(mut self, params: CmsParams) -> Self {
        self.cms_args = Some(params);
        self
    }

    pub fn with_hh(mut self, params: HhParams) -> Self {
        self.hh_args = Some(params);
        self
    }

    pub fn with_hll(mut self, params: HllParams) -> Self {
        self.hll_args = Some(params);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::CmsVariant;

    #[test]
    fn builder_sets_only_requested_fields() {
        let config = ParallelAddConfig::new()
            .with_n_workers(4)
            .with_cms(CmsParams::linear(1024, 8, false));

        assert_eq!(config.n_workers, Some(4));
        assert!(matches!(config.cms_args, Some(p) if p.variant == CmsVariant::Linear));
        assert!(config.hh_args.is_none());
        assert!(config.hll_args.is_none());
    }

    #[test]
    fn with_ngram_rejects_zero() {
        assert!(ParallelAddConfig::new().with_ngram(0).is_err());
    }

    #[test]
    fn with_ngram_accepts_positive_size() {
        let config = ParallelAddConfig::new().with_ngram(3).unwrap();
        assert_eq!(config.ngram, Some(3));
    }
}
