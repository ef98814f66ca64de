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
//! Shared statistical test helpers, used by the scenario tests in `cms` and
//! `hll` to check that an estimator's error is centered on zero rather than
//! just "close enough" under a fixed tolerance.

/// Two-tailed critical value for a 99% confidence one-sample t-test at the
/// sample sizes this crate's scenario tests use (df large enough that the
/// t-distribution's critical value has converged to the normal's).
pub(crate) const T_CRITICAL_99: f64 = 2.576;

/// One-sample t-statistic of `residuals` against a null mean of zero.
///
/// `residuals` is typically `estimate - true_value` across many independent
/// trials or keys. A `|t|` below [`T_CRITICAL_99`] fails to reject the null
/// hypothesis that the estimator is unbiased.
pub(crate) fn one_sample_t_statistic(residuals: &[f64]) -> f64 {
    let n = residuals.len() as f64;
    let mean = residuals.iter().sum::<f64>() / n;
    let variance = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_error = (variance / n).sqrt();
    if std_error == 0.0 {
        if mean == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        mean / std_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_residuals_never_reject_the_null() {
        let residuals = vec![0.0; 50];
        assert_eq!(one_sample_t_statistic(&residuals), 0.0);
    }

    #[test]
    fn a_clear_systematic_bias_rejects_the_null() {
        let residuals: Vec<f64> = (0..50).map(|_| 10.0).collect();
        assert!(one_sample_t_statistic(&residuals).abs() > T_CRITICAL_99);
    }

    #[test]
    fn symmetric_noise_around_zero_fails_to_reject() {
        let mut residuals = Vec::new();
        for i in 0..100 {
            residuals.push(if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        assert!(one_sample_t_statistic(&residuals).abs() < T_CRITICAL_99);
    }
}
