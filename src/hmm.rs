//! Compact log-space pair-HMM for read-versus-template likelihoods.
//!
//! One [`PairHmm`] is built per read from its QV feature tracks and scores the
//! read against any template slice with full forward (alpha) and backward
//! (beta) recursions. Rows are pruned at a fixed log-likelihood width below
//! the row maximum; the surviving fraction of cells is reported as the
//! populated ratio of each matrix, and disagreement between the alpha- and
//! beta-derived totals is surfaced so callers can count flip-flops.

use std::f64::consts::LN_10;

use crate::dna::allele_set;
use crate::read::MappedRead;

/// ln(1/4), the emission of a spurious inserted base.
const LN_QUARTER: f64 = -1.386_294_361_119_890_6;

/// Ceiling on per-base indel probabilities so the match transition keeps
/// positive mass even for QV-0 tracks.
const MAX_INDEL_PROB: f64 = 0.4;

/// Floor on per-base error probabilities.
const MIN_ERROR_PROB: f64 = 1e-10;

/// Ceiling on the per-base substitution probability.
const MAX_SUB_PROB: f64 = 0.75;

/// Converts a Phred QV to an error probability: `10^(-qv/10)`.
#[inline]
#[must_use]
pub fn phred_to_error_prob(qv: u8) -> f64 {
    (-f64::from(qv) * LN_10 / 10.0).exp()
}

/// Computes log(a + b) given log(a) and log(b).
#[inline]
fn ln_sum(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Per-read-base transition and emission parameters.
#[derive(Debug, Clone)]
struct BaseParams {
    /// ln P(match transition)
    ln_match: f64,
    /// ln P(insertion transition) + ln(1/4) emission
    ln_ins: f64,
    /// ln P(deletion transition)
    ln_del: f64,
    /// Probability the base call is a miscall
    p_sub: f64,
}

impl BaseParams {
    fn new(ins_qv: u8, del_qv: u8, sub_qv: u8) -> Self {
        let p_ins = phred_to_error_prob(ins_qv).clamp(MIN_ERROR_PROB, MAX_INDEL_PROB);
        let p_del = phred_to_error_prob(del_qv).clamp(MIN_ERROR_PROB, MAX_INDEL_PROB);
        let p_sub = phred_to_error_prob(sub_qv).clamp(MIN_ERROR_PROB, MAX_SUB_PROB);
        BaseParams {
            ln_match: (1.0 - p_ins - p_del).ln(),
            ln_ins: p_ins.ln() + LN_QUARTER,
            ln_del: p_del.ln(),
            p_sub,
        }
    }
}

/// Dense row-major log-probability matrix, initialized to ln(0).
struct Matrix {
    values: Vec<f64>,
    cols: usize,
}

impl Matrix {
    fn new(rows: usize, cols: usize) -> Self {
        Matrix { values: vec![f64::NEG_INFINITY; rows * cols], cols }
    }

    #[inline]
    fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.cols + j]
    }

    #[inline]
    fn set(&mut self, i: usize, j: usize, v: f64) {
        self.values[i * self.cols + j] = v;
    }

    /// Drops row cells more than `width` below the row maximum.
    fn prune_row(&mut self, i: usize, width: f64) {
        let row = &mut self.values[i * self.cols..(i + 1) * self.cols];
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max == f64::NEG_INFINITY {
            return;
        }
        for v in row {
            if *v < max - width {
                *v = f64::NEG_INFINITY;
            }
        }
    }

    /// Fraction of cells holding finite values.
    fn populated_ratio(&self) -> f64 {
        let populated = self.values.iter().filter(|v| v.is_finite()).count();
        populated as f64 / self.values.len() as f64
    }
}

/// Result of scoring one read against one template slice.
#[derive(Debug, Clone)]
pub struct HmmSummary {
    /// Log-likelihood of the read given the template
    pub ll: f64,
    /// Fraction of finite cells in the forward matrix
    pub alpha_populated: f64,
    /// Fraction of finite cells in the backward matrix
    pub beta_populated: f64,
    /// Absolute disagreement between the forward and backward totals
    pub discrepancy: f64,
}

/// A pair-HMM specialized to one read.
#[derive(Debug, Clone)]
pub struct PairHmm {
    seq: Vec<u8>,
    params: Vec<BaseParams>,
    prune: f64,
}

impl PairHmm {
    /// Builds the model from a read's QV tracks.
    ///
    /// `prune` is the log-likelihood width kept per matrix row; cells further
    /// below the row maximum are dropped.
    ///
    /// # Panics
    ///
    /// Panics if `prune` is not positive or the read is empty; callers
    /// validate reads before construction.
    #[must_use]
    pub fn new(read: &MappedRead, prune: f64) -> Self {
        assert!(prune > 0.0, "pruning width must be positive");
        assert!(!read.seq.is_empty(), "cannot model an empty read");
        let params = (0..read.seq.len())
            .map(|i| BaseParams::new(read.ins_qv[i], read.del_qv[i], read.sub_qv[i]))
            .collect();
        PairHmm { seq: read.seq.clone(), params, prune }
    }

    /// ln P(read base `i` | template base `t`), marginalized over the
    /// template base's allele set.
    fn ln_emission(&self, i: usize, t: u8) -> f64 {
        let p = self.params[i].p_sub;
        let alleles = allele_set(t);
        if alleles.is_empty() {
            return (p / 3.0).ln();
        }
        let k = alleles.len() as f64;
        let matches = if alleles.contains(&self.seq[i]) { 1.0 } else { 0.0 };
        ((matches * (1.0 - p) + (k - matches) * (p / 3.0)) / k).ln()
    }

    /// Scores the read against a template slice.
    #[must_use]
    pub fn evaluate(&self, tpl: &[u8]) -> HmmSummary {
        let m = self.seq.len();
        let n = tpl.len();

        let mut alpha = Matrix::new(m + 1, n + 1);
        alpha.set(0, 0, 0.0);
        for j in 1..=n {
            alpha.set(0, j, alpha.get(0, j - 1) + self.params[0].ln_del);
        }
        alpha.prune_row(0, self.prune);
        for i in 1..=m {
            let consumed = &self.params[i - 1];
            let ln_del = self.params[i.min(m - 1)].ln_del;
            for j in 0..=n {
                let mut v = alpha.get(i - 1, j) + consumed.ln_ins;
                if j > 0 {
                    let diag = alpha.get(i - 1, j - 1)
                        + consumed.ln_match
                        + self.ln_emission(i - 1, tpl[j - 1]);
                    v = ln_sum(v, diag);
                    v = ln_sum(v, alpha.get(i, j - 1) + ln_del);
                }
                alpha.set(i, j, v);
            }
            alpha.prune_row(i, self.prune);
        }

        let mut beta = Matrix::new(m + 1, n + 1);
        beta.set(m, n, 0.0);
        for j in (0..n).rev() {
            beta.set(m, j, beta.get(m, j + 1) + self.params[m - 1].ln_del);
        }
        beta.prune_row(m, self.prune);
        for i in (0..m).rev() {
            let consumed = &self.params[i];
            let ln_del = self.params[i].ln_del;
            for j in (0..=n).rev() {
                let mut v = beta.get(i + 1, j) + consumed.ln_ins;
                if j < n {
                    let diag = beta.get(i + 1, j + 1)
                        + consumed.ln_match
                        + self.ln_emission(i, tpl[j]);
                    v = ln_sum(v, diag);
                    v = ln_sum(v, beta.get(i, j + 1) + ln_del);
                }
                beta.set(i, j, v);
            }
            beta.prune_row(i, self.prune);
        }

        let ll = alpha.get(m, n);
        let beta_ll = beta.get(0, 0);
        let discrepancy = if ll == beta_ll { 0.0 } else { (ll - beta_ll).abs() };
        HmmSummary {
            ll,
            alpha_populated: alpha.populated_ratio(),
            beta_populated: beta.populated_ratio(),
            discrepancy,
        }
    }

    /// Mean and variance of the log-likelihood under the read's own per-base
    /// error model, for z-score diagnostics.
    ///
    /// Each base contributes a two-point distribution: a correct call with
    /// probability `1 - p_sub`, a miscall otherwise.
    #[must_use]
    pub fn normal_parameters(&self) -> (f64, f64) {
        let mut mean = 0.0;
        let mut var = 0.0;
        for p in &self.params {
            let ok = 1.0 - p.p_sub;
            let correct = p.ln_match + ok.ln();
            let miscall = p.ln_match + (p.p_sub / 3.0).ln();
            mean += ok * correct + p.p_sub * miscall;
            var += ok * p.p_sub * (correct - miscall) * (correct - miscall);
        }
        (mean, var)
    }
}
