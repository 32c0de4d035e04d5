//! Per-base quality values for a polished template.
//!
//! Each position's QV is derived from the score deltas of the one-site
//! candidate edits at that position: alternatives that barely lose to the
//! current base drag the quality down, alternatives that lose badly leave it
//! high. Sums are partitioned by edit kind so deletion, insertion, and
//! substitution confidence can be reported separately.

use serde::Serialize;

use crate::errors::{PolishError, Result};
use crate::evaluator::Evaluate;
use crate::integrator::Integrator;
use crate::polish::mutations_in_window;

/// Per-base quality tracks for a polished template, each with one entry per
/// template position. The trailing insertion position gets no QV.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityValues {
    /// Overall per-base QV
    pub qualities: Vec<u32>,
    /// Deletion-specific QV
    pub deletion_qvs: Vec<u32>,
    /// Insertion-specific QV
    pub insertion_qvs: Vec<u32>,
    /// Substitution-specific QV
    pub substitution_qvs: Vec<u32>,
}

/// Phred-scales an error probability: `round(-10 * log10(p))`, clamped below
/// at 0. A probability of exactly zero is nudged to the smallest positive
/// double rather than producing infinity.
///
/// # Errors
///
/// Fails with [`PolishError::InvalidParameter`] when `probability` is outside
/// `[0, 1]`.
///
/// # Examples
///
/// ```
/// use fgpolish::quality::probability_to_qv;
///
/// assert_eq!(probability_to_qv(1.0).unwrap(), 0);
/// assert_eq!(probability_to_qv(0.01).unwrap(), 20);
/// assert!(probability_to_qv(1.5).is_err());
/// ```
pub fn probability_to_qv(probability: f64) -> Result<u32> {
    if !(0.0..=1.0).contains(&probability) {
        return Err(PolishError::InvalidParameter {
            parameter: "probability".to_string(),
            reason: format!("{probability} is not in [0, 1]"),
        });
    }
    let p = if probability == 0.0 { f64::MIN_POSITIVE } else { probability };
    Ok((-10.0 * p.log10()).round().max(0.0) as u32)
}

/// Converts an accumulated sum of exponentiated score deltas to a QV via the
/// error probability `1 - 1 / (1 + sum)`.
fn score_sum_to_qv(score_sum: f64) -> Result<u32> {
    probability_to_qv(1.0 - 1.0 / (1.0 + score_sum))
}

/// Per-base overall quality values for the current template.
///
/// Individual candidate scoring failures are logged and skipped: the
/// position's QV then reflects only the scorable alternatives.
///
/// # Errors
///
/// Fails only on QV conversion of an out-of-range probability, which a
/// finite score sum cannot produce.
pub fn consensus_qualities<E: Evaluate>(ai: &mut Integrator<E>) -> Result<Vec<u32>> {
    let len = ai.template_length();
    let mut quals = Vec::with_capacity(len);
    let baseline = ai.ll();
    for i in 0..len {
        let mut candidates = Vec::new();
        mutations_in_window(ai.template(), i, i + 1, false, &mut candidates);
        let mut score_sum = 0.0;
        for m in &candidates {
            // Trailing insertions start beyond the current site.
            if m.start() > i {
                continue;
            }
            let ll = match ai.ll_with_mutation(m) {
                Ok(ll) => ll,
                Err(err) => {
                    log::error!("in consensus_qualities: {err}");
                    continue;
                }
            };
            let score = ll - baseline;
            if score < 0.0 {
                score_sum += score.exp();
            }
        }
        quals.push(score_sum_to_qv(score_sum)?);
    }
    Ok(quals)
}

/// Per-base quality values partitioned by edit kind for the current
/// template.
///
/// Individual candidate scoring failures are logged and skipped, as in
/// [`consensus_qualities`].
///
/// # Errors
///
/// Fails only on QV conversion of an out-of-range probability, which a
/// finite score sum cannot produce.
pub fn consensus_qvs<E: Evaluate>(ai: &mut Integrator<E>) -> Result<QualityValues> {
    let len = ai.template_length();
    let mut qvs = QualityValues {
        qualities: Vec::with_capacity(len),
        deletion_qvs: Vec::with_capacity(len),
        insertion_qvs: Vec::with_capacity(len),
        substitution_qvs: Vec::with_capacity(len),
    };
    let baseline = ai.ll();
    for i in 0..len {
        let mut candidates = Vec::new();
        mutations_in_window(ai.template(), i, i + 1, false, &mut candidates);
        let mut overall_sum = 0.0;
        let mut deletion_sum = 0.0;
        let mut insertion_sum = 0.0;
        let mut substitution_sum = 0.0;
        for m in &candidates {
            // Trailing insertions start beyond the current site.
            if m.start() > i {
                continue;
            }
            let ll = match ai.ll_with_mutation(m) {
                Ok(ll) => ll,
                Err(err) => {
                    log::error!("in consensus_qvs: {err}");
                    continue;
                }
            };
            let score = ll - baseline;
            // An alternative at least as good as the current template should
            // not exist after polishing.
            if score >= 0.0 {
                continue;
            }
            let exp_score = score.exp();
            overall_sum += exp_score;
            if m.is_deletion() {
                deletion_sum += exp_score;
            } else if m.start() == m.end() {
                insertion_sum += exp_score;
            } else {
                substitution_sum += exp_score;
            }
        }
        qvs.qualities.push(score_sum_to_qv(overall_sum)?);
        qvs.deletion_qvs.push(score_sum_to_qv(deletion_sum)?);
        qvs.insertion_qvs.push(score_sum_to_qv(insertion_sum)?);
        qvs.substitution_qvs.push(score_sum_to_qv(substitution_sum)?);
    }
    Ok(qvs)
}
