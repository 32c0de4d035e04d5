//! Per-read evaluators: the scoring contract and the bundled implementation.
//!
//! An evaluator owns one read plus a strand-local view of the template and
//! answers log-likelihood queries for the current template and for
//! hypothetical mutations. The [`Evaluate`] trait is the narrow seam the
//! [`Integrator`](crate::integrator::Integrator) and the polishing driver are
//! written against; [`Evaluator`] is the bundled pair-HMM implementation.

use crate::errors::{PolishError, Result};
use crate::hmm::PairHmm;
use crate::mutation::{apply_mutations, Mutation};
use crate::read::{MappedRead, State, Strand};

/// Alpha/beta disagreement above this counts as a flip-flop.
const FLIP_FLOP_TOLERANCE: f64 = 1e-3;

/// The scoring contract one read exposes to the integrator.
///
/// Mutations arrive in strand-local coordinates; translating them into the
/// evaluator's mapped window is the evaluator's job. A failed
/// [`mutated_ll`](Evaluate::mutated_ll) call disables the evaluator for the
/// rest of polishing.
pub trait Evaluate {
    /// Name of the underlying read.
    fn read_name(&self) -> &str;

    /// Strand of the underlying read.
    fn strand(&self) -> Strand;

    /// Current lifecycle state.
    fn state(&self) -> State;

    /// True when the evaluator contributes to aggregate likelihoods.
    fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Transitions to a non-valid state; a no-op once already invalid.
    fn invalidate(&mut self, state: State);

    /// Log-likelihood of the read under the current template.
    fn ll(&self) -> f64;

    /// Log-likelihood under the hypothetical mutation.
    ///
    /// On failure the evaluator invalidates itself and returns
    /// [`PolishError::InvalidEvaluator`]; aggregate scores computed so far
    /// are stale and the caller must restart its pass.
    fn mutated_ll(&mut self, mutation: &Mutation) -> Result<f64>;

    /// Non-invalidating variant of [`mutated_ll`](Evaluate::mutated_ll):
    /// returns `None` where the other would fail, for read-only sweeps such
    /// as the best-mutation histogram.
    fn probe_ll(&self, mutation: &Mutation) -> Option<f64>;

    /// Commits a site-sorted batch of strand-local mutations to the local
    /// template view.
    fn apply_mutations(&mut self, muts: &[Mutation]);

    /// Disables scoring inside windows of `1 + 2 * radius` template bases
    /// whose empirical error rate exceeds `max_err_rate`.
    fn mask_intervals(&mut self, radius: usize, max_err_rate: f64);

    /// Standardized deviation of the current log-likelihood from the read's
    /// own error model.
    fn z_score(&self) -> f64;

    /// Mean and variance of the log-likelihood under the read's error model.
    fn normal_parameters(&self) -> (f64, f64);

    /// Number of alpha/beta disagreements observed so far.
    fn num_flip_flops(&self) -> usize;

    /// Fraction of finite cells in the forward matrix.
    fn alpha_populated_ratio(&self) -> f64;

    /// Fraction of finite cells in the backward matrix.
    fn beta_populated_ratio(&self) -> f64;
}

enum ScoreFailure {
    NonFinite,
    OutsideWindow,
    EmptyTemplate,
}

impl ScoreFailure {
    fn state(&self) -> State {
        match self {
            ScoreFailure::NonFinite | ScoreFailure::EmptyTemplate => State::Numerical,
            ScoreFailure::OutsideWindow => State::Disabled,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            ScoreFailure::NonFinite => "log-likelihood went non-finite",
            ScoreFailure::OutsideWindow => "log-likelihood moved outside the scoring window",
            ScoreFailure::EmptyTemplate => "mutation empties the template window",
        }
    }
}

/// Pair-HMM evaluator for one mapped read.
#[derive(Debug)]
pub struct Evaluator {
    read_name: String,
    strand: Strand,
    seq: Vec<u8>,
    hmm: PairHmm,
    /// Start of the mapped window in strand-local template coordinates
    window_start: usize,
    /// Template bases inside the window
    tpl: Vec<u8>,
    /// The window begins at the template start; edge insertions there grow
    /// the window instead of shifting it
    pinned_start: bool,
    /// The window ends at the template end; trailing insertions there grow
    /// the window
    pinned_end: bool,
    score_diff: f64,
    state: State,
    ll: f64,
    alpha_populated: f64,
    beta_populated: f64,
    flip_flops: usize,
    mean: f64,
    var: f64,
    /// Window-local intervals where scoring is disabled
    mask: Vec<(usize, usize)>,
    mask_params: Option<(usize, f64)>,
}

impl Evaluator {
    /// Builds an evaluator over a strand-local template window.
    ///
    /// `tpl` holds the bases of `[window_start, window_start + tpl.len())` in
    /// the strand-local full template of length `full_length`; windows
    /// touching either template end are pinned there, so edge insertions grow
    /// them. Evaluators whose z-score falls below `min_z_score` come back in
    /// [`State::PoorZScore`].
    #[must_use]
    pub fn new(
        read: &MappedRead,
        tpl: Vec<u8>,
        window_start: usize,
        full_length: usize,
        min_z_score: f64,
        score_diff: f64,
    ) -> Self {
        let hmm = PairHmm::new(read, score_diff);
        let (mean, var) = hmm.normal_parameters();
        let pinned_start = window_start == 0;
        let pinned_end = window_start + tpl.len() == full_length;
        let mut eval = Evaluator {
            read_name: read.name.clone(),
            strand: read.strand,
            seq: read.seq.clone(),
            hmm,
            window_start,
            tpl,
            pinned_start,
            pinned_end,
            score_diff,
            state: State::Valid,
            ll: f64::NEG_INFINITY,
            alpha_populated: 0.0,
            beta_populated: 0.0,
            flip_flops: 0,
            mean,
            var,
            mask: Vec::new(),
            mask_params: None,
        };
        eval.refresh();
        if eval.state.is_active() && eval.z_score() < min_z_score {
            eval.state = State::PoorZScore;
        }
        eval
    }

    /// The mapped window in strand-local template coordinates.
    #[must_use]
    pub fn window(&self) -> (usize, usize) {
        (self.window_start, self.window_start + self.tpl.len())
    }

    /// The template bases inside the mapped window.
    #[must_use]
    pub fn template(&self) -> &[u8] {
        &self.tpl
    }

    fn refresh(&mut self) {
        if self.tpl.is_empty() {
            self.ll = f64::NEG_INFINITY;
            self.invalidate_inner(State::Numerical);
            return;
        }
        let summary = self.hmm.evaluate(&self.tpl);
        self.alpha_populated = summary.alpha_populated;
        self.beta_populated = summary.beta_populated;
        if summary.discrepancy > FLIP_FLOP_TOLERANCE {
            self.flip_flops += 1;
        }
        self.ll = summary.ll;
        if !self.ll.is_finite() {
            self.invalidate_inner(State::Numerical);
        }
        if self.mask_params.is_some() {
            self.rebuild_mask();
        }
    }

    fn invalidate_inner(&mut self, state: State) {
        if self.state.is_active() {
            self.state = state;
        }
    }

    /// Scores a strand-local mutation against this read without touching any
    /// state. A mutation disjoint from (or masked inside) the window scores
    /// as the current log-likelihood.
    fn score_mutation(&self, mutation: &Mutation) -> std::result::Result<f64, ScoreFailure> {
        let Some(local) = mutation.translate(self.window_start, self.tpl.len()) else {
            return Ok(self.ll);
        };
        if self.is_masked(&local) {
            return Ok(self.ll);
        }
        let mut batch = [local];
        let mutated = apply_mutations(&self.tpl, &mut batch);
        if mutated.is_empty() {
            return Err(ScoreFailure::EmptyTemplate);
        }
        let summary = self.hmm.evaluate(&mutated);
        if !summary.ll.is_finite() {
            return Err(ScoreFailure::NonFinite);
        }
        if (summary.ll - self.ll).abs() > self.score_diff {
            return Err(ScoreFailure::OutsideWindow);
        }
        Ok(summary.ll)
    }

    fn is_masked(&self, local: &Mutation) -> bool {
        let touch = usize::from(local.is_insertion());
        self.mask.iter().any(|&(a, b)| local.start() < b && a < local.end() + touch)
    }

    fn rebuild_mask(&mut self) {
        let Some((radius, max_err_rate)) = self.mask_params else {
            return;
        };
        self.mask.clear();
        let n = self.tpl.len();
        if n == 0 {
            return;
        }
        let errors = alignment_errors(&self.seq, &self.tpl);
        for j in 0..n {
            let lo = j.saturating_sub(radius);
            let hi = (j + radius + 1).min(n);
            let total: u32 = errors[lo..hi].iter().sum();
            let rate = f64::from(total) / (hi - lo) as f64;
            if rate > max_err_rate {
                if self.mask.last().is_some_and(|&(_, end)| end == j) {
                    self.mask.last_mut().expect("nonempty mask").1 = j + 1;
                } else {
                    self.mask.push((j, j + 1));
                }
            }
        }
    }
}

impl Evaluate for Evaluator {
    fn read_name(&self) -> &str {
        &self.read_name
    }

    fn strand(&self) -> Strand {
        self.strand
    }

    fn state(&self) -> State {
        self.state
    }

    fn invalidate(&mut self, state: State) {
        self.invalidate_inner(state);
    }

    fn ll(&self) -> f64 {
        self.ll
    }

    fn mutated_ll(&mut self, mutation: &Mutation) -> Result<f64> {
        if !self.is_active() {
            return Err(PolishError::InvalidEvaluator {
                read_name: self.read_name.clone(),
                reason: "evaluator is not in a valid state".to_string(),
            });
        }
        match self.score_mutation(mutation) {
            Ok(ll) => Ok(ll),
            Err(failure) => {
                self.invalidate_inner(failure.state());
                Err(PolishError::InvalidEvaluator {
                    read_name: self.read_name.clone(),
                    reason: failure.reason().to_string(),
                })
            }
        }
    }

    fn probe_ll(&self, mutation: &Mutation) -> Option<f64> {
        if !self.is_active() {
            return None;
        }
        self.score_mutation(mutation).ok()
    }

    fn apply_mutations(&mut self, muts: &[Mutation]) {
        if !self.is_active() {
            return;
        }
        let s = self.window_start;
        let e = s + self.tpl.len();
        let mut shift: isize = 0;
        let mut local: Vec<Mutation> = Vec::new();
        for m in muts {
            if m.is_insertion() {
                // An insertion at the window edge lands before the window,
                // unless the window is pinned to that template end.
                let grows_pinned_start = self.pinned_start && m.start() == s;
                if m.start() <= s && !grows_pinned_start {
                    shift += m.length_diff();
                } else if m.start() < e || (self.pinned_end && m.start() == e) {
                    local.push(Mutation::insertion(m.start() - s, m.bases().to_vec()));
                }
                continue;
            }
            if m.end() <= s {
                shift += m.length_diff();
                continue;
            }
            if m.start() >= e {
                continue;
            }
            if m.is_deletion() && m.start() < s {
                // The part of a straddling deletion left of the window
                // removes bases ahead of it.
                shift -= (s - m.start()) as isize;
            }
            let ns = m.start().max(s);
            let ne = m.end().min(e);
            if ne > ns {
                local.push(match m {
                    Mutation::Deletion { .. } => Mutation::deletion(ns - s, ne - ns),
                    Mutation::Substitution { bases, .. } => {
                        let offset = ns - m.start();
                        Mutation::substitution(ns - s, bases[offset..offset + (ne - ns)].to_vec())
                    }
                    Mutation::Insertion { .. } => unreachable!("insertions handled above"),
                });
            }
        }
        self.tpl = apply_mutations(&self.tpl, &mut local);
        self.window_start = (s as isize + shift).max(0) as usize;
        self.refresh();
    }

    fn mask_intervals(&mut self, radius: usize, max_err_rate: f64) {
        self.mask_params = Some((radius, max_err_rate));
        self.rebuild_mask();
    }

    fn z_score(&self) -> f64 {
        if self.var <= 0.0 {
            return 0.0;
        }
        (self.ll - self.mean) / self.var.sqrt()
    }

    fn normal_parameters(&self) -> (f64, f64) {
        (self.mean, self.var)
    }

    fn num_flip_flops(&self) -> usize {
        self.flip_flops
    }

    fn alpha_populated_ratio(&self) -> f64 {
        self.alpha_populated
    }

    fn beta_populated_ratio(&self) -> f64 {
        self.beta_populated
    }
}

/// Attributes unit-cost alignment errors of `read` versus `tpl` to template
/// positions: mismatches and skipped template bases count at their own
/// position, surplus read bases against the next template position.
fn alignment_errors(read: &[u8], tpl: &[u8]) -> Vec<u32> {
    let m = read.len();
    let n = tpl.len();
    let cols = n + 1;
    let mut dist = vec![0u32; (m + 1) * cols];
    for (j, cell) in dist.iter_mut().enumerate().take(n + 1) {
        *cell = j as u32;
    }
    for i in 1..=m {
        dist[i * cols] = i as u32;
        for j in 1..=n {
            let sub_cost = u32::from(read[i - 1] != tpl[j - 1]);
            let diag = dist[(i - 1) * cols + j - 1] + sub_cost;
            let up = dist[(i - 1) * cols + j] + 1;
            let left = dist[i * cols + j - 1] + 1;
            dist[i * cols + j] = diag.min(up).min(left);
        }
    }

    let mut errors = vec![0u32; n];
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        let here = dist[i * cols + j];
        if i > 0 && j > 0 {
            let sub_cost = u32::from(read[i - 1] != tpl[j - 1]);
            if dist[(i - 1) * cols + j - 1] + sub_cost == here {
                if sub_cost > 0 {
                    errors[j - 1] += 1;
                }
                i -= 1;
                j -= 1;
                continue;
            }
        }
        if j > 0 && dist[i * cols + j - 1] + 1 == here {
            errors[j - 1] += 1;
            j -= 1;
            continue;
        }
        errors[j.min(n - 1)] += 1;
        i -= 1;
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(seq: &[u8], start: usize, end: usize) -> MappedRead {
        MappedRead::with_uniform_qvs("r", Strand::Forward, start, end, seq, 10, "").unwrap()
    }

    fn evaluator(seq: &[u8], tpl: &[u8], window_start: usize) -> Evaluator {
        let r = read(seq, window_start, window_start + tpl.len());
        let full_length = window_start + tpl.len();
        Evaluator::new(&r, tpl.to_vec(), window_start, full_length, -3.4, 25.0)
    }

    #[test]
    fn test_perfect_read_is_valid() {
        let eval = evaluator(b"ACGTACGT", b"ACGTACGT", 0);
        assert_eq!(eval.state(), State::Valid);
        assert!(eval.ll().is_finite());
        assert!(eval.z_score() > 0.0);
        assert_eq!(eval.num_flip_flops(), 0);
    }

    #[test]
    fn test_mutation_outside_window_scores_as_current_ll() {
        let mut eval = evaluator(b"CGT", b"CGT", 3);
        let before = eval.ll();
        let ll = eval.mutated_ll(&Mutation::substitution(0, *b"T")).unwrap();
        assert_eq!(ll, before);
        let ll = eval.mutated_ll(&Mutation::deletion(0, 2)).unwrap();
        assert_eq!(ll, before);
    }

    #[test]
    fn test_noop_substitution_scores_identically() {
        let mut eval = evaluator(b"ACGT", b"ACGT", 0);
        let before = eval.ll();
        let ll = eval.mutated_ll(&Mutation::substitution(2, *b"G")).unwrap();
        assert_eq!(ll, before);
    }

    #[test]
    fn test_matching_substitution_improves_ll() {
        let mut eval = evaluator(b"ACGT", b"ACCT", 0);
        let before = eval.ll();
        let ll = eval.mutated_ll(&Mutation::substitution(2, *b"G")).unwrap();
        assert!(ll > before);
    }

    #[test]
    fn test_apply_before_window_shifts_without_changing_ll() {
        let mut eval = evaluator(b"CGT", b"CGT", 3);
        let before = eval.ll();

        // Length-preserving edit before the window: no shift.
        eval.apply_mutations(&[Mutation::substitution(0, *b"C")]);
        assert_eq!(eval.window(), (3, 6));
        assert_eq!(eval.ll(), before);

        // Deletion before the window shifts it left.
        eval.apply_mutations(&[Mutation::deletion(0, 1)]);
        assert_eq!(eval.window(), (2, 5));
        assert_eq!(eval.ll(), before);

        // Insertion before the window shifts it right.
        eval.apply_mutations(&[Mutation::insertion(1, *b"G")]);
        assert_eq!(eval.window(), (3, 6));
        assert_eq!(eval.ll(), before);

        // Insertion exactly at the window start also lands before it.
        eval.apply_mutations(&[Mutation::insertion(3, *b"G")]);
        assert_eq!(eval.window(), (4, 7));
        assert_eq!(eval.ll(), before);
    }

    #[test]
    fn test_apply_inside_window_changes_template() {
        let mut eval = evaluator(b"ACGT", b"ACCT", 0);
        let before = eval.ll();
        eval.apply_mutations(&[Mutation::substitution(2, *b"G")]);
        assert_eq!(eval.template(), b"ACGT");
        assert_eq!(eval.window(), (0, 4));
        assert!(eval.ll() > before);
    }

    #[test]
    fn test_apply_straddling_deletion_shrinks_window() {
        let mut eval = evaluator(b"CGTA", b"CGTA", 2);
        // Deletes positions 1..4: one base before the window and two inside.
        eval.apply_mutations(&[Mutation::deletion(1, 3)]);
        assert_eq!(eval.window(), (1, 3));
        assert_eq!(eval.template(), b"TA");
    }

    #[test]
    fn test_large_substitution_disables_evaluator() {
        let seq = vec![b'A'; 24];
        let mut eval = evaluator(&seq, &seq.clone(), 0);
        let err = eval.mutated_ll(&Mutation::substitution(0, vec![b'C'; 12])).unwrap_err();
        assert!(format!("{err}").contains("scoring window"));
        assert_eq!(eval.state(), State::Disabled);

        // Once invalid, every further query fails without reviving.
        assert!(eval.mutated_ll(&Mutation::substitution(0, *b"C")).is_err());
        assert_eq!(eval.probe_ll(&Mutation::substitution(0, *b"C")), None);
    }

    #[test]
    fn test_deleting_whole_window_fails() {
        let mut eval = evaluator(b"ACGT", b"ACGT", 0);
        let err = eval.mutated_ll(&Mutation::deletion(0, 4)).unwrap_err();
        assert!(format!("{err}").contains("empties"));
        assert_eq!(eval.state(), State::Numerical);
    }

    #[test]
    fn test_probe_ll_does_not_invalidate() {
        let eval = evaluator(b"ACGT", b"ACGT", 0);
        assert_eq!(eval.probe_ll(&Mutation::deletion(0, 4)), None);
        assert_eq!(eval.state(), State::Valid);
    }

    #[test]
    fn test_mask_intervals_silences_noisy_region() {
        // Read matches the left half of the window and disagrees wildly on
        // the right half; the z-score filter is relaxed so the evaluator
        // survives construction.
        let r = read(b"ACGTACGTCCCCCCCC", 0, 16);
        let mut eval = Evaluator::new(&r, b"ACGTACGTGGGGGGGG".to_vec(), 0, 16, -100.0, 50.0);
        let before = eval.ll();
        eval.mask_intervals(1, 0.5);

        // A mutation in the noisy region scores as a no-op.
        let ll = eval.mutated_ll(&Mutation::substitution(12, *b"C")).unwrap();
        assert_eq!(ll, before);

        // A mutation in the clean region still scores.
        let ll = eval.mutated_ll(&Mutation::substitution(2, *b"C")).unwrap();
        assert!(ll < before);
    }

    #[test]
    fn test_alignment_errors_attribution() {
        // Identical sequences: no errors anywhere.
        assert_eq!(alignment_errors(b"ACGT", b"ACGT"), vec![0; 4]);

        // One mismatch at template position 2.
        assert_eq!(alignment_errors(b"ACCT", b"ACGT"), vec![0, 0, 1, 0]);

        // Template base the read skips counts at its own position.
        let errors = alignment_errors(b"ACT", b"ACGT");
        assert_eq!(errors.iter().sum::<u32>(), 1);

        // Surplus read base counts against a template position.
        let errors = alignment_errors(b"ACGTT", b"ACGT");
        assert_eq!(errors.iter().sum::<u32>(), 1);
    }

    #[test]
    fn test_poor_z_score_read_is_filtered() {
        // A read that matches nothing in the window scores far below its
        // model mean.
        let r = read(b"AAAAAAAAAAAAAAAA", 0, 16);
        let eval = Evaluator::new(&r, b"CCCCCCCCCCCCCCCC".to_vec(), 0, 16, -3.4, 100.0);
        assert_eq!(eval.state(), State::PoorZScore);
    }

    #[test]
    fn test_pinned_window_grows_with_edge_insertions() {
        // The read spans the whole template, so its window is pinned at both
        // ends and edge insertions grow it instead of shifting it.
        let mut eval = evaluator(b"ACACAC", b"ACAC", 0);
        let before = eval.ll();
        eval.apply_mutations(&[Mutation::insertion(0, *b"AC")]);
        assert_eq!(eval.window(), (0, 6));
        assert_eq!(eval.template(), b"ACACAC");
        assert!(eval.ll() > before);

        // Trailing insertion at the pinned end also lands inside.
        let mut eval = evaluator(b"ACGTT", b"ACGT", 0);
        let before = eval.ll();
        eval.apply_mutations(&[Mutation::insertion(4, *b"T")]);
        assert_eq!(eval.window(), (0, 5));
        assert_eq!(eval.template(), b"ACGTT");
        assert!(eval.ll() > before);
    }
}
