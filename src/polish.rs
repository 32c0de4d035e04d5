//! Iterative mutation search over a template.
//!
//! Each round proposes candidate single-site edits, scores them through the
//! integrator, selects a non-overlapping best set, applies it, and reseeds
//! the next round's candidates around the accepted edits. A fingerprint
//! history of visited templates guards against cyclic acceptance, and an
//! optional diploid mode calls heterozygous sites by a binomial test over
//! per-read best-base histograms.

use std::hash::Hasher;

use ahash::AHashSet;
use itertools::Itertools;
use serde::Serialize;
use statrs::distribution::{Binomial, DiscreteCDF};

use crate::dna::{ambiguous_base, BASES};
use crate::errors::{PolishError, Result};
use crate::evaluator::Evaluate;
use crate::integrator::Integrator;
use crate::mutation::{apply_mutations, Mutation, ScoredMutation};
use crate::tracker::{DiploidSite, MutationTracker};

/// Sentinel base marking a nascent diploid site in candidate mutations; the
/// scorer expands it by running the histogram test on the real bases.
pub(crate) const DIPLOID_SENTINEL: u8 = b'Z';

/// Configuration for [`polish`].
#[derive(Debug, Clone)]
pub struct PolishConfig {
    /// Cap on outer iterations
    pub max_iterations: usize,
    /// Minimum distance in template bases between two mutations accepted in
    /// one round
    pub mutation_separation: usize,
    /// Radius used to reseed candidates around the previous round's accepted
    /// edits
    pub mutation_neighborhood: usize,
    /// Enable heterozygous-site detection
    pub diploid: bool,
    /// Thresholds for the heterozygous-site test
    pub diploid_config: DiploidConfig,
}

impl Default for PolishConfig {
    fn default() -> Self {
        PolishConfig {
            max_iterations: 40,
            mutation_separation: 10,
            mutation_neighborhood: 20,
            diploid: false,
            diploid_config: DiploidConfig::default(),
        }
    }
}

/// Thresholds for the binomial heterozygous-site test.
///
/// The defaults are the validated operating point; tests may override them.
#[derive(Debug, Clone)]
pub struct DiploidConfig {
    /// Minimum total histogram coverage to consider a site at all
    pub min_coverage: usize,
    /// Fraction of coverage the top two alleles must reach together
    pub majority_fraction: f64,
    /// Average per-read error rate; `1 - error_rate` is the probability of
    /// reproducing the major allele
    pub error_rate: f64,
    /// Binomial significance level for rejecting a purely haploid site
    pub significance_level: f64,
    /// Minimum fraction of coverage on the minor allele
    pub min_fraction_minor: f64,
}

impl Default for DiploidConfig {
    fn default() -> Self {
        DiploidConfig {
            min_coverage: 10,
            majority_fraction: 0.75,
            error_rate: 0.08,
            significance_level: 0.005,
            min_fraction_minor: 0.25,
        }
    }
}

/// Configuration for [`polish_repeats`].
#[derive(Debug, Clone)]
pub struct RepeatConfig {
    /// Largest repeat unit size to scan for, in bases
    pub max_repeat_size: usize,
    /// Minimum number of exact unit copies for a run to qualify
    pub min_element_count: usize,
    /// Cap on outer iterations
    pub max_iterations: usize,
}

impl Default for RepeatConfig {
    fn default() -> Self {
        RepeatConfig { max_repeat_size: 3, min_element_count: 3, max_iterations: 40 }
    }
}

/// Outcome of a polishing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PolishResult {
    /// True when a round selected no mutations before the iteration cap
    pub has_converged: bool,
    /// Number of candidate mutations scored
    pub mutations_tested: usize,
    /// Number of mutations applied to the template
    pub mutations_applied: usize,
    /// Per-applied-round maximum forward-matrix populated ratio
    pub max_alpha_populated: Vec<f64>,
    /// Per-applied-round maximum backward-matrix populated ratio
    pub max_beta_populated: Vec<f64>,
    /// Per-applied-round maximum flip-flop count
    pub max_num_flip_flops: Vec<usize>,
    /// Heterozygous sites in draft coordinates; populated on convergence of a
    /// diploid run
    pub diploid_sites: Vec<DiploidSite>,
}

/// Emits the candidate edits for `[start, end)` of `tpl` into `muts`.
///
/// Insertions are proposed for every base except the previous one, so only
/// the first base of an existing homopolymer is re-proposed; a deletion is
/// proposed only at the first base of a homopolymer; substitutions are
/// proposed for every base except the current one. After the last position,
/// trailing insertions are proposed under the same homopolymer rule. In
/// diploid mode the base set collapses to the sentinel marker.
pub fn mutations_in_window(
    tpl: &[u8],
    start: usize,
    end: usize,
    diploid: bool,
    muts: &mut Vec<Mutation>,
) {
    let bases: &[u8] = if diploid { &[DIPLOID_SENTINEL] } else { &BASES };

    if start == end {
        return;
    }

    let mut last = if start > 0 { tpl[start - 1] } else { 0 };

    for i in start..end {
        let curr = tpl[i];

        // Insertions come before deletions/substitutions at site i; their
        // end() is i < i + 1.
        for &b in bases {
            if b != last {
                muts.push(Mutation::insertion(i, vec![b]));
            }
        }

        // Only the first base of a homopolymer is deletable.
        if curr != last {
            muts.push(Mutation::deletion(i, 1));
        }

        for &b in bases {
            if b != curr {
                muts.push(Mutation::substitution(i, vec![b]));
            }
        }

        last = curr;
    }

    // No terminal homopolymer insertion.
    for &b in bases {
        if b != last {
            muts.push(Mutation::insertion(end, vec![b]));
        }
    }
}

/// Candidate edits over the whole template.
#[must_use]
pub fn all_mutations(tpl: &[u8], diploid: bool) -> Vec<Mutation> {
    let mut muts = Vec::new();
    mutations_in_window(tpl, 0, tpl.len(), diploid, &mut muts);
    muts
}

/// Proposes one-more-copy and one-fewer-copy edits at every run of at least
/// `min_element_count` exact `k`-mer repeats, for every unit size `k` from 2
/// through `max_repeat_size`, over `[start, end)` of `tpl`.
#[must_use]
pub fn repeat_mutations(tpl: &[u8], cfg: &RepeatConfig, start: usize, end: usize) -> Vec<Mutation> {
    let mut muts = Vec::new();
    if cfg.max_repeat_size < 2 || cfg.min_element_count == 0 {
        return muts;
    }

    for repeat_size in 2..=cfg.max_repeat_size {
        let mut i = start;
        while i + repeat_size <= end {
            let mut n_elem = 1;
            let mut j = i + repeat_size;
            while j + repeat_size <= end && tpl[j..j + repeat_size] == tpl[i..i + repeat_size] {
                n_elem += 1;
                j += repeat_size;
            }

            if n_elem >= cfg.min_element_count {
                muts.push(Mutation::insertion(i, tpl[i..i + repeat_size].to_vec()));
                muts.push(Mutation::deletion(i, repeat_size));
            }

            if n_elem > 1 {
                i += repeat_size * (n_elem - 1) + 1;
            } else {
                i += 1;
            }
        }
    }

    muts.sort_by(Mutation::cmp_site);
    muts
}

/// Greedily selects the non-overlapping best mutations: repeatedly takes the
/// highest-scoring remaining candidate and drops every candidate within
/// `separation` template bases of it.
///
/// # Errors
///
/// Fails with [`PolishError::InvalidParameter`] when `separation` is zero.
pub fn best_mutations(
    scored: &mut Vec<ScoredMutation>,
    separation: usize,
) -> Result<Vec<Mutation>> {
    if separation == 0 {
        return Err(PolishError::InvalidParameter {
            parameter: "separation".to_string(),
            reason: "nonzero separation required".to_string(),
        });
    }

    let mut result = Vec::new();
    while !scored.is_empty() {
        let idx = scored
            .iter()
            .position_max_by(|a, b| ScoredMutation::cmp_score(a, b))
            .expect("nonempty candidate list");
        let best = scored[idx].mutation.clone();

        let start = best.start().saturating_sub(separation);
        let end = best.end() + separation;
        result.push(best);

        scored.retain(|s| !(start <= s.mutation.end() && s.mutation.start() < end));
    }

    Ok(result)
}

/// Regenerates candidates around `centers`, correcting for the length
/// changes of `applied` mutations at earlier sites.
///
/// Both lists are sorted by site in place and walked in lockstep; each
/// center's `[start - neighborhood, end + neighborhood]` interval is shifted
/// by the accumulated length difference, clamped to the template, and merged
/// with the previous interval when they touch.
#[must_use]
pub fn nearby_mutations(
    applied: &mut [Mutation],
    centers: &mut [Mutation],
    tpl: &[u8],
    neighborhood: usize,
    diploid: bool,
) -> Vec<Mutation> {
    let len = tpl.len() as isize;
    let clamp = |i: isize| -> usize { i.clamp(0, len) as usize };
    let nb = neighborhood as isize;

    let mut result = Vec::new();
    if centers.is_empty() {
        return result;
    }

    applied.sort_by(Mutation::cmp_site);
    centers.sort_by(Mutation::cmp_site);

    let mut_range = |m: &Mutation, diff: isize| -> (usize, usize) {
        (clamp(diff + m.start() as isize - nb), clamp(diff + m.end() as isize + nb))
    };

    let mut applied_iter = applied.iter().peekable();
    let mut length_diff: isize = 0;
    let mut centers_iter = centers.iter();

    let first = centers_iter.next().expect("nonempty centers");
    while let Some(a) = applied_iter.peek() {
        if a.end() > first.start() {
            break;
        }
        length_diff += a.length_diff();
        applied_iter.next();
    }
    let mut ranges = vec![mut_range(first, length_diff)];

    for center in centers_iter {
        while let Some(a) = applied_iter.peek() {
            if a.end() > center.start() {
                break;
            }
            length_diff += a.length_diff();
            applied_iter.next();
        }
        let (next_start, next_end) = mut_range(center, length_diff);

        // A range touching the previous one extends it.
        let current = ranges.last_mut().expect("nonempty ranges");
        if next_start <= current.1 {
            current.1 = next_end;
        } else {
            ranges.push((next_start, next_end));
        }
    }

    for (start, end) in ranges {
        mutations_in_window(tpl, start, end, diploid, &mut result);
    }
    result
}

fn template_fingerprint(tpl: &[u8]) -> u64 {
    let mut hasher = ahash::AHasher::default();
    hasher.write(tpl);
    hasher.finish()
}

fn record_diagnostics<E: Evaluate>(result: &mut PolishResult, ai: &Integrator<E>) {
    result.max_alpha_populated.push(ai.max_alpha_populated());
    result.max_beta_populated.push(ai.max_beta_populated());
    result.max_num_flip_flops.push(ai.max_num_flip_flops());
}

/// Runs the histogram plus binomial gauntlet for one sentinel candidate and
/// scores the composed ambiguous mutation when every filter passes.
fn score_diploid_site<E: Evaluate>(
    ai: &mut Integrator<E>,
    sentinel: &Mutation,
    cfg: &DiploidConfig,
) -> Result<Option<ScoredMutation>> {
    let histogram = ai.best_mutation_histogram(sentinel.start(), sentinel.kind());
    let coverage: usize = histogram.iter().map(|(_, count)| count).sum();

    // 1. Enough absolute coverage to contemplate a diploid call at all?
    if coverage < cfg.min_coverage {
        return Ok(None);
    }

    // 2. Do the two most frequent alleles cover enough together?
    if ((histogram[0].1 + histogram[1].1) as f64) < coverage as f64 * cfg.majority_fraction {
        return Ok(None);
    }

    // 3. Binomial test: is the major allele reproduced less often than a
    //    haploid site would predict?
    let binomial = Binomial::new(1.0 - cfg.error_rate, coverage as u64).map_err(|_| {
        PolishError::InvalidParameter {
            parameter: "error_rate".to_string(),
            reason: format!("{} is not a probability", cfg.error_rate),
        }
    })?;
    let pvalue = binomial.cdf(histogram[0].1 as u64);
    if pvalue > cfg.significance_level {
        return Ok(None);
    }

    // 4. Does the minor allele rise above the noise floor?
    if (histogram[1].1 as f64) < coverage as f64 * cfg.min_fraction_minor {
        return Ok(None);
    }

    let Some(ambiguous) = ambiguous_base(histogram[0].0, histogram[1].0) else {
        return Ok(None);
    };

    // A site already holding this code would re-propose itself forever.
    if sentinel.is_substitution() && ai.template()[sentinel.start()] == ambiguous {
        return Ok(None);
    }

    let call = if sentinel.is_insertion() {
        Mutation::insertion(sentinel.start(), vec![ambiguous])
    } else {
        Mutation::substitution(sentinel.start(), vec![ambiguous])
    };
    let ll = ai.ll_with_mutation(&call)?;
    Ok(Some(call.with_score(ll).with_pvalue(pvalue)))
}

/// One full scoring pass over the candidates. Fails with
/// [`PolishError::InvalidEvaluator`] as soon as any candidate does, in which
/// case everything scored so far is stale.
fn score_all<E: Evaluate>(
    ai: &mut Integrator<E>,
    muts: &[Mutation],
    cfg: &PolishConfig,
) -> Result<(Vec<ScoredMutation>, usize)> {
    // Only the active evaluators contribute to the baseline.
    let baseline = ai.ll();
    let mut scored = Vec::new();
    let mut tested = 0;

    for m in muts {
        tested += 1;
        if cfg.diploid && !m.is_deletion() && m.bases() == [DIPLOID_SENTINEL] {
            if let Some(s) = score_diploid_site(ai, m, &cfg.diploid_config)? {
                debug_assert!(!s.mutation.bases().contains(&DIPLOID_SENTINEL));
                scored.push(s);
            }
        } else {
            // The sentinel never reappears once expanded.
            debug_assert!(!m.bases().contains(&DIPLOID_SENTINEL) || !cfg.diploid);
            let ll = ai.ll_with_mutation(m)?;
            if ll > baseline {
                scored.push(m.with_score(ll));
            }
        }
    }
    Ok((scored, tested))
}

/// Iteratively polishes the integrator's template to convergence or the
/// iteration cap.
///
/// # Errors
///
/// Fails with [`PolishError::InvalidParameter`] for a zero mutation
/// separation or an out-of-range diploid error rate. Evaluator invalidation
/// is recovered internally by restarting the scoring pass.
pub fn polish<E: Evaluate>(ai: &mut Integrator<E>, cfg: &PolishConfig) -> Result<PolishResult> {
    let mut muts = all_mutations(ai.template(), cfg.diploid);
    let mut history = AHashSet::new();
    history.insert(template_fingerprint(ai.template()));

    let mut result = PolishResult::default();
    // Tracks the changes to the draft template over many rounds.
    let mut tracker = MutationTracker::new(ai.template());

    for _ in 0..cfg.max_iterations {
        // Recompute candidate scores until no evaluator gets invalidated;
        // this converges because the number of evaluators never grows.
        let mut scored = loop {
            match score_all(ai, &muts, cfg) {
                Ok((scored, tested)) => {
                    result.mutations_tested += tested;
                    break scored;
                }
                Err(PolishError::InvalidEvaluator { .. }) => {}
                Err(other) => return Err(other),
            }
        };

        let mut selected = best_mutations(&mut scored, cfg.mutation_separation)?;

        if selected.is_empty() {
            result.has_converged = true;
            if cfg.diploid {
                result.diploid_sites = tracker.mapping_to_original_template();
            }
            return Ok(result);
        }

        let fingerprint = template_fingerprint(&apply_mutations(ai.template(), &mut selected));

        if history.contains(&fingerprint) {
            // Cyclic behavior guard: when the selected set would revisit an
            // earlier template, applying just one of the interacting
            // mutations breaks the interaction that feeds the cycle.
            let first = selected[0].clone();
            ai.apply_mutation(&first);
            if cfg.diploid {
                tracker.add_sorted_mutations(std::slice::from_ref(&first));
            }
            result.mutations_applied += 1;
            history.insert(template_fingerprint(ai.template()));
            record_diagnostics(&mut result, ai);

            let mut applied = vec![first];
            muts = nearby_mutations(
                &mut applied,
                &mut selected,
                ai.template(),
                cfg.mutation_neighborhood,
                cfg.diploid,
            );
        } else {
            ai.apply_mutations(&mut selected);
            if cfg.diploid {
                tracker.add_sorted_mutations(&selected);
            }
            result.mutations_applied += selected.len();
            history.insert(fingerprint);
            record_diagnostics(&mut result, ai);

            let mut centers = selected.clone();
            muts = nearby_mutations(
                &mut selected,
                &mut centers,
                ai.template(),
                cfg.mutation_neighborhood,
                cfg.diploid,
            );
        }
    }

    Ok(result)
}

/// Scores every repeat candidate, keeping the single best improvement.
fn score_best_repeat<E: Evaluate>(
    ai: &mut Integrator<E>,
    muts: &[Mutation],
) -> Result<(Option<ScoredMutation>, usize)> {
    let baseline = ai.ll();
    let mut best: Option<ScoredMutation> = None;
    let mut tested = 0;
    for m in muts {
        tested += 1;
        let ll = ai.ll_with_mutation(m)?;
        if ll > baseline && best.as_ref().is_none_or(|b| ll > b.score) {
            best = Some(m.with_score(ll));
        }
    }
    Ok((best, tested))
}

/// Polishes tandem-repeat expansions and contractions: each round proposes
/// one-more-copy and one-fewer-copy edits at every qualifying repeat run and
/// applies the single best improvement.
///
/// # Errors
///
/// Only evaluator invalidation can occur, and it is recovered internally by
/// restarting the scoring pass.
pub fn polish_repeats<E: Evaluate>(
    ai: &mut Integrator<E>,
    cfg: &RepeatConfig,
) -> Result<PolishResult> {
    let mut result = PolishResult::default();

    for _ in 0..cfg.max_iterations {
        let muts = repeat_mutations(ai.template(), cfg, 0, ai.template_length());

        let best = loop {
            match score_best_repeat(ai, &muts) {
                Ok((best, tested)) => {
                    result.mutations_tested += tested;
                    break best;
                }
                Err(PolishError::InvalidEvaluator { .. }) => {}
                Err(other) => return Err(other),
            }
        };

        let Some(best) = best else {
            result.has_converged = true;
            break;
        };

        ai.apply_mutation(&best.mutation);
        result.mutations_applied += 1;
        record_diagnostics(&mut result, ai);
    }

    Ok(result)
}
