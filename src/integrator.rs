//! Aggregate scoring over all evaluators for one template.
//!
//! The integrator owns every per-read evaluator for a genomic region or
//! amplicon, keeps the forward template and its reverse complement in sync,
//! translates mutations into each evaluator's strand, and reports aggregate
//! log-likelihoods, best-base histograms, and diagnostics.

use crate::dna::{reverse_complement, BASES};
use crate::errors::{PolishError, Result};
use crate::evaluator::{Evaluate, Evaluator};
use crate::mutation::{apply_mutations, Mutation, MutationKind};
use crate::read::{MappedRead, State, Strand};

/// User-provided filtering configuration for the evaluators.
#[derive(Debug, Clone)]
pub struct IntegratorConfig {
    /// Evaluators whose z-score falls below this are filtered at add time
    pub min_z_score: f64,
    /// Log-likelihood window for scoring; also the matrix pruning width
    pub score_diff: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        IntegratorConfig { min_z_score: -3.4, score_diff: 25.0 }
    }
}

/// Holds the evaluators whose mapped reads belong to the same template.
///
/// Evaluators are owned by value and addressed by stable index: a disabled
/// evaluator stays in the sequence so externally held indices keep working.
/// The type is generic at the evaluator seam; [`Evaluator`] is the default
/// and [`add_read`](Integrator::add_read) is only offered for it.
#[derive(Debug)]
pub struct Integrator<E: Evaluate = Evaluator> {
    cfg: IntegratorConfig,
    evals: Vec<E>,
    fwd_tpl: Vec<u8>,
    rev_tpl: Vec<u8>,
}

impl<E: Evaluate> Integrator<E> {
    /// Initializes the integrator from a draft template.
    pub fn new(tpl: &[u8], cfg: IntegratorConfig) -> Result<Self> {
        if tpl.is_empty() {
            return Err(PolishError::InvalidParameter {
                parameter: "tpl".to_string(),
                reason: "draft template is empty".to_string(),
            });
        }
        if let Some(&bad) = tpl.iter().find(|b| !BASES.contains(b)) {
            return Err(PolishError::InvalidParameter {
                parameter: "tpl".to_string(),
                reason: format!("draft template contains invalid base '{}'", bad as char),
            });
        }
        Ok(Integrator {
            cfg,
            evals: Vec::new(),
            rev_tpl: reverse_complement(tpl),
            fwd_tpl: tpl.to_vec(),
        })
    }

    /// Current template length.
    #[must_use]
    pub fn template_length(&self) -> usize {
        self.fwd_tpl.len()
    }

    /// The current forward template.
    #[must_use]
    pub fn template(&self) -> &[u8] {
        &self.fwd_tpl
    }

    /// Base `i` of the current forward template.
    #[must_use]
    pub fn base(&self, i: usize) -> u8 {
        self.fwd_tpl[i]
    }

    /// Number of evaluators, active or not.
    #[must_use]
    pub fn num_evaluators(&self) -> usize {
        self.evals.len()
    }

    /// Stores an already constructed evaluator and reports its state.
    pub fn add_evaluator(&mut self, eval: E) -> State {
        let state = eval.state();
        self.evals.push(eval);
        state
    }

    /// Sum of log-likelihoods over the active evaluators for the current
    /// template.
    #[must_use]
    pub fn ll(&self) -> f64 {
        self.evals.iter().filter(|e| e.is_active()).map(Evaluate::ll).sum()
    }

    /// Sum of log-likelihoods over the active evaluators assuming `mutation`
    /// (in forward-template coordinates) were applied.
    ///
    /// # Errors
    ///
    /// Fails with [`PolishError::InvalidEvaluator`] as soon as one evaluator
    /// cannot score the mutation; that evaluator is disabled and any
    /// likelihoods computed in the same pass are stale, so the caller must
    /// restart its scoring pass.
    pub fn ll_with_mutation(&mut self, mutation: &Mutation) -> Result<f64> {
        let rc = self.reverse_complemented(mutation);
        let mut total = 0.0;
        for eval in &mut self.evals {
            if !eval.is_active() {
                continue;
            }
            let local = match eval.strand() {
                Strand::Forward => mutation,
                Strand::Reverse => &rc,
            };
            match eval.mutated_ll(local) {
                Ok(ll) => total += ll,
                Err(err) => {
                    log::info!("{err}");
                    return Err(err);
                }
            }
        }
        Ok(total)
    }

    /// Applies one mutation to the current template and every evaluator.
    pub fn apply_mutation(&mut self, mutation: &Mutation) {
        let mut muts = vec![mutation.clone()];
        self.apply_mutations(&mut muts);
    }

    /// Commits a batch of pairwise non-overlapping mutations (in
    /// forward-template coordinates) to the current template and every
    /// evaluator. The batch is sorted by site in place.
    pub fn apply_mutations(&mut self, muts: &mut Vec<Mutation>) {
        if muts.is_empty() {
            return;
        }
        muts.sort_by(Mutation::cmp_site);
        let mut rc: Vec<Mutation> =
            muts.iter().map(|m| self.reverse_complemented(m)).collect();
        rc.sort_by(Mutation::cmp_site);

        self.fwd_tpl = apply_mutations(&self.fwd_tpl, muts);
        self.rev_tpl = reverse_complement(&self.fwd_tpl);

        for eval in &mut self.evals {
            match eval.strand() {
                Strand::Forward => eval.apply_mutations(muts),
                Strand::Reverse => eval.apply_mutations(&rc),
            }
        }
    }

    /// Best-base improvement histogram for a locus and mutation kind.
    ///
    /// Each active evaluator votes for the base whose hypothetical edit gives
    /// it the greatest log-likelihood improvement, with ties resolved in base
    /// order; it abstains only when every base strictly decreases its
    /// likelihood (or none can be scored). The histogram is sorted descending
    /// by count, ties in base order, so it sums to at most the number of
    /// active evaluators.
    ///
    /// # Panics
    ///
    /// Panics when called for deletions; the histogram is defined for
    /// insertions and substitutions.
    #[must_use]
    pub fn best_mutation_histogram(&self, start: usize, kind: MutationKind) -> [(u8, usize); 4] {
        assert!(
            kind != MutationKind::Deletion,
            "histogram is defined for insertions and substitutions"
        );
        let fwd: Vec<Mutation> = BASES
            .iter()
            .map(|&b| match kind {
                MutationKind::Insertion => Mutation::insertion(start, vec![b]),
                MutationKind::Substitution => Mutation::substitution(start, vec![b]),
                MutationKind::Deletion => unreachable!(),
            })
            .collect();
        let rc: Vec<Mutation> = fwd.iter().map(|m| self.reverse_complemented(m)).collect();

        let mut counts = [0usize; 4];
        for eval in &self.evals {
            if !eval.is_active() {
                continue;
            }
            let muts = match eval.strand() {
                Strand::Forward => &fwd,
                Strand::Reverse => &rc,
            };
            let mut best: Option<(usize, f64)> = None;
            for (base_idx, m) in muts.iter().enumerate() {
                if let Some(ll) = eval.probe_ll(m) {
                    let delta = ll - eval.ll();
                    if best.is_none_or(|(_, best_delta)| delta > best_delta) {
                        best = Some((base_idx, delta));
                    }
                }
            }
            if let Some((base_idx, delta)) = best {
                if delta >= 0.0 {
                    counts[base_idx] += 1;
                }
            }
        }

        let mut histogram = [
            (BASES[0], counts[0]),
            (BASES[1], counts[1]),
            (BASES[2], counts[2]),
            (BASES[3], counts[3]),
        ];
        histogram.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        histogram
    }

    /// Masks high-error template windows for each evaluator.
    pub fn mask_intervals(&mut self, radius: usize, max_err_rate: f64) {
        for eval in &mut self.evals {
            if eval.is_active() {
                eval.mask_intervals(radius, max_err_rate);
            }
        }
    }

    /// Z-score of each evaluator, active or not.
    #[must_use]
    pub fn z_scores(&self) -> Vec<f64> {
        self.evals.iter().map(Evaluate::z_score).collect()
    }

    /// Mean z-score over all evaluators; NaN when there are none.
    #[must_use]
    pub fn avg_z_score(&self) -> f64 {
        let scores = self.z_scores();
        scores.iter().sum::<f64>() / scores.len() as f64
    }

    /// Model mean and variance of each evaluator's log-likelihood.
    #[must_use]
    pub fn normal_parameters(&self) -> Vec<(f64, f64)> {
        self.evals.iter().map(Evaluate::normal_parameters).collect()
    }

    /// Maximum flip-flop count over all evaluators.
    #[must_use]
    pub fn max_num_flip_flops(&self) -> usize {
        self.evals.iter().map(Evaluate::num_flip_flops).max().unwrap_or(0)
    }

    /// Maximum forward-matrix populated ratio over all evaluators.
    #[must_use]
    pub fn max_alpha_populated(&self) -> f64 {
        self.evals.iter().map(Evaluate::alpha_populated_ratio).fold(0.0, f64::max)
    }

    /// Maximum backward-matrix populated ratio over all evaluators.
    #[must_use]
    pub fn max_beta_populated(&self) -> f64 {
        self.evals.iter().map(Evaluate::beta_populated_ratio).fold(0.0, f64::max)
    }

    /// State of each evaluator.
    #[must_use]
    pub fn states(&self) -> Vec<State> {
        self.evals.iter().map(Evaluate::state).collect()
    }

    /// Strand of each evaluator.
    #[must_use]
    pub fn strands(&self) -> Vec<Strand> {
        self.evals.iter().map(Evaluate::strand).collect()
    }

    /// Read name of each evaluator.
    #[must_use]
    pub fn read_names(&self) -> Vec<String> {
        self.evals.iter().map(|e| e.read_name().to_string()).collect()
    }

    /// Read-only access to evaluator `idx`.
    #[must_use]
    pub fn evaluator(&self, idx: usize) -> &E {
        &self.evals[idx]
    }

    /// Maps a forward-coordinate mutation onto the reverse-complement
    /// template.
    fn reverse_complemented(&self, mutation: &Mutation) -> Mutation {
        let len = self.fwd_tpl.len();
        assert!(mutation.end() <= len, "mutation outside the template");
        match mutation {
            Mutation::Deletion { start, length } => {
                Mutation::deletion(len - (start + length), *length)
            }
            Mutation::Insertion { start, bases } => {
                Mutation::insertion(len - start, reverse_complement(bases))
            }
            Mutation::Substitution { start, bases } => {
                Mutation::substitution(len - (start + bases.len()), reverse_complement(bases))
            }
        }
    }
}

impl Integrator<Evaluator> {
    /// Encapsulates the read in a pair-HMM evaluator over the
    /// strand-appropriate template window and stores it.
    ///
    /// # Errors
    ///
    /// Fails with [`PolishError::InvalidParameter`] for structurally invalid
    /// reads or a mapped interval outside the template; reads the z-score
    /// filter rejects are stored disabled and reported via the returned
    /// [`State`], not an error.
    pub fn add_read(&mut self, read: &MappedRead) -> Result<State> {
        read.validate()?;
        let len = self.template_length();
        if read.end > len {
            return Err(PolishError::InvalidParameter {
                parameter: "read".to_string(),
                reason: format!(
                    "read '{}' maps to [{}, {}) on a template of length {len}",
                    read.name, read.start, read.end
                ),
            });
        }
        let (window_start, tpl) = match read.strand {
            Strand::Forward => (read.start, self.fwd_tpl[read.start..read.end].to_vec()),
            Strand::Reverse => {
                let start = len - read.end;
                let end = len - read.start;
                (start, self.rev_tpl[start..end].to_vec())
            }
        };
        let eval = Evaluator::new(
            read,
            tpl,
            window_start,
            len,
            self.cfg.min_z_score,
            self.cfg.score_diff,
        );
        Ok(self.add_evaluator(eval))
    }
}
