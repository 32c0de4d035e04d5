//! Single-site template edits and batch application.
//!
//! A [`Mutation`] describes one edit to the template: a substitution of one or
//! more bases, an insertion before a position, or a deletion of a run of
//! bases. Batches of non-overlapping mutations are applied right-to-left so
//! that earlier-site edits keep their original coordinates.

use std::cmp::Ordering;
use std::fmt;

/// The three kinds of single-site edit.
///
/// The declaration order doubles as the site tie-breaking priority: at equal
/// `(start, end)`, insertions sort before substitutions, which sort before
/// deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MutationKind {
    /// Insert bases before a position
    Insertion,
    /// Replace bases in place
    Substitution,
    /// Remove bases
    Deletion,
}

/// A single-site edit to the template.
///
/// `end()` is `start() + length()`, so insertions have `end() == start()`.
/// Two mutations overlap iff `a.start < b.end && b.start < a.end`, with
/// insertions additionally treated as touching the position to their left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Remove `length` bases starting at `start`
    Deletion {
        /// First removed template position
        start: usize,
        /// Number of removed bases, nonzero
        length: usize,
    },
    /// Insert `bases` before position `start`
    Insertion {
        /// Template position the bases are inserted before
        start: usize,
        /// Inserted bases, nonempty
        bases: Vec<u8>,
    },
    /// Replace `bases.len()` bases starting at `start`
    Substitution {
        /// First replaced template position
        start: usize,
        /// Replacement bases, nonempty
        bases: Vec<u8>,
    },
}

impl Mutation {
    /// Creates a deletion of `length` bases starting at `start`.
    ///
    /// # Panics
    ///
    /// Panics if `length` is zero; a zero-length deletion is a programming
    /// error.
    #[must_use]
    pub fn deletion(start: usize, length: usize) -> Self {
        assert!(length > 0, "deletion must remove at least one base");
        Mutation::Deletion { start, length }
    }

    /// Creates an insertion of `bases` before position `start`.
    ///
    /// # Panics
    ///
    /// Panics if `bases` is empty; an empty insertion is a programming error.
    #[must_use]
    pub fn insertion(start: usize, bases: impl Into<Vec<u8>>) -> Self {
        let bases = bases.into();
        assert!(!bases.is_empty(), "insertion must supply at least one base");
        Mutation::Insertion { start, bases }
    }

    /// Creates a substitution of `bases.len()` bases starting at `start`.
    ///
    /// # Panics
    ///
    /// Panics if `bases` is empty; an empty substitution is a programming
    /// error.
    #[must_use]
    pub fn substitution(start: usize, bases: impl Into<Vec<u8>>) -> Self {
        let bases = bases.into();
        assert!(!bases.is_empty(), "substitution must supply at least one base");
        Mutation::Substitution { start, bases }
    }

    /// First template position touched by this mutation.
    #[must_use]
    pub fn start(&self) -> usize {
        match self {
            Mutation::Deletion { start, .. }
            | Mutation::Insertion { start, .. }
            | Mutation::Substitution { start, .. } => *start,
        }
    }

    /// Number of template bases consumed: zero for insertions.
    #[must_use]
    pub fn length(&self) -> usize {
        match self {
            Mutation::Deletion { length, .. } => *length,
            Mutation::Insertion { .. } => 0,
            Mutation::Substitution { bases, .. } => bases.len(),
        }
    }

    /// One past the last template position touched; equals `start()` for
    /// insertions.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start() + self.length()
    }

    /// The bases written by this mutation; empty for deletions.
    #[must_use]
    pub fn bases(&self) -> &[u8] {
        match self {
            Mutation::Deletion { .. } => &[],
            Mutation::Insertion { bases, .. } | Mutation::Substitution { bases, .. } => bases,
        }
    }

    /// The kind of edit.
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Deletion { .. } => MutationKind::Deletion,
            Mutation::Insertion { .. } => MutationKind::Insertion,
            Mutation::Substitution { .. } => MutationKind::Substitution,
        }
    }

    /// Returns true for insertions.
    #[must_use]
    pub fn is_insertion(&self) -> bool {
        matches!(self, Mutation::Insertion { .. })
    }

    /// Returns true for deletions.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self, Mutation::Deletion { .. })
    }

    /// Returns true for substitutions.
    #[must_use]
    pub fn is_substitution(&self) -> bool {
        matches!(self, Mutation::Substitution { .. })
    }

    /// Change in template length caused by this mutation.
    #[must_use]
    pub fn length_diff(&self) -> isize {
        match self {
            Mutation::Deletion { length, .. } => -(*length as isize),
            Mutation::Insertion { bases, .. } => bases.len() as isize,
            Mutation::Substitution { .. } => 0,
        }
    }

    /// Restricts this mutation to the window `[start, start + length)`,
    /// shifting coordinates so the window origin becomes 0.
    ///
    /// Returns `None` when the mutation is disjoint from the window. For
    /// insertions the window is extended by one on the right, so an insertion
    /// sitting exactly on either window edge is still returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use fgpolish::mutation::Mutation;
    ///
    /// let sub = Mutation::substitution(4, *b"AC");
    /// assert_eq!(sub.translate(0, 10), Some(sub.clone()));
    /// assert_eq!(sub.translate(5, 5), Some(Mutation::substitution(0, *b"C")));
    /// assert_eq!(sub.translate(6, 4), None);
    /// ```
    #[must_use]
    pub fn translate(&self, start: usize, length: usize) -> Option<Mutation> {
        let is_insertion = usize::from(self.is_insertion());
        // Disjoint when the mutation ends left of the window or begins at or
        // beyond its right edge; insertions touch one extra position.
        if self.end() + is_insertion < start || start + length + is_insertion <= self.start() {
            return None;
        }

        let new_start = self.start().max(start);
        let new_length = self.end().min(start + length) - new_start;

        if self.is_insertion() {
            return Some(Mutation::insertion(new_start - start, self.bases().to_vec()));
        }
        if new_length == 0 {
            return None;
        }
        if self.is_deletion() {
            return Some(Mutation::deletion(new_start - start, new_length));
        }
        let offset = new_start - self.start();
        Some(Mutation::substitution(new_start - start, self.bases()[offset..offset + new_length].to_vec()))
    }

    /// Orders mutations by site: `(start, end, kind)` with kind priority
    /// Insertion < Substitution < Deletion.
    #[must_use]
    pub fn cmp_site(a: &Mutation, b: &Mutation) -> Ordering {
        a.start()
            .cmp(&b.start())
            .then_with(|| a.end().cmp(&b.end()))
            .then_with(|| a.kind().cmp(&b.kind()))
    }

    /// Attaches a score, producing a [`ScoredMutation`].
    #[must_use]
    pub fn with_score(&self, score: f64) -> ScoredMutation {
        ScoredMutation { mutation: self.clone(), score, pvalue: None }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Deletion { start, length } => write!(f, "Deletion({start}, {length})"),
            Mutation::Insertion { start, bases } => {
                write!(f, "Insertion({start}, \"{}\")", String::from_utf8_lossy(bases))
            }
            Mutation::Substitution { start, bases } => {
                write!(f, "Substitution({start}, \"{}\")", String::from_utf8_lossy(bases))
            }
        }
    }
}

/// A mutation plus the aggregate log-likelihood it achieved, and an optional
/// p-value for diploid calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMutation {
    /// The scored edit
    pub mutation: Mutation,
    /// Aggregate log-likelihood with the edit applied
    pub score: f64,
    /// Binomial p-value for heterozygous candidates
    pub pvalue: Option<f64>,
}

impl ScoredMutation {
    /// Attaches a p-value from the diploid binomial test.
    #[must_use]
    pub fn with_pvalue(mut self, pvalue: f64) -> Self {
        self.pvalue = Some(pvalue);
        self
    }

    /// Total order on scores, for selecting the best candidate.
    #[must_use]
    pub fn cmp_score(a: &ScoredMutation, b: &ScoredMutation) -> Ordering {
        a.score.total_cmp(&b.score)
    }
}

impl fmt::Display for ScoredMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScoredMutation({}, '{}')", self.mutation, self.score)
    }
}

/// Applies a batch of pairwise non-overlapping mutations to a template.
///
/// The batch is sorted by site in place and then applied right-to-left, so
/// each edit is performed at its original coordinates.
///
/// # Examples
///
/// ```
/// use fgpolish::mutation::{apply_mutations, Mutation};
///
/// let mut muts = vec![Mutation::substitution(3, *b"G"), Mutation::deletion(0, 1)];
/// assert_eq!(apply_mutations(b"AACCT", &mut muts), b"ACGT".to_vec());
/// ```
#[must_use]
pub fn apply_mutations(tpl: &[u8], muts: &mut [Mutation]) -> Vec<u8> {
    muts.sort_by(Mutation::cmp_site);

    let mut new_tpl = tpl.to_vec();
    if muts.is_empty() || tpl.is_empty() {
        return new_tpl;
    }

    for m in muts.iter().rev() {
        new_tpl.splice(m.start()..m.end(), m.bases().iter().copied());
    }

    new_tpl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let del = Mutation::deletion(3, 2);
        assert_eq!(del.start(), 3);
        assert_eq!(del.end(), 5);
        assert_eq!(del.length(), 2);
        assert_eq!(del.bases(), b"");
        assert_eq!(del.length_diff(), -2);

        let ins = Mutation::insertion(1, *b"AC");
        assert_eq!(ins.start(), 1);
        assert_eq!(ins.end(), 1);
        assert_eq!(ins.length(), 0);
        assert_eq!(ins.bases(), b"AC");
        assert_eq!(ins.length_diff(), 2);

        let sub = Mutation::substitution(0, *b"GT");
        assert_eq!(sub.end(), 2);
        assert_eq!(sub.length(), 2);
        assert_eq!(sub.length_diff(), 0);
    }

    #[test]
    #[should_panic(expected = "at least one base")]
    fn test_empty_insertion_panics() {
        let _ = Mutation::insertion(0, Vec::new());
    }

    #[test]
    #[should_panic(expected = "at least one base")]
    fn test_zero_length_deletion_panics() {
        let _ = Mutation::deletion(0, 0);
    }

    #[test]
    fn test_site_ordering() {
        let ins = Mutation::insertion(2, *b"A");
        let sub = Mutation::substitution(2, *b"C");
        let del = Mutation::deletion(2, 1);

        // Equal start: insertion first (end 2 < 3), then substitution before
        // deletion by kind priority.
        assert_eq!(Mutation::cmp_site(&ins, &sub), Ordering::Less);
        assert_eq!(Mutation::cmp_site(&sub, &del), Ordering::Less);
        assert_eq!(Mutation::cmp_site(&ins, &del), Ordering::Less);

        let earlier = Mutation::deletion(1, 1);
        assert_eq!(Mutation::cmp_site(&earlier, &ins), Ordering::Less);
    }

    #[test]
    fn test_translate_identity() {
        // A mutation contained in the template translates to itself over the
        // full window.
        let muts = [
            Mutation::deletion(2, 2),
            Mutation::insertion(4, *b"GG"),
            Mutation::substitution(0, *b"TT"),
        ];
        for m in &muts {
            assert_eq!(m.translate(0, 10), Some(m.clone()), "{m}");
        }
    }

    #[test]
    fn test_translate_restricts_and_shifts() {
        let del = Mutation::deletion(2, 4);
        assert_eq!(del.translate(0, 4), Some(Mutation::deletion(2, 2)));
        assert_eq!(del.translate(3, 10), Some(Mutation::deletion(0, 3)));
        assert_eq!(del.translate(3, 2), Some(Mutation::deletion(0, 2)));

        let sub = Mutation::substitution(2, *b"ACGT");
        assert_eq!(sub.translate(4, 10), Some(Mutation::substitution(0, *b"GT")));
        assert_eq!(sub.translate(0, 3), Some(Mutation::substitution(2, *b"A")));
    }

    #[test]
    fn test_translate_disjoint() {
        let sub = Mutation::substitution(5, *b"A");
        assert_eq!(sub.translate(0, 5), None);
        assert_eq!(sub.translate(6, 4), None);

        let del = Mutation::deletion(0, 2);
        assert_eq!(del.translate(2, 5), None);
    }

    #[test]
    fn test_translate_insertion_touches_window_edges() {
        // Insertions at either window edge are kept; the window is extended
        // by one on the right.
        let at_left = Mutation::insertion(5, *b"C");
        assert_eq!(at_left.translate(5, 3), Some(Mutation::insertion(0, *b"C")));

        let at_right = Mutation::insertion(8, *b"C");
        assert_eq!(at_right.translate(5, 3), Some(Mutation::insertion(3, *b"C")));

        let beyond = Mutation::insertion(9, *b"C");
        assert_eq!(beyond.translate(5, 3), None);

        let before = Mutation::insertion(3, *b"C");
        assert_eq!(before.translate(5, 3), None);
    }

    #[test]
    fn test_apply_single_mutations() {
        let tpl = b"ACGT";
        assert_eq!(apply_mutations(tpl, &mut [Mutation::substitution(1, *b"T")]), b"ATGT");
        assert_eq!(apply_mutations(tpl, &mut [Mutation::deletion(0, 2)]), b"GT");
        assert_eq!(apply_mutations(tpl, &mut [Mutation::insertion(4, *b"AC")]), b"ACGTAC");
        assert_eq!(apply_mutations(tpl, &mut [Mutation::insertion(0, *b"T")]), b"TACGT");
    }

    #[test]
    fn test_apply_batch_is_discovery_order_independent() {
        let tpl = b"AACCGGTT";
        let a = Mutation::deletion(1, 1);
        let b = Mutation::substitution(4, *b"T");
        let c = Mutation::insertion(7, *b"AA");

        let mut fwd = vec![a.clone(), b.clone(), c.clone()];
        let mut rev = vec![c, a, b];
        let expected = b"ACCTGTAAT".to_vec();
        assert_eq!(apply_mutations(tpl, &mut fwd), expected);
        assert_eq!(apply_mutations(tpl, &mut rev), expected);
    }

    #[test]
    fn test_apply_empty_inputs() {
        assert_eq!(apply_mutations(b"ACGT", &mut []), b"ACGT".to_vec());
        assert_eq!(apply_mutations(b"", &mut [Mutation::insertion(0, *b"A")]), Vec::<u8>::new());
    }

    #[test]
    fn test_translate_then_apply_matches_apply_on_window() {
        // Applying a translated mutation to a window slice matches slicing
        // the fully mutated template, for a window-internal edit.
        let tpl = b"AAACGTAAA";
        let m = Mutation::substitution(4, *b"C");
        let translated = m.translate(3, 3).unwrap();

        let window = apply_mutations(&tpl[3..6], &mut [translated]);
        let full = apply_mutations(tpl, &mut [m]);
        assert_eq!(window, full[3..6].to_vec());
    }

    #[test]
    fn test_scored_mutation_ordering_and_pvalue() {
        let lo = Mutation::deletion(0, 1).with_score(-10.0);
        let hi = Mutation::deletion(0, 1).with_score(4.5);
        assert_eq!(ScoredMutation::cmp_score(&lo, &hi), Ordering::Less);

        let with_p = hi.clone().with_pvalue(1e-4);
        assert_eq!(with_p.pvalue, Some(1e-4));
        assert_eq!(with_p.score, 4.5);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Mutation::deletion(3, 2)), "Deletion(3, 2)");
        assert_eq!(format!("{}", Mutation::insertion(0, *b"AC")), "Insertion(0, \"AC\")");
        assert_eq!(format!("{}", Mutation::substitution(7, *b"G")), "Substitution(7, \"G\")");
    }
}
