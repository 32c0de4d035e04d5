//! Coordinate bijection from the evolving template back to the draft.
//!
//! Accepted mutation batches arrive in the coordinates of the template they
//! were applied to. The tracker rebases each batch into draft coordinates and
//! folds it into a sorted, non-overlapping list of replacement events, so a
//! site can be reported in draft coordinates no matter how many rounds of
//! edits happened in between, and later events shift correctly past earlier
//! ones.

use serde::Serialize;

use crate::dna::is_ambiguous;
use crate::mutation::Mutation;

/// A heterozygous call reported in draft coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiploidSite {
    /// Position in the original draft template
    pub original_position: usize,
    /// Base of the original draft at that position
    pub original_base: u8,
    /// IUPAC ambiguity code now in the polished template
    pub ambiguous_base: u8,
}

/// One net edit against the draft: `orig_length` draft bases starting at
/// `orig_start` are replaced by `bases`.
#[derive(Debug, Clone)]
struct TrackedEvent {
    orig_start: usize,
    orig_length: usize,
    bases: Vec<u8>,
}

impl TrackedEvent {
    fn length_diff(&self) -> isize {
        self.bases.len() as isize - self.orig_length as isize
    }
}

/// Tracks accepted mutations across polishing rounds against the draft.
#[derive(Debug, Clone)]
pub struct MutationTracker {
    original: Vec<u8>,
    /// Sorted by `orig_start`, pairwise non-overlapping
    events: Vec<TrackedEvent>,
}

impl MutationTracker {
    /// Starts tracking against a draft template.
    #[must_use]
    pub fn new(original_template: &[u8]) -> Self {
        MutationTracker { original: original_template.to_vec(), events: Vec::new() }
    }

    /// The draft template this tracker was built from.
    #[must_use]
    pub fn original_template(&self) -> &[u8] {
        &self.original
    }

    /// Folds in one accepted batch, given in the coordinates of the template
    /// the batch was applied to, sorted by site and pairwise non-overlapping.
    ///
    /// Each mutation is rebased through the length differences of the events
    /// preceding it, in O(events) per mutation. A mutation landing on an
    /// earlier event composes with it: substituting over previously written
    /// bases rewrites them, deleting previously inserted bases shrinks the
    /// insertion (cancelling it entirely once empty), and inserting inside a
    /// replacement grows it.
    ///
    /// The batch shares one coordinate frame, so it is folded in
    /// right-to-left, the same order it is applied to the template; every
    /// mutation then rebases against events untouched by its own batch.
    pub fn add_sorted_mutations(&mut self, muts: &[Mutation]) {
        for m in muts.iter().rev() {
            self.add_mutation(m);
        }
    }

    fn add_mutation(&mut self, m: &Mutation) {
        let mut cum: isize = 0;
        let mut idx = 0;
        loop {
            if idx == self.events.len() {
                let event = Self::standalone(m, cum);
                self.events.push(event);
                return;
            }
            let (cs, ce) = {
                let ev = &self.events[idx];
                let cs = (ev.orig_start as isize + cum) as usize;
                (cs, cs + ev.bases.len())
            };
            let lands_before = if m.is_insertion() { m.start() <= cs } else { m.end() <= cs };
            if lands_before {
                let event = Self::standalone(m, cum);
                self.events.insert(idx, event);
                return;
            }
            if m.start() >= ce {
                cum += self.events[idx].length_diff();
                idx += 1;
                continue;
            }
            self.compose(idx, cs, ce, cum, m);
            return;
        }
    }

    fn standalone(m: &Mutation, cum: isize) -> TrackedEvent {
        let orig_start = (m.start() as isize - cum) as usize;
        match m {
            Mutation::Insertion { bases, .. } => {
                TrackedEvent { orig_start, orig_length: 0, bases: bases.clone() }
            }
            Mutation::Deletion { length, .. } => {
                TrackedEvent { orig_start, orig_length: *length, bases: Vec::new() }
            }
            Mutation::Substitution { bases, .. } => {
                TrackedEvent { orig_start, orig_length: bases.len(), bases: bases.clone() }
            }
        }
    }

    /// Folds a mutation overlapping the current span `[cs, ce)` of event
    /// `idx` into the event list.
    fn compose(&mut self, idx: usize, cs: usize, ce: usize, cum: isize, m: &Mutation) {
        match m {
            Mutation::Insertion { start, bases } => {
                let offset = start - cs;
                self.events[idx].bases.splice(offset..offset, bases.iter().copied());
            }
            Mutation::Deletion { .. } => {
                let cancelled = {
                    let ev = &mut self.events[idx];
                    if m.start() < cs {
                        // The part left of the event deletes draft bases
                        // ahead of it; absorb them into the event.
                        let left = cs - m.start();
                        ev.orig_start -= left;
                        ev.orig_length += left;
                    }
                    let a = m.start().max(cs) - cs;
                    let b = m.end().min(ce) - cs;
                    ev.bases.drain(a..b);
                    if m.end() > ce {
                        ev.orig_length += m.end() - ce;
                    }
                    ev.bases.is_empty() && ev.orig_length == 0
                };
                if cancelled {
                    // A fully deleted insertion cancels out.
                    self.events.remove(idx);
                }
            }
            Mutation::Substitution { bases, .. } => {
                let mut at = idx;
                if m.start() < cs {
                    let left = cs - m.start();
                    let event = TrackedEvent {
                        orig_start: (m.start() as isize - cum) as usize,
                        orig_length: left,
                        bases: bases[..left].to_vec(),
                    };
                    self.events.insert(at, event);
                    at += 1;
                }
                let a = m.start().max(cs) - cs;
                let b = m.end().min(ce) - cs;
                let src = a + cs - m.start();
                let tail_start = {
                    let ev = &mut self.events[at];
                    ev.bases[a..b].copy_from_slice(&bases[src..src + (b - a)]);
                    ev.orig_start + ev.orig_length
                };
                if m.end() > ce {
                    let tail_len = m.end() - ce;
                    let event = TrackedEvent {
                        orig_start: tail_start,
                        orig_length: tail_len,
                        bases: bases[bases.len() - tail_len..].to_vec(),
                    };
                    self.events.insert(at + 1, event);
                }
            }
        }
    }

    /// Reports every ambiguity code in the current template against draft
    /// coordinates, as `(original position, original base, ambiguous base)`.
    #[must_use]
    pub fn mapping_to_original_template(&self) -> Vec<DiploidSite> {
        let mut sites = Vec::new();
        for ev in &self.events {
            for (i, &base) in ev.bases.iter().enumerate() {
                if is_ambiguous(base) {
                    let original_position = if ev.orig_length == 0 {
                        ev.orig_start
                    } else {
                        ev.orig_start + i.min(ev.orig_length - 1)
                    };
                    let original_base =
                        self.original.get(original_position).copied().unwrap_or(b'N');
                    sites.push(DiploidSite { original_position, original_base, ambiguous_base: base });
                }
            }
        }
        sites
    }

    /// Replays the accumulated events against the draft, reconstructing the
    /// current template. Diagnostic counterpart of the per-round application
    /// done by the driver.
    #[must_use]
    pub fn apply_to_original(&self) -> Vec<u8> {
        let mut tpl = self.original.clone();
        for ev in self.events.iter().rev() {
            tpl.splice(ev.orig_start..ev.orig_start + ev.orig_length, ev.bases.iter().copied());
        }
        tpl
    }
}
