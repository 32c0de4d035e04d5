//! Mapped reads and evaluator lifecycle states.

use crate::errors::{PolishError, Result};

/// Strand a read maps to, relative to the forward template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    /// Read bases align to the forward template
    Forward,
    /// Read bases align to the reverse complement of the template
    Reverse,
}

/// Lifecycle state of an evaluator.
///
/// Only `Valid` evaluators contribute to aggregate likelihoods. Once an
/// evaluator leaves `Valid` it is never revived; disabled evaluators stay in
/// place so externally held indices remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Contributing to aggregate likelihoods
    Valid,
    /// Disabled after a scoring failure
    Disabled,
    /// Filtered out by the z-score threshold at construction
    PoorZScore,
    /// Disabled after a non-finite likelihood
    Numerical,
}

impl State {
    /// True only for [`State::Valid`].
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, State::Valid)
    }
}

/// A read pre-mapped to an interval of the forward template, together with
/// the per-base quality feature tracks the pair-HMM consumes.
///
/// All tracks run in the read's native orientation and have one entry per
/// base call. The merge QV and deletion tag are carried for model
/// parameterization; the compact bundled model reads only the insertion,
/// deletion, and substitution QVs.
#[derive(Debug, Clone)]
pub struct MappedRead {
    /// Read name
    pub name: String,
    /// Mapped strand
    pub strand: Strand,
    /// Start of the mapped interval on the forward template (inclusive)
    pub start: usize,
    /// End of the mapped interval on the forward template (exclusive)
    pub end: usize,
    /// Base calls
    pub seq: Vec<u8>,
    /// Per-base insertion QV
    pub ins_qv: Vec<u8>,
    /// Per-base deletion QV
    pub del_qv: Vec<u8>,
    /// Per-base substitution QV
    pub sub_qv: Vec<u8>,
    /// Per-base merge QV
    pub merge_qv: Vec<u8>,
    /// Per-base most-likely deleted base
    pub del_tag: Vec<u8>,
    /// Chemistry identifier for model selection
    pub chemistry: String,
}

impl MappedRead {
    /// Builds a read whose four QV tracks all hold the same value and whose
    /// deletion tag is all `N`.
    pub fn with_uniform_qvs(
        name: impl Into<String>,
        strand: Strand,
        start: usize,
        end: usize,
        seq: impl Into<Vec<u8>>,
        qv: u8,
        chemistry: impl Into<String>,
    ) -> Result<Self> {
        let seq = seq.into();
        let len = seq.len();
        let read = MappedRead {
            name: name.into(),
            strand,
            start,
            end,
            seq,
            ins_qv: vec![qv; len],
            del_qv: vec![qv; len],
            sub_qv: vec![qv; len],
            merge_qv: vec![qv; len],
            del_tag: vec![b'N'; len],
            chemistry: chemistry.into(),
        };
        read.validate()?;
        Ok(read)
    }

    /// Number of base calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    /// True when the read has no base calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Checks structural invariants: a nonempty sequence, a nonempty mapped
    /// interval, and feature tracks as long as the sequence.
    pub fn validate(&self) -> Result<()> {
        if self.seq.is_empty() {
            return Err(PolishError::InvalidParameter {
                parameter: "seq".to_string(),
                reason: format!("read '{}' has no base calls", self.name),
            });
        }
        if self.start >= self.end {
            return Err(PolishError::InvalidParameter {
                parameter: "start/end".to_string(),
                reason: format!(
                    "read '{}' has an empty mapped interval [{}, {})",
                    self.name, self.start, self.end
                ),
            });
        }
        let len = self.seq.len();
        for (track, track_len) in [
            ("ins_qv", self.ins_qv.len()),
            ("del_qv", self.del_qv.len()),
            ("sub_qv", self.sub_qv.len()),
            ("merge_qv", self.merge_qv.len()),
            ("del_tag", self.del_tag.len()),
        ] {
            if track_len != len {
                return Err(PolishError::InvalidParameter {
                    parameter: track.to_string(),
                    reason: format!(
                        "read '{}': track has {track_len} entries for {len} base calls",
                        self.name
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_uniform_qvs() {
        let read =
            MappedRead::with_uniform_qvs("r1", Strand::Forward, 0, 4, *b"ACGT", 10, "S/P1-C1")
                .unwrap();
        assert_eq!(read.len(), 4);
        assert!(!read.is_empty());
        assert_eq!(read.ins_qv, vec![10; 4]);
        assert_eq!(read.del_tag, vec![b'N'; 4]);
        assert_eq!(read.chemistry, "S/P1-C1");
    }

    #[test]
    fn test_validate_rejects_empty_read() {
        let err = MappedRead::with_uniform_qvs("r1", Strand::Forward, 0, 4, *b"", 10, "")
            .unwrap_err();
        assert!(format!("{err}").contains("no base calls"));
    }

    #[test]
    fn test_validate_rejects_empty_interval() {
        let err = MappedRead::with_uniform_qvs("r1", Strand::Forward, 4, 4, *b"ACGT", 10, "")
            .unwrap_err();
        assert!(format!("{err}").contains("empty mapped interval"));
    }

    #[test]
    fn test_validate_rejects_short_track() {
        let mut read =
            MappedRead::with_uniform_qvs("r1", Strand::Reverse, 0, 4, *b"ACGT", 10, "").unwrap();
        read.sub_qv.pop();
        let err = read.validate().unwrap_err();
        assert!(format!("{err}").contains("sub_qv"));
    }

    #[test]
    fn test_state_is_active() {
        assert!(State::Valid.is_active());
        assert!(!State::Disabled.is_active());
        assert!(!State::PoorZScore.is_active());
        assert!(!State::Numerical.is_active());
    }
}
