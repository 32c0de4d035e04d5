//! End-to-end polishing scenarios over synthetic read pileups.
//!
//! Run with: `cargo test --test polish_test`

use fgpolish::dna::reverse_complement;
use fgpolish::integrator::{Integrator, IntegratorConfig};
use fgpolish::polish::{polish, polish_repeats, PolishConfig, RepeatConfig};
use fgpolish::quality::{consensus_qualities, consensus_qvs};
use fgpolish::read::{MappedRead, Strand};

/// QV for every synthetic base call; Q10 keeps the error model permissive
/// enough that indel-bearing reads pass the z-score filter.
const TEST_QV: u8 = 10;

fn forward_read(name: &str, start: usize, end: usize, seq: &[u8]) -> MappedRead {
    MappedRead::with_uniform_qvs(name, Strand::Forward, start, end, seq, TEST_QV, "S/P2-C2/5.0")
        .unwrap()
}

/// A reverse-strand read observing `fwd_seq`; its base calls are the reverse
/// complement, as they come off the instrument.
fn reverse_read(name: &str, start: usize, end: usize, fwd_seq: &[u8]) -> MappedRead {
    MappedRead::with_uniform_qvs(
        name,
        Strand::Reverse,
        start,
        end,
        reverse_complement(fwd_seq),
        TEST_QV,
        "S/P2-C2/5.0",
    )
    .unwrap()
}

fn pileup(draft: &[u8], reads: &[MappedRead]) -> Integrator {
    let mut ai = Integrator::new(draft, IntegratorConfig::default()).unwrap();
    for read in reads {
        ai.add_read(read).unwrap();
    }
    ai
}

#[test]
fn test_identity_converges_without_edits() {
    let mut ai = pileup(b"ACGT", &[forward_read("r", 0, 4, b"ACGT")]);
    let result = polish(&mut ai, &PolishConfig::default()).unwrap();

    assert!(result.has_converged);
    assert_eq!(result.mutations_applied, 0);
    assert!(result.mutations_tested > 0);
    assert_eq!(ai.template(), b"ACGT");
}

#[test]
fn test_single_substitution_is_corrected() {
    let reads: Vec<MappedRead> =
        (0..20).map(|i| forward_read(&format!("r{i}"), 0, 4, b"ACGT")).collect();
    let mut ai = pileup(b"ACCT", &reads);

    let cfg = PolishConfig { max_iterations: 10, mutation_separation: 10, ..Default::default() };
    let result = polish(&mut ai, &cfg).unwrap();

    assert!(result.has_converged);
    assert_eq!(ai.template(), b"ACGT");
    assert_eq!(result.mutations_applied, 1);
    // Diagnostics are recorded once per applied round.
    assert_eq!(result.max_alpha_populated.len(), 1);
    assert_eq!(result.max_num_flip_flops, vec![0]);
}

#[test]
fn test_homopolymer_deletion_happens_at_run_start() {
    let reads: Vec<MappedRead> =
        (0..20).map(|i| forward_read(&format!("r{i}"), 0, 5, b"AAAA")).collect();
    let mut ai = pileup(b"AAAAA", &reads);

    let result = polish(&mut ai, &PolishConfig::default()).unwrap();

    assert!(result.has_converged);
    assert_eq!(ai.template(), b"AAAA");
    assert_eq!(result.mutations_applied, 1);
}

#[test]
fn test_mixed_strand_pileup_converges() {
    let draft = b"ACCTA";
    let truth = b"ACGTA";
    let mut reads = Vec::new();
    for i in 0..10 {
        reads.push(forward_read(&format!("fwd{i}"), 0, 5, truth));
        reads.push(reverse_read(&format!("rev{i}"), 0, 5, truth));
    }
    let mut ai = pileup(draft, &reads);

    let result = polish(&mut ai, &PolishConfig::default()).unwrap();

    assert!(result.has_converged);
    assert_eq!(ai.template(), truth);
}

#[test]
fn test_repeat_expansion_inserts_one_unit() {
    let reads: Vec<MappedRead> =
        (0..20).map(|i| forward_read(&format!("r{i}"), 0, 4, b"ACACAC")).collect();
    let mut ai = pileup(b"ACAC", &reads);

    let cfg = RepeatConfig { max_repeat_size: 2, min_element_count: 2, max_iterations: 40 };
    let result = polish_repeats(&mut ai, &cfg).unwrap();

    assert!(result.has_converged);
    assert_eq!(ai.template(), b"ACACAC");
    assert_eq!(result.mutations_applied, 1);
}

#[test]
fn test_diploid_snp_is_called_with_ambiguity_code() {
    // Half the reads carry A, half carry T at position 2.
    let mut reads = Vec::new();
    for i in 0..10 {
        reads.push(forward_read(&format!("a{i}"), 0, 4, b"ACAT"));
        reads.push(forward_read(&format!("t{i}"), 0, 4, b"ACTT"));
    }
    let mut ai = pileup(b"ACAT", &reads);

    let cfg = PolishConfig { diploid: true, ..Default::default() };
    let result = polish(&mut ai, &cfg).unwrap();

    assert!(result.has_converged);
    assert_eq!(ai.template(), b"ACWT");

    assert_eq!(result.diploid_sites.len(), 1);
    let site = &result.diploid_sites[0];
    assert_eq!(site.original_position, 2);
    assert_eq!(site.original_base, b'A');
    assert_eq!(site.ambiguous_base, b'W');
}

#[test]
fn test_diploid_mode_leaves_haploid_pileup_alone() {
    let reads: Vec<MappedRead> =
        (0..20).map(|i| forward_read(&format!("r{i}"), 0, 4, b"ACGT")).collect();
    let mut ai = pileup(b"ACGT", &reads);

    let cfg = PolishConfig { diploid: true, ..Default::default() };
    let result = polish(&mut ai, &cfg).unwrap();

    assert!(result.has_converged);
    assert_eq!(ai.template(), b"ACGT");
    assert!(result.diploid_sites.is_empty());
}

#[test]
fn test_histogram_properties_on_real_pileup() {
    let mut reads = Vec::new();
    for i in 0..10 {
        reads.push(forward_read(&format!("g{i}"), 0, 5, b"ACGTA"));
        reads.push(forward_read(&format!("t{i}"), 0, 5, b"ACTTA"));
    }
    let ai = pileup(b"ACGTA", &reads);

    for pos in 0..5 {
        let histogram =
            ai.best_mutation_histogram(pos, fgpolish::mutation::MutationKind::Substitution);
        let total: usize = histogram.iter().map(|(_, c)| c).sum();
        assert!(total <= ai.num_evaluators());
        assert!(histogram.windows(2).all(|w| w[0].1 >= w[1].1), "histogram must be sorted");
    }
}

#[test]
fn test_quality_values_on_polished_template() {
    let reads: Vec<MappedRead> =
        (0..20).map(|i| forward_read(&format!("r{i}"), 0, 4, b"ACGT")).collect();
    let mut ai = pileup(b"ACCT", &reads);
    polish(&mut ai, &PolishConfig::default()).unwrap();
    assert_eq!(ai.template(), b"ACGT");

    let qvs = consensus_qvs(&mut ai).unwrap();
    let len = ai.template_length();
    assert_eq!(qvs.qualities.len(), len);
    assert_eq!(qvs.deletion_qvs.len(), len);
    assert_eq!(qvs.insertion_qvs.len(), len);
    assert_eq!(qvs.substitution_qvs.len(), len);

    // With 20 concordant reads every alternative is deeply implausible.
    assert!(qvs.qualities.iter().all(|&q| q > 30));

    // The overall track matches the dedicated traversal.
    let quals = consensus_qualities(&mut ai).unwrap();
    assert_eq!(quals, qvs.qualities);
}

#[test]
fn test_quality_values_reflect_coverage() {
    // One read gives shaky quality; twenty give high quality.
    let mut thin = pileup(b"ACGT", &[forward_read("r", 0, 4, b"ACGT")]);
    let thin_quals = consensus_qualities(&mut thin).unwrap();

    let reads: Vec<MappedRead> =
        (0..20).map(|i| forward_read(&format!("r{i}"), 0, 4, b"ACGT")).collect();
    let mut deep = pileup(b"ACGT", &reads);
    let deep_quals = consensus_qualities(&mut deep).unwrap();

    for (thin_q, deep_q) in thin_quals.iter().zip(&deep_quals) {
        assert!(deep_q > thin_q, "coverage should raise QV: {thin_q} vs {deep_q}");
    }
}

#[test]
fn test_masked_integrator_still_polishes_clean_regions() {
    // All reads agree the draft's C at position 2 should be G; masking with
    // a generous threshold leaves that signal intact.
    let reads: Vec<MappedRead> =
        (0..20).map(|i| forward_read(&format!("r{i}"), 0, 8, b"ACGTACGT")).collect();
    let mut ai = pileup(b"ACCTACGT", &reads);
    ai.mask_intervals(2, 0.8);

    let result = polish(&mut ai, &PolishConfig::default()).unwrap();
    assert!(result.has_converged);
    assert_eq!(ai.template(), b"ACGTACGT");
}
