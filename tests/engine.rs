use std::collections::HashMap;

use bitmer::{Error, KmerCounter, Mode};
use tempfile::TempDir;

const GENEROUS: usize = 1 << 20;
/// One k-mer per bin for single-word keys: spills on every insert.
const TINY: usize = 8 * bitmer::NBINS;

fn counted(
    k: usize,
    mode: Mode,
    seqs: &[&[u8]],
    budget: usize,
) -> (TempDir, KmerCounter) {
    let dir = TempDir::new().unwrap();
    let mut engine = KmerCounter::new(k, 2, dir.path(), mode).unwrap();
    engine.allocate(budget).unwrap();
    for seq in seqs {
        engine.add_sequence(seq).unwrap();
    }
    engine.save().unwrap();
    engine.load().unwrap();
    (dir, engine)
}

fn revcomp(s: &str) -> String {
    s.chars()
        .rev()
        .map(|c| match c {
            'A' => 'T',
            'C' => 'G',
            'G' => 'C',
            'T' => 'A',
            other => panic!("unexpected symbol {other}"),
        })
        .collect()
}

/// Reference counter over the same window semantics.
fn reference_counts(seq: &str, k: usize, mode: Mode) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    if seq.len() < k {
        return counts;
    }
    for i in 0..=seq.len() - k {
        let window = &seq[i..i + k];
        match mode {
            Mode::Raw => *counts.entry(window.to_string()).or_insert(0) += 1,
            Mode::Canonical => {
                let rc = revcomp(window);
                let canon = if window <= rc.as_str() { window.to_string() } else { rc };
                *counts.entry(canon).or_insert(0) += 1;
            }
            Mode::Both => {
                *counts.entry(window.to_string()).or_insert(0) += 1;
                *counts.entry(revcomp(window)).or_insert(0) += 1;
            }
        }
    }
    counts
}

fn reference_histogram(counts: &HashMap<String, u32>) -> Vec<(u32, u32)> {
    let mut by_freq: HashMap<u32, u32> = HashMap::new();
    for &c in counts.values() {
        *by_freq.entry(c).or_insert(0) += 1;
    }
    let mut hist: Vec<(u32, u32)> = by_freq.into_iter().collect();
    hist.sort_unstable();
    hist
}

#[test]
fn test_raw_counts_small_input() {
    // windows of ACGTAC: ACG CGT GTA TAC ACG
    let (_dir, mut engine) = counted(3, Mode::Raw, &[b"ACGTAC"], GENEROUS);
    let hist: Vec<_> = engine.histogram().unwrap().collect();
    assert_eq!(hist, vec![(1, 3), (2, 1)]);
    assert_eq!(engine.find(b"ACG").unwrap(), 2);
    assert_eq!(engine.find(b"CGT").unwrap(), 1);
    assert_eq!(engine.find(b"GTA").unwrap(), 1);
    assert_eq!(engine.find(b"TAC").unwrap(), 1);
    assert_eq!(engine.find(b"AAA").unwrap(), 0);
}

#[test]
fn test_canonical_collapses_strands() {
    // ACG and CGT are the same canonical 3-mer
    let (_dir, mut engine) = counted(3, Mode::Canonical, &[b"ACGT"], GENEROUS);
    let hist: Vec<_> = engine.histogram().unwrap().collect();
    assert_eq!(hist, vec![(2, 1)]);
    assert_eq!(engine.find(b"ACG").unwrap(), 2);
    assert_eq!(engine.find(b"CGT").unwrap(), 2);
}

#[test]
fn test_canonical_homopolymer() {
    let (_dir, mut engine) = counted(4, Mode::Canonical, &[b"AAAAAA"], GENEROUS);
    let hist: Vec<_> = engine.histogram().unwrap().collect();
    assert_eq!(hist, vec![(3, 1)]);
    assert_eq!(engine.find(b"AAAA").unwrap(), 3);
    assert_eq!(engine.find(b"TTTT").unwrap(), 3);
}

#[test]
fn test_both_mode_stores_each_strand() {
    let (_dir, mut engine) = counted(3, Mode::Both, &[b"ACG"], GENEROUS);
    let hist: Vec<_> = engine.histogram().unwrap().collect();
    assert_eq!(hist, vec![(1, 2)]);
    assert_eq!(engine.find(b"ACG").unwrap(), 1);
    assert_eq!(engine.find(b"CGT").unwrap(), 1);
    assert_eq!(engine.find(b"GGG").unwrap(), 0);
}

#[test]
fn test_input_shorter_than_k() {
    let (dir, mut engine) = counted(5, Mode::Raw, &[b"ACGT"], GENEROUS);
    assert_eq!(engine.histogram().unwrap().count(), 0);
    assert_eq!(engine.find(b"ACGTA").unwrap(), 0);
    // empty bins are still persisted
    assert!(dir.path().join("5-mers.0").exists());
    assert!(dir.path().join("5-mers.0.idx").exists());
    assert!(dir.path().join("5-mers.255").exists());
    assert!(!dir.path().join("5-mers.0.1").exists());
}

#[test]
fn test_merge_equals_single_batch() {
    let input: &[&[u8]] = &[b"ACGTACGTACGT"];
    let (_d1, mut spilled) = counted(3, Mode::Raw, input, TINY);
    let (_d2, mut single) = counted(3, Mode::Raw, input, GENEROUS);

    let h1: Vec<_> = spilled.histogram().unwrap().collect();
    let h2: Vec<_> = single.histogram().unwrap().collect();
    assert_eq!(h1, vec![(2, 2), (3, 2)]);
    assert_eq!(h1, h2);

    for mer in [&b"ACG"[..], b"CGT", b"GTA", b"TAC", b"CCC"] {
        assert_eq!(
            spilled.find(mer).unwrap(),
            single.find(mer).unwrap(),
            "{}",
            String::from_utf8_lossy(mer)
        );
    }
    assert_eq!(spilled.find(b"ACG").unwrap(), 3);
    assert_eq!(spilled.find(b"GTA").unwrap(), 2);
}

#[test]
fn test_batch_files_removed_after_merge() {
    let (dir, _engine) = counted(3, Mode::Raw, &[b"ACGTACGTACGT"], TINY);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| {
            name.trim_start_matches("3-mers.")
                .split('.')
                .nth(1)
                .is_some_and(|suffix| suffix != "idx")
        })
        .collect();
    assert!(leftovers.is_empty(), "stale batch files: {leftovers:?}");
}

#[test]
fn test_multi_word_keys_against_reference() {
    // k = 40 exercises two-word keys end to end
    let seq = "ACGTTGCAAGGCTTACGATCGATCGGCTAATCGGATCGATTACGCGCGTATATGCGC\
               TTAACGGCATCAGGTACCATCGGATC";
    let k = 40;
    let (_dir, mut engine) = counted(k, Mode::Canonical, &[seq.as_bytes()], GENEROUS);

    let expected = reference_counts(seq, k, Mode::Canonical);
    for (mer, &count) in &expected {
        assert_eq!(engine.find(mer.as_bytes()).unwrap(), count, "{mer}");
    }
    assert_eq!(engine.find(&b"A".repeat(k)).unwrap(), 0);

    let hist: Vec<_> = engine.histogram().unwrap().collect();
    assert_eq!(hist, reference_histogram(&expected));
}

#[test]
fn test_histogram_closure() {
    let seq = "ACGTTGCAAGGCTTACGATCGATCGGCTAATCGGATCGATT";
    let k = 5;
    let (_dir, engine) = counted(k, Mode::Raw, &[seq.as_bytes()], GENEROUS);
    let expected = reference_counts(seq, k, Mode::Raw);

    let hist: Vec<_> = engine.histogram().unwrap().collect();
    let occurrences: u32 = hist.iter().map(|&(f, n)| f * n).sum();
    let distinct: u32 = hist.iter().map(|&(_, n)| n).sum();
    assert_eq!(occurrences as usize, seq.len() - k + 1);
    assert_eq!(distinct as usize, expected.len());
}

#[test]
fn test_multiple_sequences_accumulate() {
    let (_dir, mut engine) = counted(3, Mode::Raw, &[b"ACGT", b"ACGT", b"AC"], GENEROUS);
    assert_eq!(engine.find(b"ACG").unwrap(), 2);
    assert_eq!(engine.find(b"CGT").unwrap(), 2);
    let hist: Vec<_> = engine.histogram().unwrap().collect();
    assert_eq!(hist, vec![(2, 2)]);
}

#[test]
fn test_state_machine_is_enforced() {
    let dir = TempDir::new().unwrap();
    let mut engine = KmerCounter::new(3, 1, dir.path(), Mode::Raw).unwrap();

    // ingest requires an allocation first
    assert!(matches!(engine.add_sequence(b"ACGT"), Err(Error::State(_))));
    engine.allocate(GENEROUS).unwrap();
    engine.add_sequence(b"ACGT").unwrap();

    // queries before load are rejected
    assert!(matches!(engine.find(b"ACG"), Err(Error::State(_))));
    assert!(matches!(engine.histogram(), Err(Error::State(_))));

    engine.save().unwrap();
    assert!(matches!(engine.add_sequence(b"ACGT"), Err(Error::State(_))));
    assert!(matches!(engine.save(), Err(Error::State(_))));

    engine.load().unwrap();
    assert_eq!(engine.find(b"ACG").unwrap(), 1);
    assert!(matches!(engine.find(b"ACGT"), Err(Error::Config(_))));
}

#[test]
fn test_invalid_construction() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        KmerCounter::new(0, 1, dir.path(), Mode::Raw),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        KmerCounter::new(257, 1, dir.path(), Mode::Raw),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        KmerCounter::new(3, 0, dir.path(), Mode::Raw),
        Err(Error::Config(_))
    ));

    let mut engine = KmerCounter::new(3, 1, dir.path(), Mode::Raw).unwrap();
    assert!(matches!(engine.allocate(7), Err(Error::OutOfMemory(_))));
}

#[test]
fn test_mode_parses_from_str() {
    assert_eq!("canonical".parse::<Mode>().unwrap(), Mode::Canonical);
    assert_eq!("RAW".parse::<Mode>().unwrap(), Mode::Raw);
    assert_eq!("Both".parse::<Mode>().unwrap(), Mode::Both);
    assert!("reverse".parse::<Mode>().is_err());
}
