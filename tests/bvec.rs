use std::collections::BTreeSet;

use bitmer::{BitVec, BitVecBuilder, Error};

fn word_count(dump: &[u8]) -> u32 {
    u32::from_le_bytes([dump[9], dump[10], dump[11], dump[12]])
}

#[test]
fn test_from_sorted_contains_exactly() {
    let positions = [0u32, 31, 62, 93];
    let v = BitVec::from_sorted(&positions);
    for p in 0..100 {
        assert_eq!(v.contains(p), positions.contains(&p), "position {p}");
    }
    assert_eq!(v.count(), 4);
    assert_eq!(v.len(), 94);
}

#[test]
fn test_sparse_positions_compress_to_fills() {
    let v = BitVec::from_sorted(&[100_000]);
    assert!(v.contains(100_000));
    assert!(!v.contains(99_999));
    assert_eq!(v.count(), 1);
    // a single gap fill plus the tail literal
    assert!(word_count(&v.dump()) <= 2, "sparse bitmap did not compress");
}

#[test]
fn test_dump_load_round_trip() {
    for positions in [
        vec![],
        vec![0u32],
        vec![0, 1, 2, 3, 4],
        vec![5, 40, 1000, 1031, 1062, 500_000],
    ] {
        let v = BitVec::from_sorted(&positions);
        let back = BitVec::load(&v.dump()).unwrap();
        assert_eq!(back, v);
    }
}

#[test]
fn test_load_rejects_garbage() {
    let v = BitVec::from_sorted(&[1, 2, 3]);
    let dump = v.dump();

    assert!(matches!(
        BitVec::load(&dump[..5]),
        Err(Error::CorruptBatch(_))
    ));

    let mut truncated = dump.clone();
    truncated.pop();
    assert!(matches!(
        BitVec::load(&truncated),
        Err(Error::CorruptBatch(_))
    ));

    let mut bad_encoding = dump.clone();
    bad_encoding[8] = 0;
    assert!(matches!(
        BitVec::load(&bad_encoding),
        Err(Error::CorruptBatch(_))
    ));
}

#[test]
fn test_union_intersect_against_sets() {
    let a: BTreeSet<u32> = [0u32, 3, 31, 64, 65, 200, 900].into_iter().collect();
    let b: BTreeSet<u32> = [3u32, 31, 100, 200, 901, 5000].into_iter().collect();
    let va = BitVec::from_sorted(&a.iter().copied().collect::<Vec<_>>());
    let vb = BitVec::from_sorted(&b.iter().copied().collect::<Vec<_>>());

    let or = va.union(&vb);
    let and = va.intersect(&vb);
    assert_eq!(or.count() as usize, a.union(&b).count());
    assert_eq!(and.count() as usize, a.intersection(&b).count());
    assert_eq!(or.len(), va.len().max(vb.len()));
    for p in 0..6000 {
        assert_eq!(or.contains(p), a.contains(&p) || b.contains(&p));
        assert_eq!(and.contains(p), a.contains(&p) && b.contains(&p));
    }
}

#[test]
fn test_ops_zero_extend_the_shorter_operand() {
    let short = BitVec::from_sorted(&[1]);
    let long = BitVec::from_sorted(&[1, 500]);
    assert_eq!(short.union(&long).count(), 2);
    assert_eq!(short.intersect(&long).count(), 1);
    assert!(short.union(&long).contains(500));
    assert!(!short.intersect(&long).contains(500));
}

#[test]
fn test_complement() {
    let mut b = BitVecBuilder::new();
    b.append_run(true, 10);
    b.append_run(false, 100);
    b.append_run(true, 7);
    let v = b.finish();
    let c = v.complement();
    assert_eq!(c.len(), v.len());
    assert_eq!(c.count(), v.len() - v.count());
    for p in 0..v.len() {
        assert_eq!(c.contains(p), !v.contains(p), "position {p}");
    }
    assert!(!c.contains(v.len()));
    assert_eq!(c.complement(), v);
}

#[test]
fn test_builder_matches_from_sorted() {
    let positions = [2u32, 3, 4, 70, 200, 201];
    let mut b = BitVecBuilder::new();
    let mut next = 0;
    for &p in &positions {
        b.append_run(false, p - next);
        b.append_run(true, 1);
        next = p + 1;
    }
    assert_eq!(b.finish(), BitVec::from_sorted(&positions));
}

#[test]
fn test_streaming_fill_coalescing_compresses() {
    // 10^5 zeros appended in small runs must collapse into one fill
    let mut b = BitVecBuilder::new();
    for _ in 0..1000 {
        b.append_run(false, 93);
    }
    b.append_run(true, 1);
    let v = b.finish();
    assert_eq!(v.count(), 1);
    assert!(v.contains(93_000));
    assert!(word_count(&v.dump()) <= 2);
}

#[test]
fn test_first_set() {
    assert_eq!(BitVec::from_sorted(&[]).first_set(), None);
    assert_eq!(BitVec::from_sorted(&[17]).first_set(), Some(17));
    assert_eq!(BitVec::from_sorted(&[4000, 4001]).first_set(), Some(4000));

    let mut b = BitVecBuilder::new();
    b.append_run(false, 62);
    b.append_run(true, 40);
    assert_eq!(b.finish().first_set(), Some(62));
}

#[test]
fn test_bits_cursor_matches_contains() {
    let v = BitVec::from_sorted(&[0, 5, 31, 32, 95, 400]);
    let decoded: Vec<bool> = v.bits().collect();
    assert_eq!(decoded.len(), v.len() as usize);
    for (p, &bit) in decoded.iter().enumerate() {
        assert_eq!(bit, v.contains(p as u32), "position {p}");
    }
}

#[test]
fn test_union_preserves_fill_coalescing() {
    // both operands are long zero fills; the result must stay compact
    let a = BitVec::from_sorted(&[200_000]);
    let b = BitVec::from_sorted(&[200_001]);
    let or = a.union(&b);
    assert_eq!(or.count(), 2);
    assert!(word_count(&or.dump()) <= 3);
}
