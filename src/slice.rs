//! Bit-sliced encoding of a sorted key stream.
//!
//! One compressed bitmap per bit plane: bit `i` of slice `b` is the value of
//! bit plane `b` in the `i`-th key. Sorted neighbors share long prefixes, so
//! each plane flips rarely and run-length appends dominate. The encoder
//! tracks the previous key (whose bits are the current plane states) and the
//! last flip position per plane; a key contributes one XOR scan plus one run
//! append per changed plane.

use crate::bvec::{BitVec, BitVecBuilder};
use crate::encode::KmerCodec;

/// Streaming encoder over a strictly increasing key sequence.
pub struct SliceEncoder {
    nwords: usize,
    builders: Vec<BitVecBuilder>,
    prev: Vec<u64>,
    last_flip: Vec<u32>,
    n: u32,
}

impl SliceEncoder {
    pub fn new(nwords: usize) -> Self {
        let n_slices = 64 * nwords;
        SliceEncoder {
            nwords,
            builders: (0..n_slices).map(|_| BitVecBuilder::new()).collect(),
            prev: vec![0; nwords],
            last_flip: vec![0; n_slices],
            n: 0,
        }
    }

    /// Keys encoded so far.
    #[inline]
    pub fn len(&self) -> u32 {
        self.n
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn push(&mut self, key: &[u64]) {
        debug_assert_eq!(key.len(), self.nwords);
        if self.n == 0 {
            self.prev.copy_from_slice(key);
            self.n = 1;
            return;
        }
        debug_assert!(key > &self.prev[..], "keys must be strictly increasing");
        let i = self.n;
        for w in 0..self.nwords {
            let mut diff = self.prev[w] ^ key[w];
            while diff != 0 {
                let tz = diff.trailing_zeros();
                let b = w * 64 + (63 - tz as usize);
                let cur = (self.prev[w] >> tz) & 1 == 1;
                self.builders[b].append_run(cur, i - self.last_flip[b]);
                self.last_flip[b] = i;
                diff &= diff - 1;
            }
        }
        self.prev.copy_from_slice(key);
        self.n += 1;
    }

    /// Close all planes and return per-plane popcounts and bitmaps.
    pub fn finish(mut self) -> (Vec<u32>, Vec<BitVec>) {
        if self.n > 0 {
            for b in 0..self.builders.len() {
                let cur = KmerCodec::slice_bit(&self.prev, b);
                self.builders[b].append_run(cur, self.n - self.last_flip[b]);
            }
        }
        let slices: Vec<BitVec> = self.builders.into_iter().map(|b| b.finish()).collect();
        let counts = slices.iter().map(|s| s.count()).collect();
        (counts, slices)
    }
}
