//! Per-bin k-mer arena: a flat pre-allocated word buffer with a cursor,
//! plus in-place sort + multiplicity fold.

use crate::error::{Error, Result};

/// Fixed-capacity arena of packed k-mers belonging to one bin.
pub struct BinBuffer {
    words: Vec<u64>,
    nwords: usize,
    len: u32,
    capacity: u32,
}

impl BinBuffer {
    /// Allocate space for `capacity` keys of `nwords` words each.
    /// An allocation failure is reported, not aborted on.
    pub fn allocate(capacity: u32, nwords: usize) -> Result<Self> {
        let total = capacity as usize * nwords;
        let mut words = Vec::new();
        words.try_reserve_exact(total).map_err(|_| {
            Error::OutOfMemory(format!("bin arena of {} bytes", total * 8))
        })?;
        words.resize(total, 0);
        Ok(BinBuffer {
            words,
            nwords,
            len: 0,
            capacity,
        })
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Copy one key into the arena.
    #[inline]
    pub fn push(&mut self, key: &[u64]) {
        debug_assert!(self.len < self.capacity, "bin pushed past capacity");
        let at = self.len as usize * self.nwords;
        self.words[at..at + self.nwords].copy_from_slice(key);
        self.len += 1;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Stored keys, in arena order (sorted and distinct after
    /// [`sort_dedup`](Self::sort_dedup)).
    pub fn keys(&self) -> impl Iterator<Item = &[u64]> {
        self.words[..self.len as usize * self.nwords].chunks_exact(self.nwords)
    }

    /// Sort the occupied prefix, fold equal runs, and return the parallel
    /// multiplicity vector. Afterwards the arena holds the strictly
    /// increasing distinct keys and `len()` is their number.
    pub fn sort_dedup(&mut self) -> Vec<u32> {
        if self.len == 0 {
            return Vec::new();
        }
        // exactly one comparator width is dispatched per key size
        match self.nwords {
            1 => self.sort_dedup_w::<1>(),
            2 => self.sort_dedup_w::<2>(),
            3 => self.sort_dedup_w::<3>(),
            4 => self.sort_dedup_w::<4>(),
            5 => self.sort_dedup_w::<5>(),
            6 => self.sort_dedup_w::<6>(),
            7 => self.sort_dedup_w::<7>(),
            8 => self.sort_dedup_w::<8>(),
            _ => unreachable!("key width is capped at 8 words"),
        }
    }

    fn sort_dedup_w<const W: usize>(&mut self) -> Vec<u32> {
        let n = self.len as usize;
        let keys: &mut [[u64; W]] = bytemuck::cast_slice_mut(&mut self.words[..n * W]);
        keys.sort_unstable();
        let mut tally = Vec::with_capacity(n);
        tally.push(1u32);
        let mut distinct = 0usize;
        for i in 1..n {
            if keys[i] == keys[distinct] {
                tally[distinct] += 1;
            } else {
                distinct += 1;
                keys[distinct] = keys[i];
                tally.push(1);
            }
        }
        self.len = (distinct + 1) as u32;
        tally
    }
}
