//! Range-encoded bitmap index over a frequency vector.
//!
//! For sorted distinct values `V[0..m)`, bitmap `j` marks every position
//! whose value is `<= V[j]`. The last bitmap is all-ones, each bitmap is a
//! superset of its predecessor, and `count(j) - count(j-1)` is the number of
//! positions holding exactly `V[j]`. Point lookup walks the bitmaps from the
//! smallest value up.

use crate::bvec::BitVec;

/// Frequency index of one bin.
pub struct RangeIndex {
    values: Vec<u32>,
    bitmaps: Vec<BitVec>,
}

impl RangeIndex {
    /// Build from a multiplicity vector.
    pub fn build(tally: &[u32]) -> RangeIndex {
        // distinct values: bucket bitmap for < 256, sort-dedup above
        let mut small = [0u64; 4];
        let mut large: Vec<u32> = Vec::new();
        for &v in tally {
            if v < 256 {
                small[(v >> 6) as usize] |= 1 << (v & 63);
            } else {
                large.push(v);
            }
        }
        large.sort_unstable();
        large.dedup();
        let mut values = Vec::new();
        for (w, &bits) in small.iter().enumerate() {
            let mut bits = bits;
            while bits != 0 {
                values.push((w as u32) * 64 + bits.trailing_zeros());
                bits &= bits - 1;
            }
        }
        values.extend(large);

        let m = values.len();
        let mut positions: Vec<Vec<u32>> = vec![Vec::new(); m];
        for (i, &v) in tally.iter().enumerate() {
            let j = values.partition_point(|&x| x < v);
            for p in &mut positions[j..] {
                p.push(i as u32);
            }
        }
        let bitmaps = positions.iter().map(|p| BitVec::from_sorted(p)).collect();
        RangeIndex { values, bitmaps }
    }

    pub(crate) fn from_parts(values: Vec<u32>, bitmaps: Vec<BitVec>) -> RangeIndex {
        RangeIndex { values, bitmaps }
    }

    /// Number of distinct values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn values(&self) -> &[u32] {
        &self.values
    }

    #[inline]
    pub fn bitmaps(&self) -> &[BitVec] {
        &self.bitmaps
    }

    /// Positions holding a value `<= values()[j]`.
    #[inline]
    pub fn count_le(&self, j: usize) -> u32 {
        self.bitmaps[j].count()
    }

    /// Value stored at `pos`; 0 when the position is out of range.
    pub fn pos2value(&self, pos: u32) -> u32 {
        for (j, c) in self.bitmaps.iter().enumerate() {
            if c.contains(pos) {
                return self.values[j];
            }
        }
        0
    }
}
