//! Word-Aligned Hybrid (WAH) compressed bitmap over a 32-bit position space.
//!
//! Each 32-bit word is either a *literal* (bit 31 clear; payload bits 0..=30
//! hold 31 positions, LSB first) or a *fill* (bit 31 set, bit 30 the fill
//! value, bits 0..=29 the run length counted in 31-bit groups). A bitmap
//! carries its logical bit length and a cached popcount.
//!
//! Layout invariants maintained by every constructor and operator:
//! - adjacent fills of the same value are coalesced;
//! - when the length is not a multiple of 31, the trailing group is stored
//!   as a literal whose bits past the logical length are zero.

use byteorder::{LittleEndian as LE, ReadBytesExt};

use crate::error::{Error, Result};

const FILL_FLAG: u32 = 1 << 31;
const FILL_VALUE: u32 = 1 << 30;
const FILL_LEN_MASK: u32 = (1 << 30) - 1;
const LITERAL_MASK: u32 = (1 << 31) - 1;

/// Maximum addressable position count.
const MAX_BITS: u64 = 1 << 31;

/// Compressed bitmap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitVec {
    words: Vec<u32>,
    nbits: u32,
    count: u32,
}

impl BitVec {
    /// Build from an ordered, strictly increasing position list.
    /// Gaps of 31 bits or more become fill words.
    pub fn from_sorted(positions: &[u32]) -> BitVec {
        let mut b = BitVecBuilder::new();
        let mut next = 0u32;
        for &p in positions {
            assert!(p >= next, "positions must be strictly increasing");
            b.append_run(false, p - next);
            b.append_run(true, 1);
            next = p + 1;
        }
        b.finish()
    }

    /// Logical length in bits.
    #[inline]
    pub fn len(&self) -> u32 {
        self.nbits
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    /// Cached number of set bits.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Test a single position. Positions past the logical length are unset.
    pub fn contains(&self, pos: u32) -> bool {
        if pos >= self.nbits {
            return false;
        }
        let mut base = 0u32;
        for &w in &self.words {
            if w & FILL_FLAG != 0 {
                let span = (w & FILL_LEN_MASK) * 31;
                if pos < base + span {
                    return w & FILL_VALUE != 0;
                }
                base += span;
            } else {
                if pos < base + 31 {
                    return (w >> (pos - base)) & 1 == 1;
                }
                base += 31;
            }
        }
        false
    }

    /// Position of the lowest set bit, if any.
    pub fn first_set(&self) -> Option<u32> {
        let mut base = 0u32;
        for &w in &self.words {
            if w & FILL_FLAG != 0 {
                let span = (w & FILL_LEN_MASK) * 31;
                if w & FILL_VALUE != 0 && span > 0 {
                    return Some(base);
                }
                base += span;
            } else {
                if w != 0 {
                    return Some(base + w.trailing_zeros());
                }
                base += 31;
            }
        }
        None
    }

    /// Sequential cursor over all positions, in order.
    pub fn bits(&self) -> Bits<'_> {
        Bits {
            words: &self.words,
            idx: 0,
            span_left: 0,
            is_fill: false,
            value: false,
            literal: 0,
            remaining: self.nbits,
        }
    }

    /// Bitwise OR. The shorter operand is zero-extended.
    pub fn union(&self, other: &BitVec) -> BitVec {
        binary_op(self, other, |a, b| a | b)
    }

    /// Bitwise AND. The shorter operand is zero-extended.
    pub fn intersect(&self, other: &BitVec) -> BitVec {
        binary_op(self, other, |a, b| a & b)
    }

    /// Bitwise NOT over the logical length.
    pub fn complement(&self) -> BitVec {
        let mut words: Vec<u32> = self
            .words
            .iter()
            .map(|&w| {
                if w & FILL_FLAG != 0 {
                    w ^ FILL_VALUE
                } else {
                    !w & LITERAL_MASK
                }
            })
            .collect();
        // the trailing group is a literal by construction; re-zero its pad
        let rem = self.nbits % 31;
        if rem != 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1 << rem) - 1;
            }
        }
        BitVec {
            words,
            nbits: self.nbits,
            count: self.nbits - self.count,
        }
    }

    /// Serialize: `{nbits: u32, count: u32, rle: u8, word_count: u32}` header
    /// (little-endian) followed by the 32-bit words. The layout is fixed.
    pub fn dump(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(13 + 4 * self.words.len());
        out.extend_from_slice(&self.nbits.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.push(1u8); // run-length encoded body
        out.extend_from_slice(&(self.words.len() as u32).to_le_bytes());
        out.extend_from_slice(bytemuck::cast_slice::<u32, u8>(&self.words));
        out
    }

    /// Inverse of [`dump`](Self::dump).
    pub fn load(bytes: &[u8]) -> Result<BitVec> {
        let mut r = bytes;
        let err = |what: &str| Error::CorruptBatch(format!("bitmap record: {what}"));
        let nbits = r.read_u32::<LE>().map_err(|_| err("short header"))?;
        let count = r.read_u32::<LE>().map_err(|_| err("short header"))?;
        let rle = r.read_u8().map_err(|_| err("short header"))?;
        let nwords = r.read_u32::<LE>().map_err(|_| err("short header"))? as usize;
        if rle != 1 {
            return Err(err("unsupported body encoding"));
        }
        if r.len() != 4 * nwords {
            return Err(err("word count mismatch"));
        }
        let words = r
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(BitVec {
            words,
            nbits,
            count,
        })
    }
}

/// Sequential bit cursor returned by [`BitVec::bits`].
pub struct Bits<'a> {
    words: &'a [u32],
    idx: usize,
    span_left: u32,
    is_fill: bool,
    value: bool,
    literal: u32,
    remaining: u32,
}

impl Iterator for Bits<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.remaining == 0 {
            return None;
        }
        while self.span_left == 0 {
            let w = self.words[self.idx];
            self.idx += 1;
            if w & FILL_FLAG != 0 {
                self.is_fill = true;
                self.value = w & FILL_VALUE != 0;
                self.span_left = (w & FILL_LEN_MASK) * 31;
            } else {
                self.is_fill = false;
                self.literal = w;
                self.span_left = 31;
            }
        }
        self.remaining -= 1;
        self.span_left -= 1;
        if self.is_fill {
            Some(self.value)
        } else {
            let bit = self.literal & 1 == 1;
            self.literal >>= 1;
            Some(bit)
        }
    }
}

/// Compressed word sink shared by the builder and the binary operators.
#[derive(Default)]
struct Appender {
    words: Vec<u32>,
    count: u32,
}

impl Appender {
    fn push_fill(&mut self, value: bool, groups: u32) {
        if groups == 0 {
            return;
        }
        if value {
            self.count += groups * 31;
        }
        if let Some(last) = self.words.last_mut() {
            if *last & FILL_FLAG != 0 && (*last & FILL_VALUE != 0) == value {
                *last += groups;
                return;
            }
        }
        self.words
            .push(FILL_FLAG | if value { FILL_VALUE } else { 0 } | groups);
    }

    fn push_literal(&mut self, word: u32) {
        debug_assert_eq!(word & FILL_FLAG, 0);
        if word == 0 {
            self.push_fill(false, 1);
        } else if word == LITERAL_MASK {
            self.push_fill(true, 1);
        } else {
            self.count += word.count_ones();
            self.words.push(word);
        }
    }

    // Trailing partial group: always a literal, never folded into a fill.
    fn push_tail_literal(&mut self, word: u32) {
        debug_assert_eq!(word & FILL_FLAG, 0);
        self.count += word.count_ones();
        self.words.push(word);
    }
}

/// Streaming constructor: monotone runs in, compressed bitmap out.
///
/// A partial literal is held in a dirty register until it fills or
/// [`finish`](Self::finish) pads it with zeros. Adjacent fills of the same
/// value coalesce.
pub struct BitVecBuilder {
    app: Appender,
    pending: u32,
    pending_len: u32,
    nbits: u32,
}

impl Default for BitVecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BitVecBuilder {
    pub fn new() -> Self {
        BitVecBuilder {
            app: Appender::default(),
            pending: 0,
            pending_len: 0,
            nbits: 0,
        }
    }

    /// Bits appended so far.
    #[inline]
    pub fn len(&self) -> u32 {
        self.nbits
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    /// Append `len` copies of `value`.
    pub fn append_run(&mut self, value: bool, len: u32) {
        if len == 0 {
            return;
        }
        assert!(
            self.nbits as u64 + len as u64 <= MAX_BITS,
            "bitmap exceeds the 2^31 position space"
        );
        self.nbits += len;
        let mut len = len;
        if self.pending_len > 0 {
            let take = len.min(31 - self.pending_len);
            if value {
                self.pending |= ((1 << take) - 1) << self.pending_len;
            }
            self.pending_len += take;
            len -= take;
            if self.pending_len == 31 {
                let w = self.pending;
                self.pending = 0;
                self.pending_len = 0;
                self.app.push_literal(w);
            }
        }
        let groups = len / 31;
        if groups > 0 {
            self.app.push_fill(value, groups);
            len -= groups * 31;
        }
        if len > 0 {
            if value {
                self.pending = (1 << len) - 1;
            }
            self.pending_len = len;
        }
    }

    pub fn finish(mut self) -> BitVec {
        if self.pending_len > 0 {
            self.app.push_tail_literal(self.pending);
        }
        BitVec {
            words: self.app.words,
            nbits: self.nbits,
            count: self.app.count,
        }
    }
}

/// Run decoder over one operand of a binary operation. Past the last word it
/// synthesizes an endless zero fill, which zero-extends the shorter operand.
struct RunDecoder<'a> {
    iter: std::slice::Iter<'a, u32>,
    is_fill: bool,
    value: bool,
    literal: u32,
    left: u32,
}

impl<'a> RunDecoder<'a> {
    fn new(words: &'a [u32]) -> Self {
        RunDecoder {
            iter: words.iter(),
            is_fill: false,
            value: false,
            literal: 0,
            left: 0,
        }
    }

    fn refill(&mut self) {
        loop {
            match self.iter.next() {
                Some(&w) if w & FILL_FLAG != 0 => {
                    let len = w & FILL_LEN_MASK;
                    if len == 0 {
                        continue; // degenerate fill, skip
                    }
                    self.is_fill = true;
                    self.value = w & FILL_VALUE != 0;
                    self.left = len;
                    return;
                }
                Some(&w) => {
                    self.is_fill = false;
                    self.literal = w;
                    self.left = 1;
                    return;
                }
                None => {
                    self.is_fill = true;
                    self.value = false;
                    self.left = u32::MAX;
                    return;
                }
            }
        }
    }

    #[inline]
    fn group_word(&self) -> u32 {
        if self.is_fill {
            if self.value { LITERAL_MASK } else { 0 }
        } else {
            self.literal
        }
    }
}

fn binary_op(a: &BitVec, b: &BitVec, f: impl Fn(u32, u32) -> u32) -> BitVec {
    let nbits = a.nbits.max(b.nbits);
    let total_groups = nbits.div_ceil(31);
    let partial = nbits % 31 != 0;
    let full_groups = if partial {
        total_groups - 1
    } else {
        total_groups
    };

    let mut out = Appender::default();
    let mut da = RunDecoder::new(&a.words);
    let mut db = RunDecoder::new(&b.words);

    let mut g = 0u32;
    while g < full_groups {
        if da.left == 0 {
            da.refill();
        }
        if db.left == 0 {
            db.refill();
        }
        if da.is_fill && db.is_fill {
            let n = da.left.min(db.left).min(full_groups - g);
            let combined = f(da.group_word(), db.group_word());
            out.push_fill(combined == LITERAL_MASK, n);
            da.left -= n;
            db.left -= n;
            g += n;
        } else {
            out.push_literal(f(da.group_word(), db.group_word()) & LITERAL_MASK);
            da.left -= 1;
            db.left -= 1;
            g += 1;
        }
    }
    if partial {
        if da.left == 0 {
            da.refill();
        }
        if db.left == 0 {
            db.refill();
        }
        out.push_tail_literal(f(da.group_word(), db.group_word()) & LITERAL_MASK);
    }

    BitVec {
        words: out.words,
        nbits,
        count: out.count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_coalesce_across_appends() {
        let mut b = BitVecBuilder::new();
        b.append_run(true, 31);
        b.append_run(true, 62);
        b.append_run(false, 31);
        b.append_run(false, 31);
        let v = b.finish();
        // one fill of 3 one-groups, one fill of 2 zero-groups
        assert_eq!(v.words, vec![FILL_FLAG | FILL_VALUE | 3, FILL_FLAG | 2]);
        assert_eq!(v.count(), 93);
        assert_eq!(v.len(), 155);
    }

    #[test]
    fn trailing_partial_group_stays_literal() {
        let mut b = BitVecBuilder::new();
        b.append_run(false, 40);
        let v = b.finish();
        assert_eq!(v.words, vec![FILL_FLAG | 1, 0]);
        assert_eq!(v.len(), 40);
        assert_eq!(v.count(), 0);
    }

    #[test]
    fn complement_keeps_pad_clear() {
        let mut b = BitVecBuilder::new();
        b.append_run(false, 40);
        let v = b.finish().complement();
        assert_eq!(v.count(), 40);
        assert!(v.contains(39));
        assert!(!v.contains(40));
        assert_eq!(v.complement().count(), 0);
    }
}
