//! Multi-way merge of one bin's spilled batches into its final files.
//!
//! Every batch holds a strictly increasing key sequence, stored bit-sliced;
//! the merge re-materializes each sequence through per-plane bit cursors,
//! takes the minimum key across batches, collapses equal keys by summing
//! their multiplicities, and streams the result straight back into a fresh
//! slice encoder. Batch files are removed only after the merged files are
//! written; on error they stay behind for a retry.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::batch;
use crate::bvec::Bits;
use crate::encode::KmerCodec;
use crate::error::{Error, Result};
use crate::range::RangeIndex;
use crate::slice::SliceEncoder;

/// Merge batches `1..=batches` of `bin` and write the final file pair.
pub fn merge_bin(codec: &KmerCodec, outdir: &Path, bin: usize, batches: u32) -> Result<()> {
    let k = codec.k();
    let nb = batches as usize;

    let mut slices = Vec::with_capacity(nb);
    let mut indexes = Vec::with_capacity(nb);
    for b in 1..=batches {
        let path = batch::batch_mer_path(outdir, k, bin, b);
        let (_counts, s) = batch::read_slices_file(&path)?;
        if s.len() != codec.n_slices() {
            return Err(Error::CorruptBatch(format!(
                "{}: {} slices, expected {}",
                path.display(),
                s.len(),
                codec.n_slices()
            )));
        }
        slices.push(s);
        indexes.push(batch::read_index_file(&batch::batch_index_path(
            outdir, k, bin, b,
        ))?);
    }

    let nw = codec.nwords();
    let mut cursors: Vec<Vec<Bits<'_>>> = slices
        .iter()
        .map(|s| s.iter().map(|v| v.bits()).collect())
        .collect();

    let mut cur = vec![vec![0u64; nw]; nb];
    let mut cur_tally = vec![0u32; nb];
    let mut offset = vec![0u32; nb];
    let mut alive = vec![false; nb];
    let mut remaining = 0usize;
    for i in 0..nb {
        if next_key(&mut cursors[i], &mut cur[i]) {
            cur_tally[i] = indexes[i].pos2value(0);
            offset[i] = 1;
            alive[i] = true;
            remaining += 1;
        }
    }

    let mut enc = SliceEncoder::new(nw);
    let mut tally: Vec<u32> = Vec::new();
    if remaining > 0 {
        let m = argmin(&cur, &alive);
        let mut distinct = cur[m].clone();
        tally.push(cur_tally[m]);
        advance(
            m, &mut cursors, &mut cur, &mut cur_tally, &indexes, &mut offset, &mut alive,
            &mut remaining,
        );
        while remaining > 0 {
            let m = argmin(&cur, &alive);
            if cur[m] == distinct {
                let last = tally.len() - 1;
                tally[last] += cur_tally[m];
            } else {
                enc.push(&distinct);
                distinct.copy_from_slice(&cur[m]);
                tally.push(cur_tally[m]);
            }
            advance(
                m, &mut cursors, &mut cur, &mut cur_tally, &indexes, &mut offset, &mut alive,
                &mut remaining,
            );
        }
        enc.push(&distinct);
    }

    let n_distinct = tally.len();
    let (counts, merged) = enc.finish();
    let mut w = BufWriter::new(File::create(batch::mer_path(outdir, k, bin))?);
    batch::write_slices(&mut w, &counts, &merged)?;
    w.flush()?;

    let index = RangeIndex::build(&tally);
    let mut w = BufWriter::new(File::create(batch::index_path(outdir, k, bin))?);
    batch::write_index(&mut w, &index)?;
    w.flush()?;

    for b in 1..=batches {
        fs::remove_file(batch::batch_mer_path(outdir, k, bin, b))?;
        fs::remove_file(batch::batch_index_path(outdir, k, bin, b))?;
    }
    debug!("bin {bin}: merged {batches} batches, {n_distinct} distinct");
    Ok(())
}

/// Rebuild the key at the cursors' shared position, one bit per plane.
/// Returns false once the batch is exhausted.
fn next_key(cursors: &mut [Bits<'_>], out: &mut [u64]) -> bool {
    out.iter_mut().for_each(|w| *w = 0);
    for (b, c) in cursors.iter_mut().enumerate() {
        match c.next() {
            Some(true) => out[b / 64] |= 1 << (63 - (b % 64)),
            Some(false) => {}
            None => return false,
        }
    }
    true
}

fn argmin(cur: &[Vec<u64>], alive: &[bool]) -> usize {
    let mut m = usize::MAX;
    for i in 0..cur.len() {
        if alive[i] && (m == usize::MAX || cur[i] < cur[m]) {
            m = i;
        }
    }
    m
}

#[allow(clippy::too_many_arguments)]
fn advance(
    i: usize,
    cursors: &mut [Vec<Bits<'_>>],
    cur: &mut [Vec<u64>],
    cur_tally: &mut [u32],
    indexes: &[RangeIndex],
    offset: &mut [u32],
    alive: &mut [bool],
    remaining: &mut usize,
) {
    if next_key(&mut cursors[i], &mut cur[i]) {
        cur_tally[i] = indexes[i].pos2value(offset[i]);
        offset[i] += 1;
    } else {
        alive[i] = false;
        *remaining -= 1;
    }
}
