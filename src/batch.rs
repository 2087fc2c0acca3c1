//! On-disk batch and final file codec. All integers are little-endian.
//!
//! Per bin there are two files, `<outdir>/<k>-mers.<bin>` and its `.idx`
//! sibling (batch files carry an extra `.<batch>` suffix before `.idx`):
//! - slice file: `u64 n_slices`, `u32 popcount[n_slices]`, then `n_slices`
//!   records `{u64 byte_len, bytes}` of bitmap dumps;
//! - idx file: `u64 n_distinct_values`, `u32 values[..]`, then one framed
//!   bitmap dump per value.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian as LE, WriteBytesExt};

use crate::bvec::BitVec;
use crate::error::{Error, Result};
use crate::range::RangeIndex;

pub fn mer_path(outdir: &Path, k: usize, bin: usize) -> PathBuf {
    outdir.join(format!("{k}-mers.{bin}"))
}

pub fn index_path(outdir: &Path, k: usize, bin: usize) -> PathBuf {
    outdir.join(format!("{k}-mers.{bin}.idx"))
}

pub fn batch_mer_path(outdir: &Path, k: usize, bin: usize, batch: u32) -> PathBuf {
    outdir.join(format!("{k}-mers.{bin}.{batch}"))
}

pub fn batch_index_path(outdir: &Path, k: usize, bin: usize, batch: u32) -> PathBuf {
    outdir.join(format!("{k}-mers.{bin}.{batch}.idx"))
}

pub fn write_slices<W: Write>(w: &mut W, counts: &[u32], slices: &[BitVec]) -> Result<()> {
    debug_assert_eq!(counts.len(), slices.len());
    w.write_u64::<LE>(slices.len() as u64)?;
    for &c in counts {
        w.write_u32::<LE>(c)?;
    }
    for s in slices {
        let bytes = s.dump();
        w.write_u64::<LE>(bytes.len() as u64)?;
        w.write_all(&bytes)?;
    }
    Ok(())
}

pub fn write_index<W: Write>(w: &mut W, index: &RangeIndex) -> Result<()> {
    w.write_u64::<LE>(index.len() as u64)?;
    for &v in index.values() {
        w.write_u32::<LE>(v)?;
    }
    for c in index.bitmaps() {
        let bytes = c.dump();
        w.write_u64::<LE>(bytes.len() as u64)?;
        w.write_all(&bytes)?;
    }
    Ok(())
}

/// Read a slice file through a memory map.
pub fn read_slices_file(path: &Path) -> Result<(Vec<u32>, Vec<BitVec>)> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::Mmap::map(&file)? };
    read_slices_bytes(&map).map_err(|e| at_path(e, path))
}

fn read_slices_bytes(bytes: &[u8]) -> Result<(Vec<u32>, Vec<BitVec>)> {
    let mut r = bytes;
    let n_slices = take_u64(&mut r, "slice count")? as usize;
    let mut counts = Vec::with_capacity(n_slices);
    for _ in 0..n_slices {
        counts.push(take_u32(&mut r, "popcount table")?);
    }
    let mut slices = Vec::with_capacity(n_slices);
    for _ in 0..n_slices {
        let len = take_u64(&mut r, "record length")? as usize;
        let body = take(&mut r, len, "bitmap record")?;
        slices.push(BitVec::load(body)?);
    }
    if !r.is_empty() {
        return Err(Error::CorruptBatch("trailing bytes".into()));
    }
    Ok((counts, slices))
}

/// Read an idx file into an in-memory range index.
pub fn read_index_file(path: &Path) -> Result<RangeIndex> {
    let bytes = std::fs::read(path)?;
    read_index_bytes(&bytes).map_err(|e| at_path(e, path))
}

fn read_index_bytes(bytes: &[u8]) -> Result<RangeIndex> {
    let mut r = bytes;
    let m = take_u64(&mut r, "value count")? as usize;
    let mut values = Vec::with_capacity(m);
    for _ in 0..m {
        values.push(take_u32(&mut r, "value table")?);
    }
    let mut bitmaps = Vec::with_capacity(m);
    for _ in 0..m {
        let len = take_u64(&mut r, "record length")? as usize;
        let body = take(&mut r, len, "bitmap record")?;
        bitmaps.push(BitVec::load(body)?);
    }
    if !r.is_empty() {
        return Err(Error::CorruptBatch("trailing bytes".into()));
    }
    Ok(RangeIndex::from_parts(values, bitmaps))
}

fn take<'a>(r: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if r.len() < n {
        return Err(Error::CorruptBatch(format!("truncated {what}")));
    }
    let (head, rest) = r.split_at(n);
    *r = rest;
    Ok(head)
}

fn take_u32(r: &mut &[u8], what: &str) -> Result<u32> {
    let b = take(r, 4, what)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(b);
    Ok(u32::from_le_bytes(buf))
}

fn take_u64(r: &mut &[u8], what: &str) -> Result<u64> {
    let b = take(r, 8, what)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(b);
    Ok(u64::from_le_bytes(buf))
}

fn at_path(e: Error, path: &Path) -> Error {
    match e {
        Error::CorruptBatch(msg) => {
            Error::CorruptBatch(format!("{}: {msg}", path.display()))
        }
        other => other,
    }
}
