//! The counting engine: ingestion, spill batching, final merge, and the
//! query surface over the persisted index.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info};
use rayon::prelude::*;

use crate::NBINS;
use crate::batch;
use crate::bins::BinBuffer;
use crate::bvec::BitVec;
use crate::encode::{CODE_LUT, KmerCodec};
use crate::error::{Error, Result};
use crate::merge;
use crate::range::RangeIndex;
use crate::slice::SliceEncoder;

/// Which key(s) each window contributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// The forward key only.
    Raw,
    /// The lexicographic minimum of the forward key and its reverse
    /// complement.
    Canonical,
    /// Both the forward key and its reverse complement, independently.
    Both,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Mode> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Mode::Raw),
            "canonical" => Ok(Mode::Canonical),
            "both" => Ok(Mode::Both),
            _ => Err(Error::Config(format!("unrecognized mode {s:?}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Reading,
    Saved,
    Query,
}

/// Disk-backed k-mer counter.
///
/// Lifecycle: [`new`](Self::new) → [`allocate`](Self::allocate) →
/// [`add_sequence`](Self::add_sequence)* → [`save`](Self::save) →
/// [`load`](Self::load) → [`histogram`](Self::histogram) /
/// [`find`](Self::find). Operations called out of order return
/// [`Error::State`].
pub struct KmerCounter {
    codec: KmerCodec,
    mode: Mode,
    outdir: PathBuf,
    pool: rayon::ThreadPool,
    /// Bins per worker range.
    chunk: usize,
    bins: Vec<BinBuffer>,
    capacity: u32,
    batches: u32,
    state: State,
    /// Per-bin frequency indexes, populated by `load`.
    freq: Vec<RangeIndex>,
    /// Per-bin slice planes, loaded on first `find` into the bin.
    slices: Vec<Option<Vec<BitVec>>>,
}

impl KmerCounter {
    /// Create an engine for `k`-mers counted into `outdir` with a fixed
    /// worker count. The directory is created if missing.
    pub fn new(k: usize, threads: usize, outdir: impl Into<PathBuf>, mode: Mode) -> Result<Self> {
        if k == 0 || k > 256 {
            return Err(Error::Config(format!("k must be in 1..=256, got {k}")));
        }
        if threads == 0 {
            return Err(Error::Config("at least one worker thread is required".into()));
        }
        let outdir = outdir.into();
        fs::create_dir_all(&outdir)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(KmerCounter {
            codec: KmerCodec::new(k),
            mode,
            outdir,
            pool,
            chunk: NBINS.div_ceil(threads),
            bins: Vec::new(),
            capacity: 0,
            batches: 0,
            state: State::Reading,
            freq: Vec::new(),
            slices: Vec::new(),
        })
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.codec.k()
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Reserve the ingestion arenas inside a byte budget, split evenly
    /// across the bins.
    pub fn allocate(&mut self, max_bytes: usize) -> Result<()> {
        self.require(State::Reading, "allocate")?;
        let kmer_bytes = self.codec.nwords() * 8;
        let capacity = (max_bytes / kmer_bytes / NBINS).min(u32::MAX as usize) as u32;
        if capacity == 0 {
            return Err(Error::OutOfMemory(format!(
                "budget of {max_bytes} bytes is below one k-mer per bin"
            )));
        }
        let mut bins = Vec::with_capacity(NBINS);
        for _ in 0..NBINS {
            bins.push(BinBuffer::allocate(capacity, self.codec.nwords())?);
        }
        self.bins = bins;
        self.capacity = capacity;
        debug!(
            "allocated {NBINS} bins of {capacity} k-mers ({kmer_bytes} bytes each)"
        );
        Ok(())
    }

    /// Count every length-k window of `seq`. Sequences shorter than k are
    /// ignored. Bytes outside ACGT (either case) are read as A.
    pub fn add_sequence(&mut self, seq: &[u8]) -> Result<()> {
        self.require(State::Reading, "add_sequence")?;
        if self.capacity == 0 {
            return Err(Error::State(
                "allocate() must be called before add_sequence()".into(),
            ));
        }
        let k = self.codec.k();
        if seq.len() < k {
            return Ok(());
        }
        let nw = self.codec.nwords();
        let mut fwd = self.codec.pack(seq);
        let mut rc = vec![0u64; nw];
        self.store(&fwd, &mut rc)?;
        for i in k..seq.len() {
            self.codec.shift_append(&mut fwd, CODE_LUT[seq[i] as usize] as u64);
            self.store(&fwd, &mut rc)?;
        }
        Ok(())
    }

    fn store(&mut self, fwd: &[u64], rc: &mut [u64]) -> Result<()> {
        match self.mode {
            Mode::Raw => self.insert(fwd),
            Mode::Canonical => {
                self.codec.reverse_complement(fwd, rc);
                let key = self.codec.canonical(fwd, rc);
                self.insert(key)
            }
            Mode::Both => {
                self.codec.reverse_complement(fwd, rc);
                self.insert(fwd)?;
                self.insert(rc)
            }
        }
    }

    fn insert(&mut self, key: &[u64]) -> Result<()> {
        let bin = self.codec.bin_of(key);
        self.bins[bin].push(key);
        if self.bins[bin].is_full() {
            self.serialize()?;
        }
        Ok(())
    }

    /// Spill every bin as one batch: sort + fold, bit-slice, range-index,
    /// write, reset. All bins spill together whenever any bin fills.
    fn serialize(&mut self) -> Result<()> {
        self.batches += 1;
        let batch = self.batches;
        let codec = &self.codec;
        let outdir = &self.outdir;
        let chunk = self.chunk;
        let bins = &mut self.bins;
        info!("spilling batch {batch}");
        self.pool.install(|| {
            bins.par_chunks_mut(chunk)
                .enumerate()
                .try_for_each(|(ci, range)| {
                    for (j, buf) in range.iter_mut().enumerate() {
                        write_bin_batch(codec, outdir, ci * chunk + j, batch, buf)?;
                    }
                    Ok::<(), Error>(())
                })
        })
    }

    /// Flush the remaining k-mers and produce the final per-bin files,
    /// merging across batches when more than one was spilled. The ingestion
    /// arenas are released.
    pub fn save(&mut self) -> Result<()> {
        self.require(State::Reading, "save")?;
        if self.capacity == 0 {
            return Err(Error::State("allocate() must be called before save()".into()));
        }
        self.serialize()?;
        let k = self.codec.k();
        if self.batches > 1 {
            info!("merging {} batches", self.batches);
            let codec = &self.codec;
            let outdir = &self.outdir;
            let batches = self.batches;
            let ids: Vec<usize> = (0..NBINS).collect();
            let chunk = self.chunk;
            self.pool.install(|| {
                ids.par_chunks(chunk).try_for_each(|range| {
                    for &bin in range {
                        merge::merge_bin(codec, outdir, bin, batches)?;
                    }
                    Ok::<(), Error>(())
                })
            })?;
        } else {
            for bin in 0..NBINS {
                fs::rename(
                    batch::batch_mer_path(&self.outdir, k, bin, 1),
                    batch::mer_path(&self.outdir, k, bin),
                )?;
                fs::rename(
                    batch::batch_index_path(&self.outdir, k, bin, 1),
                    batch::index_path(&self.outdir, k, bin),
                )?;
            }
        }
        self.batches = 1;
        self.bins = Vec::new();
        self.capacity = 0;
        self.state = State::Saved;
        info!("saved {k}-mer index to {}", self.outdir.display());
        Ok(())
    }

    /// Read every bin's frequency index into memory and enter the query
    /// state. Valid from any state as long as the final files exist.
    pub fn load(&mut self) -> Result<()> {
        let codec = &self.codec;
        let outdir = &self.outdir;
        let chunk = self.chunk;
        let ids: Vec<usize> = (0..NBINS).collect();
        let loaded: Vec<Vec<RangeIndex>> = self.pool.install(|| {
            ids.par_chunks(chunk)
                .map(|range| {
                    range
                        .iter()
                        .map(|&bin| {
                            batch::read_index_file(&batch::index_path(outdir, codec.k(), bin))
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()
        })?;
        self.freq = loaded.into_iter().flatten().collect();
        self.slices = (0..NBINS).map(|_| None).collect();
        self.state = State::Query;
        debug!("loaded {} bin indexes", self.freq.len());
        Ok(())
    }

    /// Frequency histogram: `(f, number of distinct k-mers occurring f
    /// times)` in increasing `f`, zero entries skipped.
    pub fn histogram(&self) -> Result<Histogram<'_>> {
        self.require(State::Query, "histogram")?;
        let remaining = self.freq.iter().filter(|i| !i.is_empty()).count();
        Ok(Histogram {
            bins: &self.freq,
            cursor: vec![0; self.freq.len()],
            remaining,
        })
    }

    /// Frequency of one k-mer; 0 when it was never counted.
    ///
    /// The query is packed and canonicalized exactly like ingested keys,
    /// routed to its bin, and resolved by intersecting the bin's bit
    /// planes (the plane for each set query bit, its complement for each
    /// clear one). At most one position survives; its frequency comes from
    /// the bin's range index.
    pub fn find(&mut self, seq: &[u8]) -> Result<u32> {
        self.require(State::Query, "find")?;
        let k = self.codec.k();
        if seq.len() != k {
            return Err(Error::Config(format!(
                "query is {} symbols, expected k = {k}",
                seq.len()
            )));
        }
        let fwd = self.codec.pack(seq);
        let key = match self.mode {
            Mode::Canonical => {
                let mut rc = vec![0u64; self.codec.nwords()];
                self.codec.reverse_complement(&fwd, &mut rc);
                if fwd <= rc { fwd } else { rc }
            }
            Mode::Raw | Mode::Both => fwd,
        };
        let bin = self.codec.bin_of(&key);
        let planes = self.bin_planes(bin)?;

        let mut acc: Option<BitVec> = None;
        for b in 0..key.len() * 64 {
            let plane = if KmerCodec::slice_bit(&key, b) {
                planes[b].clone()
            } else {
                planes[b].complement()
            };
            let next = match acc {
                Some(a) => a.intersect(&plane),
                None => plane,
            };
            if next.count() == 0 {
                return Ok(0);
            }
            acc = Some(next);
        }
        match acc.and_then(|a| a.first_set()) {
            Some(pos) => Ok(self.freq[bin].pos2value(pos)),
            None => Ok(0),
        }
    }

    fn bin_planes(&mut self, bin: usize) -> Result<&[BitVec]> {
        if self.slices[bin].is_none() {
            let path = batch::mer_path(&self.outdir, self.codec.k(), bin);
            let (_counts, planes) = batch::read_slices_file(&path)?;
            if planes.len() != self.codec.n_slices() {
                return Err(Error::CorruptBatch(format!(
                    "{}: {} slices, expected {}",
                    path.display(),
                    planes.len(),
                    self.codec.n_slices()
                )));
            }
            debug!("bin {bin}: loaded {} bit planes", planes.len());
            self.slices[bin] = Some(planes);
        }
        Ok(self.slices[bin].as_deref().unwrap_or(&[]))
    }

    fn require(&self, state: State, op: &str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::State(format!(
                "{op}() is not valid in the {:?} state",
                self.state
            )))
        }
    }
}

fn write_bin_batch(
    codec: &KmerCodec,
    outdir: &Path,
    bin: usize,
    batch_no: u32,
    buf: &mut BinBuffer,
) -> Result<()> {
    let total = buf.len();
    let tally = buf.sort_dedup();
    let mut enc = SliceEncoder::new(codec.nwords());
    for key in buf.keys() {
        enc.push(key);
    }
    let (counts, slices) = enc.finish();
    let mut w = BufWriter::new(File::create(batch::batch_mer_path(
        outdir,
        codec.k(),
        bin,
        batch_no,
    ))?);
    batch::write_slices(&mut w, &counts, &slices)?;
    w.flush()?;

    let index = RangeIndex::build(&tally);
    let mut w = BufWriter::new(File::create(batch::batch_index_path(
        outdir,
        codec.k(),
        bin,
        batch_no,
    ))?);
    batch::write_index(&mut w, &index)?;
    w.flush()?;
    buf.clear();
    debug!("bin {bin} batch {batch_no}: {total} k-mers, {} distinct", tally.len());
    Ok(())
}

/// Iterator over `(frequency, distinct k-mer count)` pairs, increasing in
/// frequency. Reconstructs the global view by cursor-walking every bin's
/// distinct frequency values in step.
pub struct Histogram<'a> {
    bins: &'a [RangeIndex],
    cursor: Vec<usize>,
    remaining: usize,
}

impl Iterator for Histogram<'_> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        if self.remaining == 0 {
            return None;
        }
        // next frequency = smallest pending distinct value across bins
        let mut f = u32::MAX;
        for (b, idx) in self.bins.iter().enumerate() {
            let j = self.cursor[b];
            if j < idx.len() {
                f = f.min(idx.values()[j]);
            }
        }
        let mut n = 0u32;
        for (b, idx) in self.bins.iter().enumerate() {
            let j = self.cursor[b];
            if j < idx.len() && idx.values()[j] == f {
                let below = if j > 0 { idx.count_le(j - 1) } else { 0 };
                n += idx.count_le(j) - below;
                self.cursor[b] += 1;
                if self.cursor[b] == idx.len() {
                    self.remaining -= 1;
                }
            }
        }
        Some((f, n))
    }
}
