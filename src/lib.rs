//! Disk-backed k-mer counting over bit-sliced, WAH-compressed bitmaps.
//!
//! The engine ingests raw nucleotide sequences, packs every length-k window
//! into a 2-bit multi-word key (canonicalized under reverse complementation
//! when asked), and partitions keys into 256 hash bins. Bins count
//! out-of-core: whenever any bin's arena fills, every bin is sorted,
//! deduplicated, bit-sliced into one compressed bitmap per key bit, paired
//! with a range-encoded index over its multiplicities, and spilled as a
//! batch. `save()` merges all batches per bin in one streaming pass.
//!
//! The persisted layout answers two queries cheaply: `histogram()` costs one
//! bitmap count per distinct frequency per bin, and `find()` resolves a
//! single k-mer by intersecting the bin's bit planes.
//!
//! ```no_run
//! use bitmer::{KmerCounter, Mode};
//!
//! # fn main() -> bitmer::Result<()> {
//! let mut engine = KmerCounter::new(21, 4, "counts", Mode::Canonical)?;
//! engine.allocate(1 << 30)?;
//! engine.add_sequence(b"ACGTACGTACGTACGTACGTACGT")?;
//! engine.save()?;
//! engine.load()?;
//! for (freq, n) in engine.histogram()? {
//!     println!("{freq} {n}");
//! }
//! # Ok(())
//! # }
//! ```

mod batch;
mod bins;
mod bvec;
mod encode;
mod engine;
mod error;
mod merge;
mod range;
mod slice;

pub use bvec::{BitVec, BitVecBuilder, Bits};
pub use encode::{CODE_LUT, KmerCodec};
pub use engine::{Histogram, KmerCounter, Mode};
pub use error::{Error, Result};
pub use range::RangeIndex;
pub use slice::SliceEncoder;

/// Number of hash partitions the k-mer space is divided into.
pub const NBINS: usize = 256;
