//! # BUTLR
//!
//! The `butlr` library reads and writes the BUTLR (Binary Upper
//! TrianguLar MatRix) container format: a compact, random-access binary
//! encoding of Hi-C chromosomal contact matrices at a fixed bin resolution
//! for a named genome assembly.
//!
//! Intrachromosomal matrices are symmetric and stored upper-triangular
//! only; interchromosomal matrices are stored once, under the canonical
//! orientation in which the outranked chromosome (smaller, then
//! lexicographically larger) is the row. A per-matrix row-offset table
//! gives O(k) random access to any bin range.
//!
//! It offers:
//!
//! - A two-pass [`ButlrWriter`] that streams sparse matrix bodies and
//!   backpatches header and directory offsets over one seekable handle
//! - A memory-mapped [`ButlrReader`] that reconstructs dense sub-matrices
//!   from (chromosome, bin-range) and (pair, bin-range) queries
//! - Matrix ingestion from coordinate-list and dense tab-delimited sources
//! - A splitter for Homer-style whole-genome dense matrices
//!
//! # Example: in-memory round trip
//!
//! ```
//! use std::io::Cursor;
//! use butlr::{BinRange, ButlrReader, ButlrWriterBuilder, Genome, Manifest, SparseMatrix};
//!
//! fn main() -> butlr::Result<()> {
//!     let genome = Genome::from_sizes([("chr1", 100u32)]);
//!     let manifest = Manifest::from_reader(Cursor::new("chr1\tcells.txt\n"), &genome)?;
//!
//!     let mut writer = ButlrWriterBuilder::new("hg19", 50)
//!         .build(Cursor::new(Vec::new()), &genome, &manifest)?;
//!     let mut store = SparseMatrix::intra("chr1", 3);
//!     store.push(0, 1, 2.0)?;
//!     store.seal()?;
//!     writer.write_chromosome("chr1", &store)?;
//!     writer.finish()?;
//!
//!     let reader = ButlrReader::from_bytes(writer.into_inner().into_inner())?;
//!     let dense = reader.query_intra("chr1", BinRange::new(0, 2)?, BinRange::new(0, 2)?)?;
//!     assert_eq!(dense.get(1, 0), 2.0); // symmetric mirror of (0, 1)
//!     Ok(())
//! }
//! ```

/// BUTLR container format: header, writer, reader
pub mod btr;

/// Error definitions
pub mod error;

/// Genome model: chromosome sizes and canonical ordering
pub mod genome;

/// Splitter for Homer whole-genome dense matrices
pub mod homer;

/// Matrix ingestion strategies
pub mod ingest;

/// Matrix manifest parsing
pub mod manifest;

/// Sparse row store
pub mod sparse;

/// Resolution and location string parsing
pub mod utils;

pub use btr::{
    encode_manifest, BinRange, ButlrReader, ButlrWriter, ButlrWriterBuilder, ChromEntry,
    CoordinateUnit, DenseMatrix, Directory, EncodeOptions, FileHeader, PairEntry, DEFAULT_MCV,
    FORMAT_VERSION,
};
pub use error::{Error, HeaderError, QueryError, ReadError, Result, WriteError};
pub use genome::{bp_to_bin, Genome};
pub use homer::{split_homer_matrix, HomerSplit};
pub use ingest::{load_matrix, CoordinateColumns, MatrixTarget, SourceFormat};
pub use manifest::{canonical_orientation, Manifest, PairSource};
pub use sparse::{Cell, SparseMatrix};
pub use utils::{default_output_name, parse_location, parse_resolution, Location, Region};
