//! BUTLR reader
//!
//! The reader memory-maps a BUTLR file, parses the header and directories
//! up front, and answers (chromosome, bin-range) and (pair, bin-range)
//! queries by seeking through the per-matrix row-offset tables. Every
//! access into the mapped buffer is bounds-checked, so a truncated file
//! fails with a read diagnostic exactly when a query first touches the
//! missing bytes.
//!
//! Intrachromosomal matrices store only the upper triangle: a requested
//! cell (i, j) with i > j is served from the stored cell (j, i). A pair
//! queried against its canonical storage orientation is walked directly;
//! queried the other way round, the stored rows are walked and scattered
//! into the transposed output.

use std::fs::File;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use super::header::{ChromEntry, Directory, FileHeader, PairEntry};
use crate::error::{QueryError, ReadError, Result};
use crate::genome::bp_to_bin;
use crate::utils::{Location, Region};

/// Backing bytes of an open file: a map for real files, a buffer for
/// in-memory round trips.
enum Source {
    Mapped(Mmap),
    Buffer(Vec<u8>),
}

impl Source {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Buffer(buf) => buf,
        }
    }
}

/// How query bounds are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateUnit {
    /// Bounds are base-pair positions, mapped to bins by flooring
    BasePair,
    /// Bounds are bin indices already
    Bin,
}

/// Inclusive bin range on one axis of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinRange {
    pub start: u32,
    pub end: u32,
}

impl BinRange {
    /// Builds a range, rejecting inverted bounds.
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if end < start {
            return Err(QueryError::InvalidRange {
                start: u64::from(start),
                end: u64::from(end),
            }
            .into());
        }
        Ok(Self { start, end })
    }

    /// Number of bins covered.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    fn contains(&self, bin: u32) -> bool {
        self.start <= bin && bin <= self.end
    }
}

/// Dense sub-matrix reconstructed from a query. Absent cells hold the
/// file's most-common value.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    row_start: u32,
    col_start: u32,
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl DenseMatrix {
    fn filled(rows: BinRange, cols: BinRange, mcv: f32) -> Self {
        Self {
            row_start: rows.start,
            col_start: cols.start,
            rows: rows.len(),
            cols: cols.len(),
            values: vec![mcv; rows.len() * cols.len()],
        }
    }

    /// First bin index of the row axis.
    #[must_use]
    pub fn row_start(&self) -> u32 {
        self.row_start
    }

    /// First bin index of the column axis.
    #[must_use]
    pub fn col_start(&self) -> u32 {
        self.col_start
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Value at local coordinates (0-based within the queried window).
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    /// One output row as a slice.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f32] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    /// Iterates output rows top to bottom.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks(self.cols)
    }

    fn set(&mut self, row: usize, col: usize, value: f32) {
        self.values[row * self.cols + col] = value;
    }
}

/// Random-access reader over one BUTLR file.
pub struct ButlrReader {
    source: Source,
    header: FileHeader,
    directory: Directory,
}

impl ButlrReader {
    /// Opens and memory-maps a BUTLR file, parsing header and directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile.into());
        }
        // Safety: the file is open and not modified while mapped
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_source(Source::Mapped(mmap))
    }

    /// Builds a reader over an in-memory byte buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_source(Source::Buffer(bytes))
    }

    fn from_source(source: Source) -> Result<Self> {
        let header = FileHeader::from_bytes(source.bytes())?;
        let directory = Directory::from_bytes(source.bytes(), &header)?;
        Ok(Self {
            source,
            header,
            directory,
        })
    }

    /// Parsed fixed header.
    #[must_use]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Resolution in base pairs per bin.
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.header.resolution
    }

    /// Chromosome entries in directory order.
    #[must_use]
    pub fn chromosomes(&self) -> &[ChromEntry] {
        self.directory.chromosomes()
    }

    /// Pair entries in directory order.
    #[must_use]
    pub fn pairs(&self) -> &[PairEntry] {
        self.directory.pairs()
    }

    /// Bin count of a chromosome present in the file.
    pub fn bin_count(&self, chrom: &str) -> Result<u32> {
        let entry = self.chrom_entry(chrom)?;
        Ok(entry.size / self.header.resolution + 1)
    }

    fn chrom_entry(&self, chrom: &str) -> Result<&ChromEntry> {
        self.directory
            .chrom(chrom)
            .ok_or_else(|| QueryError::UnknownChromosome(chrom.to_string()).into())
    }

    /// Resolves a parsed location into a dense sub-matrix.
    ///
    /// A single-region location yields the symmetric intrachromosomal
    /// window over that range; a two-region location yields the
    /// interchromosomal (or rectangular intrachromosomal) window.
    pub fn query(&self, location: &Location, unit: CoordinateUnit) -> Result<DenseMatrix> {
        let rows = self.resolve_range(&location.row, unit)?;
        match &location.col {
            None => self.query_intra(&location.row.chrom, rows, rows),
            Some(col) => {
                let cols = self.resolve_range(col, unit)?;
                self.query_pair(&location.row.chrom, rows, &col.chrom, cols)
            }
        }
    }

    fn resolve_range(&self, region: &Region, unit: CoordinateUnit) -> Result<BinRange> {
        let bins = self.bin_count(&region.chrom)?;
        let to_bin = |bound: u64| -> u32 {
            match unit {
                CoordinateUnit::BasePair => bp_to_bin(bound, self.header.resolution),
                // clamp instead of wrapping; the bin-count check below rejects it
                CoordinateUnit::Bin => bound.min(u64::from(u32::MAX)) as u32,
            }
        };
        let start = region.start.map_or(0, to_bin);
        let end = region.end.map_or(bins - 1, to_bin);
        if end < start {
            return Err(QueryError::InvalidRange {
                start: u64::from(start),
                end: u64::from(end),
            }
            .into());
        }
        if end >= bins {
            return Err(QueryError::BinOutOfRange {
                chrom: region.chrom.clone(),
                bin: end,
                bins,
            }
            .into());
        }
        BinRange::new(start, end)
    }

    /// Rectangular window of one chromosome's symmetric matrix.
    ///
    /// Both halves are served from the stored upper triangle: a requested
    /// cell below the diagonal reads its mirror.
    pub fn query_intra(
        &self,
        chrom: &str,
        rows: BinRange,
        cols: BinRange,
    ) -> Result<DenseMatrix> {
        let entry = self.chrom_entry(chrom)?;
        let bins = self.bin_count(chrom)?;
        for range in [&rows, &cols] {
            if range.end >= bins {
                return Err(QueryError::BinOutOfRange {
                    chrom: chrom.to_string(),
                    bin: range.end,
                    bins,
                }
                .into());
            }
        }

        let body = entry.body_offset;
        let mut out = DenseMatrix::filled(rows, cols, self.header.mcv);
        let lo = rows.start.min(cols.start);
        let hi = rows.end.max(cols.end);
        for stored_row in lo..=hi {
            let in_rows = rows.contains(stored_row);
            let in_cols = cols.contains(stored_row);
            if !in_rows && !in_cols {
                continue;
            }
            // the largest stored column either output half can use
            let max_col = match (in_rows, in_cols) {
                (true, true) => cols.end.max(rows.end),
                (true, false) => cols.end,
                _ => rows.end,
            };
            let Some(span) = self.row_span(body, bins, stored_row)? else {
                continue;
            };
            self.scan_row(span, |col, value| {
                if col > max_col {
                    return false;
                }
                if in_rows && cols.contains(col) {
                    out.set(
                        (stored_row - rows.start) as usize,
                        (col - cols.start) as usize,
                        value,
                    );
                }
                if in_cols && rows.contains(col) {
                    out.set(
                        (col - rows.start) as usize,
                        (stored_row - cols.start) as usize,
                        value,
                    );
                }
                true
            })?;
        }
        Ok(out)
    }

    /// Rectangular window of a chromosome-pair matrix, in the orientation
    /// the caller asked for.
    pub fn query_pair(
        &self,
        row_chrom: &str,
        rows: BinRange,
        col_chrom: &str,
        cols: BinRange,
    ) -> Result<DenseMatrix> {
        if row_chrom == col_chrom {
            return self.query_intra(row_chrom, rows, cols);
        }
        let row_bins = self.bin_count(row_chrom)?;
        let col_bins = self.bin_count(col_chrom)?;
        if rows.end >= row_bins {
            return Err(QueryError::BinOutOfRange {
                chrom: row_chrom.to_string(),
                bin: rows.end,
                bins: row_bins,
            }
            .into());
        }
        if cols.end >= col_bins {
            return Err(QueryError::BinOutOfRange {
                chrom: col_chrom.to_string(),
                bin: cols.end,
                bins: col_bins,
            }
            .into());
        }

        let mut out = DenseMatrix::filled(rows, cols, self.header.mcv);
        if let Some(entry) = self.directory.pair(row_chrom, col_chrom) {
            // stored orientation matches the query
            let body = entry.body_offset;
            for row in rows.start..=rows.end {
                let Some(span) = self.row_span(body, row_bins, row)? else {
                    continue;
                };
                self.scan_row(span, |col, value| {
                    if col > cols.end {
                        return false;
                    }
                    if cols.contains(col) {
                        out.set((row - rows.start) as usize, (col - cols.start) as usize, value);
                    }
                    true
                })?;
            }
        } else if let Some(entry) = self.directory.pair(col_chrom, row_chrom) {
            // stored transposed: walk the canonical rows (the query's
            // columns) and scatter into the output
            let body = entry.body_offset;
            for stored_row in cols.start..=cols.end {
                let Some(span) = self.row_span(body, col_bins, stored_row)? else {
                    continue;
                };
                self.scan_row(span, |col, value| {
                    if col > rows.end {
                        return false;
                    }
                    if rows.contains(col) {
                        out.set(
                            (col - rows.start) as usize,
                            (stored_row - cols.start) as usize,
                            value,
                        );
                    }
                    true
                })?;
            }
        } else {
            return Err(
                QueryError::UnknownPair(row_chrom.to_string(), col_chrom.to_string()).into(),
            );
        }
        Ok(out)
    }

    /// Cell byte span of one stored row, or None for an empty row.
    ///
    /// A zero entry marks an empty row; its span end is recovered by
    /// scanning forward to the next non-zero entry, and an entry equal to
    /// that end likewise denotes an empty row.
    fn row_span(&self, body: u64, total_rows: u32, row: u32) -> Result<Option<(u64, u64)>> {
        if row >= total_rows {
            return Err(ReadError::RowOutOfRange {
                requested: row,
                rows: total_rows,
            }
            .into());
        }
        let start = self.read_u64_at(body + 8 * u64::from(row))?;
        if start == 0 {
            return Ok(None);
        }
        let mut end = 0;
        for next in row + 1..=total_rows {
            let candidate = self.read_u64_at(body + 8 * u64::from(next))?;
            if candidate != 0 {
                end = candidate;
                break;
            }
        }
        if end == 0 {
            return Err(ReadError::InvalidRowOffset {
                row: total_rows,
                reason: "zero sentinel",
            }
            .into());
        }
        if end < start {
            return Err(ReadError::InvalidRowOffset {
                row,
                reason: "descending offsets",
            }
            .into());
        }
        if (end - start) % 8 != 0 {
            return Err(ReadError::InvalidRowOffset {
                row,
                reason: "misaligned cell span",
            }
            .into());
        }
        if start == end {
            return Ok(None);
        }
        Ok(Some((start, end)))
    }

    /// Iterates (col, value) cells in a span; the callback returns false
    /// to stop early (cells are sorted by ascending column).
    fn scan_row(
        &self,
        (start, end): (u64, u64),
        mut callback: impl FnMut(u32, f32) -> bool,
    ) -> Result<()> {
        let data = self.source.bytes();
        if end as usize > data.len() {
            return Err(ReadError::Truncated(end as usize).into());
        }
        let mut at = start as usize;
        while at < end as usize {
            let col = LittleEndian::read_u32(&data[at..at + 4]);
            let value = LittleEndian::read_f32(&data[at + 4..at + 8]);
            if !callback(col, value) {
                break;
            }
            at += 8;
        }
        Ok(())
    }

    fn read_u64_at(&self, offset: u64) -> Result<u64> {
        let data = self.source.bytes();
        let at = offset as usize;
        if at + 8 > data.len() {
            return Err(ReadError::Truncated(at).into());
        }
        Ok(LittleEndian::read_u64(&data[at..at + 8]))
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;
    use std::io::Cursor;

    use crate::btr::writer::ButlrWriterBuilder;
    use crate::genome::Genome;
    use crate::manifest::Manifest;
    use crate::sparse::SparseMatrix;
    use crate::utils::parse_location;

    /// chr1 size 100 at resolution 50 (3 bins) with the tiny diagonal
    /// cells, plus chr2 for pair coverage.
    fn write_fixture() -> Result<Vec<u8>> {
        let genome = Genome::from_sizes([("chr1", 100u32), ("chr2", 60)]);
        let manifest = Manifest::from_reader(
            Cursor::new("chr1\ta.txt\nchr2\tchr1\tm.txt\n"),
            &genome,
        )?;
        let mut writer =
            ButlrWriterBuilder::new("hg19", 50).build(Cursor::new(Vec::new()), &genome, &manifest)?;

        let mut chr1 = SparseMatrix::intra("chr1", 3);
        chr1.push(0, 0, 1.0)?;
        chr1.push(0, 1, 2.0)?;
        chr1.push(1, 1, 3.0)?;
        chr1.seal()?;
        writer.write_chromosome("chr1", &chr1)?;

        let chr2 = SparseMatrix::intra("chr2", 2);
        writer.write_chromosome("chr2", &chr2)?;

        // canonical orientation: chr2 (60 bp) is outranked by chr1, so
        // chr2 is the row
        let mut pair = SparseMatrix::inter("chr2", 2, "chr1", 3);
        pair.push(1, 2, 4.5)?;
        pair.seal()?;
        writer.write_pair("chr2", "chr1", &pair)?;

        writer.finish()?;
        Ok(writer.into_inner().into_inner())
    }

    #[test]
    fn test_directory_listing() -> Result<()> {
        let reader = ButlrReader::from_bytes(write_fixture()?)?;
        assert_eq!(reader.header().assembly, "hg19");
        assert_eq!(reader.resolution(), 50);
        let names: Vec<_> = reader
            .chromosomes()
            .iter()
            .map(|e| (e.name.as_str(), e.size))
            .collect();
        assert_eq!(names, [("chr1", 100), ("chr2", 60)]);
        let pairs: Vec<_> = reader
            .pairs()
            .iter()
            .map(|e| (e.row.as_str(), e.col.as_str()))
            .collect();
        assert_eq!(pairs, [("chr2", "chr1")]);
        for entry in reader.chromosomes() {
            assert!(entry.body_offset > 0);
        }
        Ok(())
    }

    #[test]
    fn test_tiny_diagonal_roundtrip() -> Result<()> {
        let reader = ButlrReader::from_bytes(write_fixture()?)?;
        let location = parse_location("chr1:0-100")?;
        let dense = reader.query(&location, CoordinateUnit::BasePair)?;
        assert_eq!((dense.rows(), dense.cols()), (3, 3));
        assert_eq!(dense.row(0), [1.0, 2.0, 0.0]);
        assert_eq!(dense.row(1), [2.0, 3.0, 0.0]);
        assert_eq!(dense.row(2), [0.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_symmetry_point_query() -> Result<()> {
        let genome = Genome::from_sizes([("chr1", 150u32)]);
        let manifest = Manifest::from_reader(Cursor::new("chr1\ta.txt\n"), &genome)?;
        let mut writer =
            ButlrWriterBuilder::new("hg19", 50).build(Cursor::new(Vec::new()), &genome, &manifest)?;
        let mut store = SparseMatrix::intra("chr1", 4);
        store.push(2, 0, 7.5)?; // normalises to stored (0, 2)
        store.seal()?;
        writer.write_chromosome("chr1", &store)?;
        writer.finish()?;

        let reader = ButlrReader::from_bytes(writer.into_inner().into_inner())?;
        let dense = reader.query_intra(
            "chr1",
            BinRange::new(2, 2)?,
            BinRange::new(0, 0)?,
        )?;
        assert_eq!(dense.get(0, 0), 7.5);
        Ok(())
    }

    #[test]
    fn test_pair_query_canonical_and_transposed() -> Result<()> {
        let reader = ButlrReader::from_bytes(write_fixture()?)?;

        // canonical orientation: chr2 rows, chr1 cols
        let direct = reader.query_pair(
            "chr2",
            BinRange::new(0, 1)?,
            "chr1",
            BinRange::new(0, 2)?,
        )?;
        assert_eq!(direct.get(1, 2), 4.5);
        assert_eq!(direct.get(0, 0), 0.0);

        // non-canonical query: output transposes
        let flipped = reader.query_pair(
            "chr1",
            BinRange::new(0, 2)?,
            "chr2",
            BinRange::new(0, 1)?,
        )?;
        assert_eq!(flipped.get(2, 1), 4.5);
        assert_eq!(flipped.get(0, 0), 0.0);
        Ok(())
    }

    #[test]
    fn test_mcv_fill_for_empty_region() -> Result<()> {
        let reader = ButlrReader::from_bytes(write_fixture()?)?;
        let dense = reader.query_intra(
            "chr2",
            BinRange::new(0, 1)?,
            BinRange::new(0, 1)?,
        )?;
        assert!(dense.iter_rows().all(|row| row.iter().all(|&v| v == 0.0)));
        Ok(())
    }

    #[test]
    fn test_bin_unit_query() -> Result<()> {
        let reader = ButlrReader::from_bytes(write_fixture()?)?;
        let location = parse_location("chr1:0-1")?;
        let dense = reader.query(&location, CoordinateUnit::Bin)?;
        assert_eq!((dense.rows(), dense.cols()), (2, 2));
        assert_eq!(dense.get(0, 1), 2.0);
        Ok(())
    }

    #[test]
    fn test_unknown_chromosome_and_pair() -> Result<()> {
        let reader = ButlrReader::from_bytes(write_fixture()?)?;
        assert!(reader.bin_count("chr9").is_err());
        let result = reader.query_pair(
            "chr1",
            BinRange::new(0, 0)?,
            "chr9",
            BinRange::new(0, 0)?,
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_out_of_range_bins_rejected() -> Result<()> {
        let reader = ButlrReader::from_bytes(write_fixture()?)?;
        let result = reader.query_intra(
            "chr1",
            BinRange::new(0, 3)?,
            BinRange::new(0, 2)?,
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_truncated_file() -> Result<()> {
        let mut bytes = write_fixture()?;
        // cut into the final pair body: directory parses, chr1 queries
        // still succeed, the pair query dies on the missing bytes
        bytes.truncate(bytes.len() - 12);
        let reader = ButlrReader::from_bytes(bytes)?;
        assert!(reader
            .query_intra("chr1", BinRange::new(0, 2)?, BinRange::new(0, 2)?)
            .is_ok());
        let result = reader.query_pair(
            "chr2",
            BinRange::new(0, 1)?,
            "chr1",
            BinRange::new(0, 2)?,
        );
        assert!(result.is_err());
        Ok(())
    }
}
