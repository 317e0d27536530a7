//! BUTLR writer
//!
//! The writer runs the two-pass protocol over a single seekable handle:
//!
//! 1. Emit the fixed prefix with zeroed offset fields, then both
//!    directories with zeroed `body_offset` placeholders, remembering the
//!    byte position of every placeholder.
//! 2. Stream each matrix body (cell region, then row-offset table) in
//!    directory order, seeking back to patch the matching placeholder with
//!    the table's start offset after each body.
//!
//! The header-size and directory-offset fields are patched the same way.
//! [`encode_manifest`] drives the whole pipeline from a genome, a manifest
//! and an ingestion format, and unlinks the output file on any failure:
//! the format has no valid-prefix semantic, so a partial file is worthless.
//!
//! Chromosomes referenced only by pair entries still receive an intra
//! directory entry (with an all-empty matrix body) so that readers can
//! recover their bin counts.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;

use super::header::{
    write_cstr, write_version, DEFAULT_MCV, FORMAT_VERSION, NUM_RESERVED, OFFSET_HEADER_SIZE,
    OFFSET_INTER_DIR, OFFSET_INTRA_DIR,
};
use crate::error::{Result, WriteError};
use crate::genome::Genome;
use crate::ingest::{load_matrix, MatrixTarget, SourceFormat};
use crate::manifest::Manifest;
use crate::sparse::SparseMatrix;

/// One directory entry awaiting its body.
#[derive(Debug, Clone)]
struct PendingBody {
    /// `name` for a chromosome, `row\tcol` for a pair
    key: String,
    /// Row count of the matrix (bins of the row chromosome)
    rows: u32,
    /// Byte offset of the placeholder `body_offset` field
    patch_at: u64,
}

/// Builder for configured [`ButlrWriter`] instances.
///
/// # Examples
///
/// ```no_run
/// # use std::io::Cursor;
/// # use butlr::{ButlrWriterBuilder, Genome, Manifest};
/// # fn demo(genome: &Genome, manifest: &Manifest) -> butlr::Result<()> {
/// let writer = ButlrWriterBuilder::new("hg19", 40_000)
///     .version("1.3")
///     .build(Cursor::new(Vec::new()), genome, manifest)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ButlrWriterBuilder {
    assembly: String,
    resolution: u32,
    version: String,
    mcv: f32,
}

impl ButlrWriterBuilder {
    #[must_use]
    pub fn new(assembly: &str, resolution: u32) -> Self {
        Self {
            assembly: assembly.to_string(),
            resolution,
            version: FORMAT_VERSION.to_string(),
            mcv: DEFAULT_MCV,
        }
    }

    /// Overrides the version string stored in the header.
    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Writes the header and placeholder directories, producing a writer
    /// that expects matrix bodies in directory order.
    pub fn build<W: Write + Seek>(
        self,
        inner: W,
        genome: &Genome,
        manifest: &Manifest,
    ) -> Result<ButlrWriter<W>> {
        ButlrWriter::new(inner, genome, manifest, self)
    }
}

/// Low-level BUTLR writer over any seekable sink.
///
/// Matrix bodies must be supplied in directory order: every intra
/// chromosome first, then every pair, both in canonical iteration order.
/// [`finish`](Self::finish) fails if any directory entry is still
/// unpatched.
pub struct ButlrWriter<W: Write + Seek> {
    inner: W,
    resolution: u32,
    mcv: f32,
    pending: Vec<PendingBody>,
    next: usize,
}

impl<W: Write + Seek> ButlrWriter<W> {
    fn new(
        mut inner: W,
        genome: &Genome,
        manifest: &Manifest,
        config: ButlrWriterBuilder,
    ) -> Result<Self> {
        let chroms = directory_chromosomes(genome, manifest);
        let pairs = manifest.ordered_pairs(genome);
        let mut pending = Vec::with_capacity(chroms.len() + pairs.len());

        // fixed prefix with placeholder offset fields
        inner.write_u32::<LittleEndian>(0)?; // header size
        write_version(&mut inner, &config.version)?;
        inner.write_u32::<LittleEndian>(0)?; // intra directory offset
        inner.write_u32::<LittleEndian>(0)?; // inter directory offset
        write_cstr(&mut inner, &config.assembly)?;
        inner.write_u32::<LittleEndian>(config.resolution)?;
        inner.write_f32::<LittleEndian>(config.mcv)?;
        for _ in 0..NUM_RESERVED {
            inner.write_u32::<LittleEndian>(0)?;
        }

        let intra_offset = inner.stream_position()?;
        patch_u32(&mut inner, OFFSET_INTRA_DIR, intra_offset as u32)?;
        for chrom in &chroms {
            write_cstr(&mut inner, chrom)?;
            inner.write_u32::<LittleEndian>(genome.require_size(chrom)?)?;
            pending.push(PendingBody {
                key: chrom.to_string(),
                rows: genome.bin_count(chrom, config.resolution)?,
                patch_at: inner.stream_position()?,
            });
            inner.write_u64::<LittleEndian>(0)?;
        }

        if !pairs.is_empty() {
            let inter_offset = inner.stream_position()?;
            patch_u32(&mut inner, OFFSET_INTER_DIR, inter_offset as u32)?;
            for (row, col) in &pairs {
                write_cstr(&mut inner, &format!("{row}\t{col}"))?;
                pending.push(PendingBody {
                    key: format!("{row}\t{col}"),
                    rows: genome.bin_count(row, config.resolution)?,
                    patch_at: inner.stream_position()?,
                });
                inner.write_u64::<LittleEndian>(0)?;
            }
        }

        let header_size = inner.stream_position()?;
        patch_u32(&mut inner, OFFSET_HEADER_SIZE, header_size as u32)?;

        Ok(Self {
            inner,
            resolution: config.resolution,
            mcv: config.mcv,
            pending,
            next: 0,
        })
    }

    /// Resolution the writer was configured with.
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Most-common value stored in the header.
    #[must_use]
    pub fn mcv(&self) -> f32 {
        self.mcv
    }

    /// Streams one chromosome's intrachromosomal body. Must follow
    /// directory order.
    pub fn write_chromosome(&mut self, chrom: &str, store: &SparseMatrix) -> Result<()> {
        self.write_body(chrom, store)
    }

    /// Streams one canonical pair's body. Must follow directory order.
    pub fn write_pair(&mut self, row: &str, col: &str, store: &SparseMatrix) -> Result<()> {
        self.write_body(&format!("{row}\t{col}"), store)
    }

    fn write_body(&mut self, key: &str, store: &SparseMatrix) -> Result<()> {
        let Some(entry) = self.pending.get(self.next) else {
            return Err(WriteError::OutOfOrder {
                expected: "no further matrices".to_string(),
                got: key.to_string(),
            }
            .into());
        };
        if entry.key != key {
            return Err(WriteError::OutOfOrder {
                expected: entry.key.clone(),
                got: key.to_string(),
            }
            .into());
        }
        debug_assert_eq!(store.rows(), entry.rows);

        let rows = entry.rows as usize;
        let mut offsets = vec![0u64; rows + 1];
        let mut cursor = self.inner.stream_position()?;
        let mut seen_cells = false;
        let mut groups = store.iter_rows().peekable();
        for row in 0..rows {
            match groups.peek() {
                Some((group_row, cells)) if *group_row as usize == row => {
                    offsets[row] = cursor;
                    for cell in *cells {
                        self.inner.write_u32::<LittleEndian>(cell.col)?;
                        self.inner.write_f32::<LittleEndian>(cell.value)?;
                    }
                    cursor += 8 * cells.len() as u64;
                    seen_cells = true;
                    groups.next();
                }
                _ => {
                    // rows before the first cell stay at the 0 placeholder;
                    // later empty rows carry the running cursor
                    offsets[row] = if seen_cells { cursor } else { 0 };
                }
            }
        }
        // sentinel: the start of the row-offset table itself
        offsets[rows] = cursor;

        for offset in &offsets {
            self.inner.write_u64::<LittleEndian>(*offset)?;
        }
        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(entry.patch_at))?;
        self.inner.write_u64::<LittleEndian>(cursor)?;
        self.inner.seek(SeekFrom::Start(end))?;

        debug!("wrote body for {key}: {} cells, {rows} rows", store.len());
        self.next += 1;
        Ok(())
    }

    /// Verifies that every directory entry received a body, then flushes.
    pub fn finish(&mut self) -> Result<()> {
        if self.next < self.pending.len() {
            return Err(WriteError::MissingBodies(self.pending.len() - self.next).into());
        }
        self.inner.flush()?;
        Ok(())
    }

    /// Consumes the writer and returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Chromosomes that receive an intra directory entry: every chromosome the
/// manifest references, in canonical genome order.
fn directory_chromosomes<'a>(genome: &'a Genome, manifest: &Manifest) -> Vec<&'a str> {
    let referenced: HashSet<&str> = manifest
        .ordered_pairs(genome)
        .into_iter()
        .flat_map(|(row, col)| [row, col])
        .chain(manifest.ordered_chromosomes(genome))
        .collect();
    genome
        .sorted_chromosomes()
        .iter()
        .map(String::as_str)
        .filter(|chrom| referenced.contains(chrom))
        .collect()
}

fn patch_u32<W: Write + Seek>(writer: &mut W, at: u64, value: u32) -> Result<()> {
    let position = writer.stream_position()?;
    writer.seek(SeekFrom::Start(at))?;
    writer.write_u32::<LittleEndian>(value)?;
    writer.seek(SeekFrom::Start(position))?;
    Ok(())
}

/// Options for [`encode_manifest`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub assembly: String,
    pub resolution: u32,
    pub format: SourceFormat,
    pub version: String,
}

impl EncodeOptions {
    #[must_use]
    pub fn new(assembly: &str, resolution: u32, format: SourceFormat) -> Self {
        Self {
            assembly: assembly.to_string(),
            resolution,
            format,
            version: FORMAT_VERSION.to_string(),
        }
    }
}

/// Encodes every matrix named by a manifest into a BUTLR file at `output`.
///
/// On any failure the partial output file is deleted before the error is
/// returned.
pub fn encode_manifest(
    genome: &Genome,
    manifest: &Manifest,
    options: &EncodeOptions,
    output: &Path,
) -> Result<()> {
    let mut guard = UnlinkOnFailure::new(output);
    let handle = File::create(output).map(BufWriter::new)?;
    let result = encode_to(handle, genome, manifest, options);
    if result.is_ok() {
        guard.disarm();
    }
    result
}

fn encode_to<W: Write + Seek>(
    inner: W,
    genome: &Genome,
    manifest: &Manifest,
    options: &EncodeOptions,
) -> Result<()> {
    let mut writer = ButlrWriterBuilder::new(&options.assembly, options.resolution)
        .version(&options.version)
        .build(inner, genome, manifest)?;
    let mcv = writer.mcv();

    for chrom in directory_chromosomes(genome, manifest) {
        let bins = genome.bin_count(chrom, options.resolution)?;
        let store = match manifest.intra(chrom) {
            Some(path) => load_matrix(
                path,
                options.format,
                MatrixTarget::intra(chrom, bins),
                options.resolution,
                mcv,
            )?,
            // referenced only by a pair: empty placeholder matrix
            None => SparseMatrix::intra(chrom, bins),
        };
        writer.write_chromosome(chrom, &store)?;
    }

    for (row, col) in manifest.ordered_pairs(genome) {
        let source = manifest
            .inter(row, col)
            .expect("ordered_pairs only yields manifest members");
        let target = MatrixTarget::inter(
            (row, genome.bin_count(row, options.resolution)?),
            (col, genome.bin_count(col, options.resolution)?),
            source.swapped,
        );
        let store = load_matrix(
            &source.path,
            options.format,
            target,
            options.resolution,
            mcv,
        )?;
        writer.write_pair(row, col, &store)?;
    }

    writer.finish()
}

/// Deletes the output path on drop unless disarmed; write failures must
/// not leave a partial file behind.
struct UnlinkOnFailure<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> UnlinkOnFailure<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for UnlinkOnFailure<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(self.path);
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Cursor;

    use crate::btr::header::{Directory, FileHeader};

    fn test_genome() -> Genome {
        Genome::from_sizes([("chr1", 100u32)])
    }

    fn intra_manifest(genome: &Genome) -> Manifest {
        Manifest::from_reader(std::io::Cursor::new("chr1\tunused.txt\n"), genome).unwrap()
    }

    fn write_single(store: &SparseMatrix) -> Result<Vec<u8>> {
        let genome = test_genome();
        let manifest = intra_manifest(&genome);
        let mut writer = ButlrWriterBuilder::new("hg19", 50).build(
            Cursor::new(Vec::new()),
            &genome,
            &manifest,
        )?;
        writer.write_chromosome("chr1", store)?;
        writer.finish()?;
        Ok(writer.into_inner().into_inner())
    }

    #[test]
    fn test_backpatched_header() -> Result<()> {
        let mut store = SparseMatrix::intra("chr1", 3);
        store.push(0, 0, 1.0)?;
        store.seal()?;
        let bytes = write_single(&store)?;

        let header = FileHeader::from_bytes(&bytes)?;
        assert!(header.header_size > 0);
        assert!(header.intra_offset > 0);
        assert_eq!(header.inter_offset, 0);
        assert_eq!(header.assembly, "hg19");
        assert_eq!(header.resolution, 50);

        let directory = Directory::from_bytes(&bytes, &header)?;
        let entry = directory.chrom("chr1").unwrap();
        assert_eq!(entry.size, 100);
        assert!(entry.body_offset >= u64::from(header.header_size));
        Ok(())
    }

    #[test]
    fn test_row_offset_table_layout() -> Result<()> {
        // 4 bins, single cell at (2, 3): table is [0, 0, B, B+8, B+8]
        let genome = Genome::from_sizes([("chr1", 150u32)]);
        let manifest = intra_manifest(&genome);
        let mut store = SparseMatrix::intra("chr1", 4);
        store.push(2, 3, 9.0)?;
        store.seal()?;

        let mut writer = ButlrWriterBuilder::new("hg19", 50).build(
            Cursor::new(Vec::new()),
            &genome,
            &manifest,
        )?;
        writer.write_chromosome("chr1", &store)?;
        writer.finish()?;
        let bytes = writer.into_inner().into_inner();

        let header = FileHeader::from_bytes(&bytes)?;
        let directory = Directory::from_bytes(&bytes, &header)?;
        let body = directory.chrom("chr1").unwrap().body_offset as usize;

        let cell_start = u64::from(header.header_size);
        let entries: Vec<u64> = (0..=4)
            .map(|i| LittleEndian::read_u64(&bytes[body + 8 * i..body + 8 * i + 8]))
            .collect();
        assert_eq!(
            entries,
            [0, 0, cell_start, cell_start + 8, cell_start + 8]
        );
        // sentinel equals the start of the table
        assert_eq!(entries[4] as usize, body);
        // the single cell reads back
        assert_eq!(LittleEndian::read_u32(&bytes[body - 8..body - 4]), 3);
        assert_eq!(LittleEndian::read_f32(&bytes[body - 4..body]), 9.0);
        Ok(())
    }

    #[test]
    fn test_out_of_order_rejected() -> Result<()> {
        let genome = Genome::from_sizes([("chr1", 100u32), ("chr2", 50)]);
        let manifest = Manifest::from_reader(
            std::io::Cursor::new("chr1\ta.txt\nchr2\tb.txt\n"),
            &genome,
        )?;
        let mut writer = ButlrWriterBuilder::new("hg19", 50).build(
            Cursor::new(Vec::new()),
            &genome,
            &manifest,
        )?;
        let store = SparseMatrix::intra("chr2", 2);
        assert!(writer.write_chromosome("chr2", &store).is_err());
        Ok(())
    }

    #[test]
    fn test_finish_requires_all_bodies() -> Result<()> {
        let genome = test_genome();
        let manifest = intra_manifest(&genome);
        let mut writer = ButlrWriterBuilder::new("hg19", 50).build(
            Cursor::new(Vec::new()),
            &genome,
            &manifest,
        )?;
        assert!(writer.finish().is_err());
        Ok(())
    }

    #[test]
    fn test_encode_and_open_roundtrip() -> Result<()> {
        use crate::btr::reader::{BinRange, ButlrReader};

        let dir = std::env::temp_dir().join("butlr_encode_roundtrip");
        std::fs::create_dir_all(&dir)?;
        let cells = dir.join("chr1.txt");
        std::fs::write(&cells, "0\t0\t1.0\n0\t50\t2.0\n50\t50\t3.0\n")?;
        let manifest_path = dir.join("mats.txt");
        std::fs::write(&manifest_path, format!("chr1\t{}\n", cells.display()))?;

        let genome = test_genome();
        let manifest = Manifest::load(&manifest_path, &genome)?;
        let options = EncodeOptions::new(
            "hg19",
            50,
            SourceFormat::Coordinate(Default::default()),
        );
        let output = dir.join("mats.50.btr");
        encode_manifest(&genome, &manifest, &options, &output)?;

        let reader = ButlrReader::open(&output)?;
        assert_eq!(reader.header().assembly, "hg19");
        let dense = reader.query_intra("chr1", BinRange::new(0, 2)?, BinRange::new(0, 2)?)?;
        assert_eq!(dense.row(0), [1.0, 2.0, 0.0]);
        assert_eq!(dense.row(1), [2.0, 3.0, 0.0]);
        assert_eq!(dense.row(2), [0.0, 0.0, 0.0]);

        for path in [cells, manifest_path, output] {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    #[test]
    fn test_canonical_pair_determinism() -> Result<()> {
        use crate::btr::reader::ButlrReader;

        let dir = std::env::temp_dir().join("butlr_pair_determinism");
        std::fs::create_dir_all(&dir)?;
        let genome = Genome::from_sizes([("chr1", 500u32), ("chr2", 1000)]);

        // the same contact listed from either side: file A binds i to the
        // listed-first chr2, file B to the listed-first chr1
        let file_a = dir.join("a.txt");
        std::fs::write(&file_a, "250\t100\t3.25\n")?;
        let file_b = dir.join("b.txt");
        std::fs::write(&file_b, "100\t250\t3.25\n")?;

        let options = EncodeOptions::new(
            "hg19",
            50,
            SourceFormat::Coordinate(Default::default()),
        );
        let mut outputs = Vec::new();
        for (listed, file) in [("chr2\tchr1", &file_a), ("chr1\tchr2", &file_b)] {
            let manifest = Manifest::from_reader(
                std::io::Cursor::new(format!("{listed}\t{}\n", file.display())),
                &genome,
            )?;
            let output = dir.join(format!("{}.btr", outputs.len()));
            encode_manifest(&genome, &manifest, &options, &output)?;
            outputs.push(std::fs::read(&output)?);
            std::fs::remove_file(output)?;
        }
        assert_eq!(outputs[0], outputs[1]);

        // chr2 outranks chr1, so the stored key is chr1 row, chr2 column
        let reader = ButlrReader::from_bytes(outputs.pop().unwrap())?;
        let pairs: Vec<_> = reader
            .pairs()
            .iter()
            .map(|e| (e.row.as_str(), e.col.as_str()))
            .collect();
        assert_eq!(pairs, [("chr1", "chr2")]);

        for path in [file_a, file_b] {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    #[test]
    fn test_failed_encode_unlinks_output() -> Result<()> {
        let dir = std::env::temp_dir();
        let genome = test_genome();
        let manifest_path = dir.join("butlr_test_unlink.manifest");
        std::fs::write(&manifest_path, "chr1\t/definitely/not/present.txt\n")?;
        let manifest = Manifest::load(&manifest_path, &genome)?;
        let output = dir.join("butlr_test_unlink.btr");

        let options = EncodeOptions::new(
            "hg19",
            50,
            SourceFormat::Coordinate(Default::default()),
        );
        let result = encode_manifest(&genome, &manifest, &options, &output);
        std::fs::remove_file(&manifest_path)?;
        assert!(result.is_err());
        assert!(!output.exists());
        Ok(())
    }
}
