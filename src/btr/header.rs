//! # BUTLR header and directory definitions
//!
//! A BUTLR file opens with a fixed prefix, followed by the assembly name
//! and format constants, then one or two directories:
//!
//! | Offset | Content |
//! |---|---|
//! | 0..4   | header size in bytes (u32, backpatched last) |
//! | 4..20  | version string, NUL-terminated, zero-padded to 16 bytes |
//! | 20..24 | intrachromosomal directory offset (u32, backpatched) |
//! | 24..28 | interchromosomal directory offset (u32, 0 if absent) |
//! | 28..   | assembly name (NUL-terminated), resolution (u32), most-common value (f32), four reserved u32 |
//!
//! The intra directory holds one entry per chromosome
//! (`name\0 size:u32 body_offset:u64`); the inter directory one entry per
//! canonical pair (`"row\tcol"\0 body_offset:u64`). Every `body_offset`
//! points at the start of that matrix's row-offset table, not at its cells.
//!
//! All integers are little-endian unsigned, floats little-endian IEEE-754,
//! strings 7-bit ASCII with a single 0x00 terminator.

use std::collections::HashMap;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{HeaderError, ReadError, Result};

/// Byte offset of the header-size field.
pub const OFFSET_HEADER_SIZE: u64 = 0;
/// Byte offset of the fixed-width version string field.
pub const OFFSET_VERSION: u64 = 4;
/// Byte offset of the intrachromosomal directory offset field.
pub const OFFSET_INTRA_DIR: u64 = 20;
/// Byte offset of the interchromosomal directory offset field.
pub const OFFSET_INTER_DIR: u64 = 24;
/// Byte offset of the assembly name.
pub const OFFSET_ASSEMBLY: u64 = 28;

/// Size of the version string field in bytes, terminator included.
pub const SIZE_VERSION_FIELD: usize = 16;
/// Number of reserved u32 fields following the most-common value.
pub const NUM_RESERVED: usize = 4;

/// Format version written by this crate.
pub const FORMAT_VERSION: &str = "1.3";
/// Most-common value written by this crate. Absent cells read back as the
/// stored MCV; writers always store 0.0.
pub const DEFAULT_MCV: f32 = 0.0;

/// Parsed fixed header of a BUTLR file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    /// Total size of the header region (prefix plus both directories)
    pub header_size: u32,
    /// Version string, without padding
    pub version: String,
    /// Assembly name
    pub assembly: String,
    /// Resolution in base pairs per bin
    pub resolution: u32,
    /// Most-common value, substituted for absent cells
    pub mcv: f32,
    /// Offset of the intrachromosomal directory
    pub intra_offset: u32,
    /// Offset of the interchromosomal directory, 0 if absent
    pub inter_offset: u32,
}

impl FileHeader {
    /// Parses the fixed header from the start of a file buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is too small, a string field is
    /// unterminated or non-ASCII, or a directory offset points outside the
    /// header region.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let fixed_end = OFFSET_ASSEMBLY as usize;
        if data.len() < fixed_end {
            return Err(ReadError::TooSmall(data.len()).into());
        }
        let header_size = LittleEndian::read_u32(&data[0..4]);
        if (header_size as usize) > data.len() {
            return Err(ReadError::Truncated(header_size as usize).into());
        }
        let version = {
            let field = &data[OFFSET_VERSION as usize..OFFSET_INTRA_DIR as usize];
            let (text, _) = read_cstr(field, 0)?;
            text
        };
        let intra_offset = LittleEndian::read_u32(&data[20..24]);
        let inter_offset = LittleEndian::read_u32(&data[24..28]);

        let header = &data[..header_size as usize];
        let (assembly, cursor) = read_cstr(header, fixed_end)?;
        // resolution + mcv + reserved fields must fit before the intra dir
        let constants_end = cursor + 4 + 4 + NUM_RESERVED * 4;
        if constants_end > header.len() {
            return Err(HeaderError::TruncatedDirectory(cursor).into());
        }
        let resolution = LittleEndian::read_u32(&header[cursor..cursor + 4]);
        let mcv = LittleEndian::read_f32(&header[cursor + 4..cursor + 8]);
        // reserved fields are ignored on read

        let in_range = |offset: u32| (offset as usize) >= constants_end && offset <= header_size;
        if !in_range(intra_offset) {
            return Err(HeaderError::ImpossibleOffset {
                offset: intra_offset,
                header_size,
            }
            .into());
        }
        if inter_offset != 0 && (!in_range(inter_offset) || inter_offset < intra_offset) {
            return Err(HeaderError::ImpossibleOffset {
                offset: inter_offset,
                header_size,
            }
            .into());
        }

        Ok(Self {
            header_size,
            version,
            assembly,
            resolution,
            mcv,
            intra_offset,
            inter_offset,
        })
    }
}

/// One chromosome entry of the intra directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromEntry {
    pub name: String,
    /// Chromosome size in base pairs
    pub size: u32,
    /// Offset of the matrix's row-offset table
    pub body_offset: u64,
}

/// One pair entry of the inter directory. The row chromosome is the
/// outranked one of the pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairEntry {
    pub row: String,
    pub col: String,
    /// Offset of the matrix's row-offset table
    pub body_offset: u64,
}

/// Parsed directories of a BUTLR file.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    chroms: Vec<ChromEntry>,
    pairs: Vec<PairEntry>,
    chrom_index: HashMap<String, usize>,
    pair_index: HashMap<(String, String), usize>,
}

impl Directory {
    /// Parses both directories out of a file buffer.
    pub fn from_bytes(data: &[u8], header: &FileHeader) -> Result<Self> {
        let mut directory = Self::default();
        let header_end = header.header_size as usize;
        let intra_end = if header.inter_offset != 0 {
            header.inter_offset as usize
        } else {
            header_end
        };

        let mut cursor = header.intra_offset as usize;
        while cursor < intra_end {
            let (name, next) = read_cstr(&data[..intra_end], cursor)?;
            if next + 12 > intra_end {
                return Err(HeaderError::TruncatedDirectory(cursor).into());
            }
            let size = LittleEndian::read_u32(&data[next..next + 4]);
            let body_offset = LittleEndian::read_u64(&data[next + 4..next + 12]);
            directory.push_chrom(ChromEntry {
                name,
                size,
                body_offset,
            });
            cursor = next + 12;
        }

        if header.inter_offset != 0 {
            let mut cursor = header.inter_offset as usize;
            while cursor < header_end {
                let (key, next) = read_cstr(&data[..header_end], cursor)?;
                if next + 8 > header_end {
                    return Err(HeaderError::TruncatedDirectory(cursor).into());
                }
                let body_offset = LittleEndian::read_u64(&data[next..next + 8]);
                let Some((row, col)) = key.split_once('\t').filter(|(r, c)| {
                    !r.is_empty() && !c.is_empty() && !c.contains('\t')
                }) else {
                    return Err(HeaderError::MalformedPairKey(key).into());
                };
                directory.push_pair(PairEntry {
                    row: row.to_string(),
                    col: col.to_string(),
                    body_offset,
                });
                cursor = next + 8;
            }
        }

        directory.check_canonical()?;
        Ok(directory)
    }

    fn push_chrom(&mut self, entry: ChromEntry) {
        self.chrom_index
            .insert(entry.name.clone(), self.chroms.len());
        self.chroms.push(entry);
    }

    fn push_pair(&mut self, entry: PairEntry) {
        self.pair_index
            .insert((entry.row.clone(), entry.col.clone()), self.pairs.len());
        self.pairs.push(entry);
    }

    /// Rejects pair entries stored against the canonical-outranked-is-row
    /// rule, where both chromosome sizes are known.
    fn check_canonical(&self) -> Result<()> {
        for pair in &self.pairs {
            let row = self.chrom(&pair.row).map(|e| e.size);
            let col = self.chrom(&pair.col).map(|e| e.size);
            if let (Some(row_size), Some(col_size)) = (row, col) {
                let col_outranks =
                    col_size > row_size || (col_size == row_size && pair.col < pair.row);
                if !col_outranks {
                    return Err(HeaderError::NonCanonicalPair {
                        row: pair.row.clone(),
                        col: pair.col.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Chromosome entries in directory order.
    #[must_use]
    pub fn chromosomes(&self) -> &[ChromEntry] {
        &self.chroms
    }

    /// Pair entries in directory order.
    #[must_use]
    pub fn pairs(&self) -> &[PairEntry] {
        &self.pairs
    }

    /// Looks up a chromosome entry by name.
    #[must_use]
    pub fn chrom(&self, name: &str) -> Option<&ChromEntry> {
        self.chrom_index.get(name).map(|&i| &self.chroms[i])
    }

    /// Looks up a pair entry by its canonical (row, col) orientation.
    #[must_use]
    pub fn pair(&self, row: &str, col: &str) -> Option<&PairEntry> {
        self.pair_index
            .get(&(row.to_string(), col.to_string()))
            .map(|&i| &self.pairs[i])
    }
}

/// Reads a NUL-terminated ASCII string starting at `offset`, returning the
/// string and the offset just past the terminator.
pub(crate) fn read_cstr(data: &[u8], offset: usize) -> Result<(String, usize)> {
    if offset >= data.len() {
        return Err(HeaderError::UnterminatedString(offset).into());
    }
    let Some(len) = memchr::memchr(0, &data[offset..]) else {
        return Err(HeaderError::UnterminatedString(offset).into());
    };
    let bytes = &data[offset..offset + len];
    if !bytes.is_ascii() {
        return Err(HeaderError::NonAsciiString(offset).into());
    }
    Ok((
        std::str::from_utf8(bytes)?.to_string(),
        offset + len + 1,
    ))
}

/// Writes a NUL-terminated ASCII string.
pub(crate) fn write_cstr<W: Write>(writer: &mut W, text: &str) -> Result<()> {
    if !text.is_ascii() || text.contains('\0') {
        return Err(HeaderError::NonAsciiString(0).into());
    }
    writer.write_all(text.as_bytes())?;
    writer.write_u8(0)?;
    Ok(())
}

/// Writes the fixed-width version field, zero-padded to 16 bytes.
pub(crate) fn write_version<W: Write>(writer: &mut W, version: &str) -> Result<()> {
    if !version.is_ascii() || version.len() >= SIZE_VERSION_FIELD {
        return Err(HeaderError::VersionTooLong(version.to_string()).into());
    }
    let mut field = [0u8; SIZE_VERSION_FIELD];
    field[..version.len()].copy_from_slice(version.as_bytes());
    writer.write_all(&field)?;
    Ok(())
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;

    /// Hand-assembles a header with one chromosome entry and no pairs.
    fn tiny_header_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes()); // header size, patched below
        write_version(&mut buf, FORMAT_VERSION).unwrap();
        buf.extend_from_slice(&0u32.to_le_bytes()); // intra dir, patched below
        buf.extend_from_slice(&0u32.to_le_bytes()); // inter dir, absent
        write_cstr(&mut buf, "hg19").unwrap();
        buf.extend_from_slice(&40_000u32.to_le_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        buf.extend_from_slice(&[0u8; NUM_RESERVED * 4]);
        let intra = buf.len() as u32;
        write_cstr(&mut buf, "chr1").unwrap();
        buf.extend_from_slice(&249_250_621u32.to_le_bytes());
        buf.extend_from_slice(&1234u64.to_le_bytes());
        let size = buf.len() as u32;
        buf[0..4].copy_from_slice(&size.to_le_bytes());
        buf[20..24].copy_from_slice(&intra.to_le_bytes());
        buf
    }

    #[test]
    fn test_parse_roundtrip() -> Result<()> {
        let bytes = tiny_header_bytes();
        let header = FileHeader::from_bytes(&bytes)?;
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.assembly, "hg19");
        assert_eq!(header.resolution, 40_000);
        assert_eq!(header.mcv, 0.0);
        assert_eq!(header.inter_offset, 0);

        let directory = Directory::from_bytes(&bytes, &header)?;
        assert_eq!(directory.chromosomes().len(), 1);
        let entry = directory.chrom("chr1").unwrap();
        assert_eq!(entry.size, 249_250_621);
        assert_eq!(entry.body_offset, 1234);
        assert!(directory.pairs().is_empty());
        Ok(())
    }

    #[test]
    fn test_too_small() {
        assert!(FileHeader::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_truncated_header_size() {
        let mut bytes = tiny_header_bytes();
        // claim a header larger than the buffer
        let bogus = (bytes.len() + 50) as u32;
        bytes[0..4].copy_from_slice(&bogus.to_le_bytes());
        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_truncated_directory_entry() {
        let mut bytes = tiny_header_bytes();
        // shrink the header so the chromosome entry is cut mid-field
        let short = (bytes.len() - 6) as u32;
        bytes[0..4].copy_from_slice(&short.to_le_bytes());
        let header = FileHeader::from_bytes(&bytes).unwrap();
        assert!(Directory::from_bytes(&bytes, &header).is_err());
    }

    #[test]
    fn test_version_too_long() {
        let mut buf = Vec::new();
        assert!(write_version(&mut buf, "a-very-long-version-string").is_err());
        assert!(write_version(&mut buf, "123456789012345").is_ok());
        assert_eq!(buf.len(), SIZE_VERSION_FIELD);
    }

    #[test]
    fn test_cstr_roundtrip() -> Result<()> {
        let mut buf = Vec::new();
        write_cstr(&mut buf, "chr2\tchr1")?;
        let (text, next) = read_cstr(&buf, 0)?;
        assert_eq!(text, "chr2\tchr1");
        assert_eq!(next, buf.len());
        Ok(())
    }

    #[test]
    fn test_cstr_rejects_non_ascii() {
        let mut buf = Vec::new();
        assert!(write_cstr(&mut buf, "chrß").is_err());
        assert!(read_cstr(&[0xC3, 0x9F, 0x00], 0).is_err());
    }

    #[test]
    fn test_unterminated_cstr() {
        assert!(read_cstr(b"chr1", 0).is_err());
    }
}
