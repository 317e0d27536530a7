//! Small parsing helpers shared by the binaries

use std::path::{Path, PathBuf};

use crate::error::{QueryError, Result, WriteError};

/// Parses a resolution string: a decimal number optionally suffixed by `k`
/// (x1000) or `m` (x1000000), case-insensitive. A fractional prefix such as
/// `0.005m` is accepted when the product is an exact bin width.
pub fn parse_resolution(text: &str) -> Result<u32> {
    let trimmed = text.trim();
    let invalid = || WriteError::InvalidResolution(text.to_string());
    let (prefix, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1_000.0),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1_000_000.0),
        Some(c) if c.is_ascii_digit() => (trimmed, 1.0),
        _ => return Err(invalid().into()),
    };
    let value: f64 = prefix.parse().map_err(|_| invalid())?;
    let scaled = value * multiplier;
    let rounded = scaled.round();
    if !(scaled.is_finite() && (scaled - rounded).abs() < 1e-6) {
        return Err(invalid().into());
    }
    if rounded < 1.0 || rounded > f64::from(u32::MAX) {
        return Err(invalid().into());
    }
    Ok(rounded as u32)
}

/// One side of a location query: a chromosome with optional bounds.
///
/// Bounds are in base pairs or bins depending on the invocation; the two
/// interpretations are mutually exclusive and resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub chrom: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// A parsed location: one region, or two for a chromosome-pair query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub row: Region,
    pub col: Option<Region>,
}

/// Parses `chr`, `chr:start-end`, or the two-sided
/// `chrA:start-end,chrB:start-end` forms.
pub fn parse_location(text: &str) -> Result<Location> {
    let mut parts = text.split(',');
    let row = parse_region(parts.next().unwrap_or(""))?;
    let col = parts.next().map(parse_region).transpose()?;
    if parts.next().is_some() {
        return Err(QueryError::MalformedLocation(text.to_string()).into());
    }
    Ok(Location { row, col })
}

fn parse_region(text: &str) -> Result<Region> {
    let text = text.trim();
    if text.is_empty() {
        return Err(QueryError::MalformedLocation(text.to_string()).into());
    }
    // a chromosome name may itself contain ':', so only the last segment
    // is considered a candidate range
    if let Some((chrom, range)) = text.rsplit_once(':') {
        if let Some((start, end)) = range.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.trim().parse(), end.trim().parse()) {
                if end < start {
                    return Err(QueryError::InvalidRange { start, end }.into());
                }
                return Ok(Region {
                    chrom: chrom.to_string(),
                    start: Some(start),
                    end: Some(end),
                });
            }
        }
    }
    Ok(Region {
        chrom: text.to_string(),
        start: None,
        end: None,
    })
}

/// Default output path for the encoder: `<manifest-basename>.<resolution>.btr`.
#[must_use]
pub fn default_output_name(manifest: &Path, resolution: u32) -> PathBuf {
    let stem = manifest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "matrix".to_string());
    manifest.with_file_name(format!("{stem}.{resolution}.btr"))
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_resolution_plain_and_suffixed() -> Result<()> {
        assert_eq!(parse_resolution("5000")?, 5000);
        assert_eq!(parse_resolution("5k")?, 5000);
        assert_eq!(parse_resolution("5K")?, 5000);
        assert_eq!(parse_resolution("1m")?, 1_000_000);
        assert_eq!(parse_resolution("0.005m")?, 5000);
        assert_eq!(parse_resolution("2.5k")?, 2500);
        Ok(())
    }

    #[test]
    fn test_resolution_rejects_invalid() {
        for text in ["", "k", "5g", "0", "-5k", "0.0005k", "5kk"] {
            assert!(parse_resolution(text).is_err(), "accepted {text:?}");
        }
    }

    #[test]
    fn test_location_single() -> Result<()> {
        let loc = parse_location("chr1")?;
        assert_eq!(loc.row.chrom, "chr1");
        assert_eq!(loc.row.start, None);
        assert!(loc.col.is_none());

        let loc = parse_location("chr1:0-100")?;
        assert_eq!(loc.row.start, Some(0));
        assert_eq!(loc.row.end, Some(100));
        Ok(())
    }

    #[test]
    fn test_location_pair() -> Result<()> {
        let loc = parse_location("chr2:50-200,chr1:0-100")?;
        assert_eq!(loc.row.chrom, "chr2");
        let col = loc.col.unwrap();
        assert_eq!(col.chrom, "chr1");
        assert_eq!(col.end, Some(100));
        Ok(())
    }

    #[test]
    fn test_location_inverted_range() {
        assert!(parse_location("chr1:100-50").is_err());
        assert!(parse_location("chr1:0-10,chr2:9-3").is_err());
    }

    #[test]
    fn test_default_output_name() {
        let path = default_output_name(Path::new("/data/mats.txt"), 40_000);
        assert_eq!(path, Path::new("/data/mats.40000.btr"));
    }
}
