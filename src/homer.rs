//! Splitter for Homer whole-genome dense matrices
//!
//! A Homer-style matrix covers every chromosome in one tab-delimited grid.
//! Region columns and rows are labelled `chrom-position`; any leading
//! unlabelled columns are discarded. The splitter cuts the grid into
//! per-chromosome and per-chromosome-pair dense matrices (the latter in
//! canonical orientation) and emits a manifest naming them, ready for the
//! encoder.
//!
//! The bin width is inferred from the labels: the smallest positive
//! distance between two positions on the same chromosome.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{Result, WriteError};
use crate::genome::{bp_to_bin, Genome};
use crate::ingest::parse_value;
use crate::manifest::canonical_orientation;

/// Output of a split: the manifest path, every matrix file written, and
/// the inferred resolution.
#[derive(Debug, Clone)]
pub struct HomerSplit {
    pub manifest: PathBuf,
    pub matrices: Vec<PathBuf>,
    pub resolution: u32,
}

/// A `chrom-position` region label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegionLabel {
    chrom: String,
    position: u64,
}

fn parse_label(token: &str) -> Option<RegionLabel> {
    let (chrom, position) = token.trim().rsplit_once('-')?;
    let position = position.parse().ok()?;
    if chrom.is_empty() {
        return None;
    }
    Some(RegionLabel {
        chrom: chrom.to_string(),
        position,
    })
}

/// Splits a whole-genome dense matrix into per-pair matrix files plus a
/// manifest, under `prefix`.
pub fn split_homer_matrix(input: &Path, genome: &Genome, prefix: &str) -> Result<HomerSplit> {
    let mut reader = File::open(input).map(BufReader::new)?;

    // header row: trailing fields that parse as labels are the columns
    let mut header = String::new();
    reader.read_line(&mut header)?;
    let header_fields: Vec<&str> = header.trim_end_matches(['\n', '\r']).split('\t').collect();
    let labels_from = header_fields
        .iter()
        .position(|field| parse_label(field).is_some())
        .ok_or_else(|| WriteError::MalformedRegionLabel {
            line: 1,
            content: header.trim_end().to_string(),
        })?;
    let mut columns = Vec::with_capacity(header_fields.len() - labels_from);
    for field in &header_fields[labels_from..] {
        let label = parse_label(field).ok_or_else(|| WriteError::MalformedRegionLabel {
            line: 1,
            content: (*field).to_string(),
        })?;
        genome.require_size(&label.chrom)?;
        columns.push(label);
    }

    // data rows: first field is the row label, the last columns.len()
    // fields are values
    let mut row_labels = Vec::new();
    let mut values: Vec<Vec<f32>> = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let label = parse_label(fields[0]).ok_or_else(|| WriteError::MalformedRegionLabel {
            line: idx + 2,
            content: fields[0].to_string(),
        })?;
        genome.require_size(&label.chrom)?;
        if fields.len() < columns.len() + 1 {
            return Err(WriteError::TooFewColumns {
                row: idx,
                got: fields.len() - 1,
                expected: columns.len(),
            }
            .into());
        }
        let row: Vec<f32> = fields[fields.len() - columns.len()..]
            .iter()
            .map(|token| parse_value(token, input, idx + 2))
            .collect();
        row_labels.push(label);
        values.push(row);
    }

    let resolution = infer_resolution(&columns, &row_labels)?;
    info!(
        "split: {} columns, {} rows, inferred resolution {resolution}",
        columns.len(),
        row_labels.len()
    );

    // (chrom, bin) -> grid index, on both axes
    let col_index = bin_index(&columns, resolution);
    let row_index = bin_index(&row_labels, resolution);
    let lookup = |row: (&str, u32), col: (&str, u32)| -> f32 {
        let direct = row_index
            .get(&(row.0.to_string(), row.1))
            .zip(col_index.get(&(col.0.to_string(), col.1)))
            .map(|(&r, &c)| values[r][c]);
        // the whole-genome grid is symmetric, so a missing cell may exist
        // under the mirrored orientation
        let mirrored = || {
            row_index
                .get(&(col.0.to_string(), col.1))
                .zip(col_index.get(&(row.0.to_string(), row.1)))
                .map(|(&r, &c)| values[r][c])
        };
        direct.or_else(mirrored).unwrap_or(0.0)
    };

    let present: Vec<&str> = genome
        .sorted_chromosomes()
        .iter()
        .map(String::as_str)
        .filter(|chrom| columns.iter().any(|l| l.chrom == *chrom))
        .collect();

    let manifest_path = PathBuf::from(format!("{prefix}.manifest"));
    let mut manifest = File::create(&manifest_path).map(BufWriter::new)?;
    let mut matrices = Vec::new();

    for &chrom in &present {
        let bins = genome.bin_count(chrom, resolution)?;
        let path = PathBuf::from(format!("{prefix}.{chrom}.matrix"));
        let mut out = File::create(&path).map(BufWriter::new)?;
        for i in 0..bins {
            let row: Vec<String> = (0..bins)
                .map(|j| lookup((chrom, i), (chrom, j)).to_string())
                .collect();
            writeln!(out, "{}", row.join("\t"))?;
        }
        out.flush()?;
        writeln!(manifest, "{chrom}\t{}", path.display())?;
        matrices.push(path);
    }

    for i in 1..present.len() {
        for j in 0..i {
            let (row_chrom, col_chrom) = canonical_orientation(genome, present[i], present[j]);
            let row_bins = genome.bin_count(row_chrom, resolution)?;
            let col_bins = genome.bin_count(col_chrom, resolution)?;
            let mut any = false;
            'probe: for bi in 0..row_bins {
                for bj in 0..col_bins {
                    if lookup((row_chrom, bi), (col_chrom, bj)) != 0.0 {
                        any = true;
                        break 'probe;
                    }
                }
            }
            if !any {
                warn!("no contacts between {row_chrom} and {col_chrom}, skipping the pair");
                continue;
            }
            let path = PathBuf::from(format!("{prefix}.{row_chrom}_{col_chrom}.matrix"));
            let mut out = File::create(&path).map(BufWriter::new)?;
            for bi in 0..row_bins {
                let row: Vec<String> = (0..col_bins)
                    .map(|bj| lookup((row_chrom, bi), (col_chrom, bj)).to_string())
                    .collect();
                writeln!(out, "{}", row.join("\t"))?;
            }
            out.flush()?;
            writeln!(manifest, "{row_chrom}\t{col_chrom}\t{}", path.display())?;
            matrices.push(path);
        }
    }

    manifest.flush()?;
    Ok(HomerSplit {
        manifest: manifest_path,
        matrices,
        resolution,
    })
}

fn bin_index(labels: &[RegionLabel], resolution: u32) -> HashMap<(String, u32), usize> {
    labels
        .iter()
        .enumerate()
        .map(|(idx, label)| {
            (
                (label.chrom.clone(), bp_to_bin(label.position, resolution)),
                idx,
            )
        })
        .collect()
}

/// Smallest positive distance between two positions on one chromosome,
/// over both axes.
fn infer_resolution(columns: &[RegionLabel], rows: &[RegionLabel]) -> Result<u32> {
    let mut per_chrom: HashMap<&str, Vec<u64>> = HashMap::new();
    for label in columns.iter().chain(rows) {
        per_chrom
            .entry(label.chrom.as_str())
            .or_default()
            .push(label.position);
    }
    let mut best: Option<u64> = None;
    for positions in per_chrom.values_mut() {
        positions.sort_unstable();
        for pair in positions.windows(2) {
            let diff = pair[1] - pair[0];
            if diff > 0 && best.map_or(true, |b| diff < b) {
                best = Some(diff);
            }
        }
    }
    match best {
        Some(diff) if diff <= u64::from(u32::MAX) => Ok(diff as u32),
        _ => Err(WriteError::InvalidResolution(
            "cannot infer bin width from region labels".to_string(),
        )
        .into()),
    }
}
