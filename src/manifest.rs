//! Matrix manifest: which source file feeds which matrix
//!
//! A manifest is a text file with one matrix per line. Two tab-separated
//! fields (`chr<tab>path`) name an intrachromosomal matrix; three fields
//! (`chrA<tab>chrB<tab>path`) name an interchromosomal matrix, which
//! collapses back to intrachromosomal when both names agree. Pairs are keyed
//! under their canonical orientation regardless of the listed order, and the
//! listed-order swap is remembered so ingestion can re-orient coordinates.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Result, WriteError};
use crate::genome::Genome;

/// Canonical orientation for an unordered pair: the outranked chromosome is
/// the row, the higher-priority chromosome the column.
#[must_use]
pub fn canonical_orientation<'a>(genome: &Genome, a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if genome.is_ahead(a, b) {
        (b, a)
    } else {
        (a, b)
    }
}

/// Source path for one interchromosomal matrix.
#[derive(Debug, Clone)]
pub struct PairSource {
    pub path: PathBuf,
    /// True when the manifest listed the pair in the non-canonical order,
    /// so the source file's (i, j) coordinates must be swapped.
    pub swapped: bool,
}

/// Parsed manifest, keyed by chromosome and by canonical pair.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    intra: HashMap<String, PathBuf>,
    inter: HashMap<(String, String), PairSource>,
}

impl Manifest {
    /// Loads and validates a manifest file against a genome table.
    pub fn load<P: AsRef<Path>>(path: P, genome: &Genome) -> Result<Self> {
        let reader = File::open(path).map(BufReader::new)?;
        Self::from_reader(reader, genome)
    }

    /// Parses manifest lines from any reader.
    pub fn from_reader<R: BufRead>(reader: R, genome: &Genome) -> Result<Self> {
        let mut manifest = Self::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            match fields.as_slice() {
                [chrom, path] => manifest.add_intra(genome, chrom, Path::new(path))?,
                [a, b, path] if a == b => manifest.add_intra(genome, a, Path::new(path))?,
                [a, b, path] => manifest.add_inter(genome, a, b, Path::new(path))?,
                _ => {
                    return Err(WriteError::MalformedManifestLine {
                        line: idx + 1,
                        content: line.clone(),
                    }
                    .into())
                }
            }
        }
        Ok(manifest)
    }

    fn add_intra(&mut self, genome: &Genome, chrom: &str, path: &Path) -> Result<()> {
        genome.require_size(chrom)?;
        if self
            .intra
            .insert(chrom.to_string(), path.to_path_buf())
            .is_some()
        {
            return Err(WriteError::DuplicateManifestEntry(chrom.to_string()).into());
        }
        Ok(())
    }

    fn add_inter(&mut self, genome: &Genome, a: &str, b: &str, path: &Path) -> Result<()> {
        genome.require_size(a)?;
        genome.require_size(b)?;
        let (row, col) = canonical_orientation(genome, a, b);
        let source = PairSource {
            path: path.to_path_buf(),
            swapped: row != a,
        };
        let key = (row.to_string(), col.to_string());
        if self.inter.insert(key, source).is_some() {
            return Err(WriteError::DuplicateManifestEntry(format!("{row}\t{col}")).into());
        }
        Ok(())
    }

    /// Source path for one chromosome's intrachromosomal matrix.
    #[must_use]
    pub fn intra(&self, chrom: &str) -> Option<&Path> {
        self.intra.get(chrom).map(PathBuf::as_path)
    }

    /// Source for one canonical pair.
    #[must_use]
    pub fn inter(&self, row: &str, col: &str) -> Option<&PairSource> {
        self.inter.get(&(row.to_string(), col.to_string()))
    }

    /// Returns true if the manifest names any interchromosomal matrix.
    #[must_use]
    pub fn has_pairs(&self) -> bool {
        !self.inter.is_empty()
    }

    /// Number of matrices in the manifest.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intra.len() + self.inter.len()
    }

    /// Returns true if the manifest names no matrix at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intra.is_empty() && self.inter.is_empty()
    }

    /// Chromosomes with an intrachromosomal matrix, in canonical genome
    /// order. This is the intra directory layout.
    #[must_use]
    pub fn ordered_chromosomes<'a>(&self, genome: &'a Genome) -> Vec<&'a str> {
        genome
            .sorted_chromosomes()
            .iter()
            .map(String::as_str)
            .filter(|chrom| self.intra.contains_key(*chrom))
            .collect()
    }

    /// Canonical pairs present in the manifest, in deterministic iteration
    /// order: for every (i, j) with i > j over the sorted chromosomes, the
    /// pair (sorted[i], sorted[j]) with the outranked chromosome as row.
    #[must_use]
    pub fn ordered_pairs<'a>(&self, genome: &'a Genome) -> Vec<(&'a str, &'a str)> {
        let sorted = genome.sorted_chromosomes();
        let mut pairs = Vec::new();
        for i in 1..sorted.len() {
            for j in 0..i {
                let (row, col) = (sorted[i].as_str(), sorted[j].as_str());
                if self.inter.contains_key(&(row.to_string(), col.to_string())) {
                    pairs.push((row, col));
                }
            }
        }
        pairs
    }
}
