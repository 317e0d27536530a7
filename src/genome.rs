//! Genome model: chromosome sizes and the canonical ordering relation
//!
//! The genome table owns the name to size mapping read from a two-column
//! sizes file. It also defines the priority order used everywhere else in
//! the crate: bigger chromosomes first, ties broken by ascending name. The
//! ordering decides both the directory layout of a BUTLR file and which
//! chromosome of an interchromosomal pair becomes the stored row.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Result, WriteError};

/// Chromosome sizes for one assembly, ordered by canonical priority.
#[derive(Debug, Clone, Default)]
pub struct Genome {
    /// Names in canonical order (descending size, ascending name)
    names: Vec<String>,
    /// Name to size in base pairs
    sizes: HashMap<String, u32>,
}

impl Genome {
    /// Loads a genome from a whitespace-delimited two-column sizes file.
    ///
    /// Each non-empty line holds a chromosome name and its size in base
    /// pairs. Lines that do not parse are fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = File::open(path).map(BufReader::new)?;
        let mut genome = Self::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let entry = fields
                .next()
                .zip(fields.next())
                .and_then(|(name, size)| size.parse::<u32>().ok().map(|s| (name, s)));
            let Some((name, size)) = entry else {
                return Err(WriteError::MalformedGenomeEntry {
                    line: idx + 1,
                    content: line.clone(),
                }
                .into());
            };
            genome.insert(name, size);
        }
        genome.sort();
        Ok(genome)
    }

    /// Builds a genome from in-memory (name, size) pairs.
    #[must_use]
    pub fn from_sizes<S: Into<String>>(entries: impl IntoIterator<Item = (S, u32)>) -> Self {
        let mut genome = Self::default();
        for (name, size) in entries {
            let name = name.into();
            genome.insert(&name, size);
        }
        genome.sort();
        genome
    }

    fn insert(&mut self, name: &str, size: u32) {
        if self.sizes.insert(name.to_string(), size).is_none() {
            self.names.push(name.to_string());
        }
    }

    fn sort(&mut self) {
        let sizes = &self.sizes;
        self.names
            .sort_by(|a, b| sizes[b].cmp(&sizes[a]).then_with(|| a.cmp(b)));
    }

    /// Size of a chromosome in base pairs, if present.
    #[must_use]
    pub fn size(&self, name: &str) -> Option<u32> {
        self.sizes.get(name).copied()
    }

    /// Size lookup that treats an unknown chromosome as a write error.
    pub fn require_size(&self, name: &str) -> Result<u32> {
        self.size(name)
            .ok_or_else(|| WriteError::UnknownChromosome(name.to_string()).into())
    }

    /// Chromosome names in canonical order: descending size, then
    /// ascending name. The order is stable across calls.
    #[must_use]
    pub fn sorted_chromosomes(&self) -> &[String] {
        &self.names
    }

    /// Returns true iff `a` outranks `b`: larger size, or equal size and
    /// lexicographically smaller name. The outranked chromosome of a pair
    /// becomes the stored row.
    ///
    /// # Panics
    ///
    /// Panics if either name is not in the table.
    #[must_use]
    pub fn is_ahead(&self, a: &str, b: &str) -> bool {
        let (sa, sb) = (self.sizes[a], self.sizes[b]);
        sa > sb || (sa == sb && a < b)
    }

    /// Number of bins covering a chromosome at the given resolution.
    pub fn bin_count(&self, name: &str, resolution: u32) -> Result<u32> {
        let size = self.require_size(name)?;
        Ok(size / resolution + 1)
    }

    /// Number of chromosomes in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Maps a base-pair coordinate to its bin index at the given resolution.
#[must_use]
pub fn bp_to_bin(position: u64, resolution: u32) -> u32 {
    (position / u64::from(resolution)) as u32
}
