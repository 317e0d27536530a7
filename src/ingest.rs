//! Matrix ingestion: turning a source text file into a sparse store
//!
//! Two source shapes feed the same writer pipeline (a strategy keeps the
//! writer free of per-format duplication):
//!
//! - **Coordinate list**: lines of `i j v`, where `i` and `j` are base-pair
//!   coordinates and the column positions are configurable.
//! - **Dense tab-delimited**: a full matrix, with a configurable number of
//!   leading header rows and any number of leading label columns, both
//!   discarded.
//!
//! Both produce a sealed [`SparseMatrix`]. Cells equal to the most-common
//! value are omitted; `NaN` maps to 0.0, infinities clamp to plus or minus
//! 1.0e38, and non-numeric tokens demote to 0.0 with a warning.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::warn;

use crate::error::{Result, WriteError};
use crate::genome::bp_to_bin;
use crate::sparse::SparseMatrix;

/// Value substituted for positive infinity in source data.
pub const POS_INF_SUBSTITUTE: f32 = 1.0e38;
/// Value substituted for negative infinity in source data.
pub const NEG_INF_SUBSTITUTE: f32 = -1.0e38;

/// Zero-based column positions of the (i, j, value) fields in a
/// coordinate-list file.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateColumns {
    pub row: usize,
    pub col: usize,
    pub value: usize,
}

impl Default for CoordinateColumns {
    fn default() -> Self {
        Self {
            row: 0,
            col: 1,
            value: 2,
        }
    }
}

/// The shape of a source matrix file.
#[derive(Debug, Clone, Copy)]
pub enum SourceFormat {
    /// `i j v` triples with base-pair coordinates
    Coordinate(CoordinateColumns),
    /// Dense tab-delimited matrix with `skip_rows` leading header rows
    Dense { skip_rows: usize },
}

/// The matrix a source file is destined for.
#[derive(Debug, Clone, Copy)]
pub struct MatrixTarget<'a> {
    /// Canonical row chromosome name and bin count
    pub row: (&'a str, u32),
    /// Canonical column chromosome name and bin count
    pub col: (&'a str, u32),
    /// True for an intrachromosomal matrix
    pub symmetric: bool,
    /// True when the source file lists the pair in the non-canonical
    /// orientation, so its (i, j) coordinates are swapped on ingest
    pub swapped: bool,
}

impl<'a> MatrixTarget<'a> {
    /// Target for one chromosome's intrachromosomal matrix.
    #[must_use]
    pub fn intra(chrom: &'a str, bins: u32) -> Self {
        Self {
            row: (chrom, bins),
            col: (chrom, bins),
            symmetric: true,
            swapped: false,
        }
    }

    /// Target for a canonical pair; `swapped` reflects the source file's
    /// listed orientation.
    #[must_use]
    pub fn inter(row: (&'a str, u32), col: (&'a str, u32), swapped: bool) -> Self {
        Self {
            row,
            col,
            symmetric: false,
            swapped,
        }
    }

    fn store(&self) -> SparseMatrix {
        if self.symmetric {
            SparseMatrix::intra(self.row.0, self.row.1)
        } else {
            SparseMatrix::inter(self.row.0, self.row.1, self.col.0, self.col.1)
        }
    }
}

/// Loads one source file into a sealed sparse store.
pub fn load_matrix(
    path: &Path,
    format: SourceFormat,
    target: MatrixTarget<'_>,
    resolution: u32,
    mcv: f32,
) -> Result<SparseMatrix> {
    let reader = File::open(path).map(BufReader::new)?;
    let mut store = match format {
        SourceFormat::Coordinate(columns) => {
            read_coordinates(reader, path, columns, target, resolution, mcv)?
        }
        SourceFormat::Dense { skip_rows } => read_dense(reader, path, skip_rows, target, mcv)?,
    };
    store.seal()?;
    Ok(store)
}

fn read_coordinates<R: BufRead>(
    reader: R,
    path: &Path,
    columns: CoordinateColumns,
    target: MatrixTarget<'_>,
    resolution: u32,
    mcv: f32,
) -> Result<SparseMatrix> {
    let mut store = target.store();
    let last_needed = columns.row.max(columns.col).max(columns.value);
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= last_needed {
            return Err(WriteError::MissingColumn {
                path: path.display().to_string(),
                line: idx + 1,
                column: last_needed,
            }
            .into());
        }
        let parse_bp = |column: usize| -> Result<u64> {
            fields[column].parse().map_err(|_| {
                WriteError::MalformedCoordinate {
                    path: path.display().to_string(),
                    line: idx + 1,
                    token: fields[column].to_string(),
                }
                .into()
            })
        };
        let mut i = bp_to_bin(parse_bp(columns.row)?, resolution);
        let mut j = bp_to_bin(parse_bp(columns.col)?, resolution);
        if target.swapped {
            std::mem::swap(&mut i, &mut j);
        }
        let value = parse_value(fields[columns.value], path, idx + 1);
        if value != mcv {
            store.push(i, j, value)?;
        }
    }
    Ok(store)
}

fn read_dense<R: BufRead>(
    reader: R,
    path: &Path,
    skip_rows: usize,
    target: MatrixTarget<'_>,
    mcv: f32,
) -> Result<SparseMatrix> {
    let mut store = target.store();
    // the source file is laid out in its listed orientation, which may be
    // the transpose of the canonical one
    let (file_rows, file_cols) = if target.swapped {
        (target.col.1 as usize, target.row.1 as usize)
    } else {
        (target.row.1 as usize, target.col.1 as usize)
    };

    let mut data_rows = 0usize;
    let mut warned_cols = false;
    let mut warned_rows = false;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if idx < skip_rows {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        if data_rows >= file_rows {
            if !warned_rows {
                warn!(
                    "{}: dense matrix has more than {file_rows} data rows, ignoring the excess",
                    path.display()
                );
                warned_rows = true;
            }
            data_rows += 1;
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < file_cols {
            return Err(WriteError::TooFewColumns {
                row: data_rows,
                got: fields.len(),
                expected: file_cols,
            }
            .into());
        }
        let label_cols = fields.len() - file_cols;
        if label_cols > 0 && !warned_cols {
            warn!(
                "{}: discarding {label_cols} leading column(s) in each dense matrix row",
                path.display()
            );
            warned_cols = true;
        }

        let r = data_rows as u32;
        for (c, token) in fields[label_cols..].iter().enumerate() {
            let c = c as u32;
            if target.symmetric && c < r {
                // only the upper triangle is kept for symmetric input
                continue;
            }
            let value = parse_value(token, path, idx + 1);
            if value == mcv {
                continue;
            }
            if target.swapped {
                store.push(c, r, value)?;
            } else {
                store.push(r, c, value)?;
            }
        }
        data_rows += 1;
    }
    let seen = data_rows.min(file_rows);
    if seen < file_rows {
        return Err(WriteError::TooFewRows {
            got: seen,
            expected: file_rows,
        }
        .into());
    }
    Ok(store)
}

/// Parses a cell value with the documented substitutions.
pub(crate) fn parse_value(token: &str, path: &Path, line: usize) -> f32 {
    match token.trim().parse::<f32>() {
        Ok(v) if v.is_nan() => 0.0,
        Ok(v) if v == f32::INFINITY => POS_INF_SUBSTITUTE,
        Ok(v) if v == f32::NEG_INFINITY => NEG_INF_SUBSTITUTE,
        Ok(v) => v,
        Err(_) => {
            warn!("{}:{line}: non-numeric value {token:?} treated as 0.0", path.display());
            0.0
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;
    use std::io::Cursor;

    fn intra_target(bins: u32) -> MatrixTarget<'static> {
        MatrixTarget::intra("chr1", bins)
    }

    #[test]
    fn test_coordinate_intra_swaps() -> Result<()> {
        let input = "100\t0\t7.5\n";
        let store = read_coordinates(
            Cursor::new(input),
            Path::new("t"),
            CoordinateColumns::default(),
            intra_target(3),
            50,
            0.0,
        )?;
        let (row, cells) = store.iter_rows().next().unwrap();
        assert_eq!(row, 0);
        assert_eq!(cells[0].col, 2);
        assert_eq!(cells[0].value, 7.5);
        Ok(())
    }

    #[test]
    fn test_coordinate_custom_columns() -> Result<()> {
        // value first, then j, then i
        let columns = CoordinateColumns {
            row: 2,
            col: 1,
            value: 0,
        };
        let input = "3.5 50 0\n";
        let store = read_coordinates(
            Cursor::new(input),
            Path::new("t"),
            columns,
            intra_target(3),
            50,
            0.0,
        )?;
        let (row, cells) = store.iter_rows().next().unwrap();
        assert_eq!((row, cells[0].col, cells[0].value), (0, 1, 3.5));
        Ok(())
    }

    #[test]
    fn test_coordinate_missing_column() {
        let result = read_coordinates(
            Cursor::new("0 50\n"),
            Path::new("t"),
            CoordinateColumns::default(),
            intra_target(3),
            50,
            0.0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_dense_upper_triangle_and_labels() -> Result<()> {
        // one header row, one label column per data row
        let input = "bins\tb0\tb1\tb2\nr0\t1.0\t2.0\t0.0\nr1\t9.0\t3.0\t0.0\nr2\t0.0\t0.0\t0.0\n";
        let store = read_dense(
            Cursor::new(input),
            Path::new("t"),
            1,
            intra_target(3),
            0.0,
        )?;
        let cells: Vec<_> = store
            .iter_rows()
            .flat_map(|(row, cells)| cells.iter().map(move |c| (row, c.col, c.value)))
            .collect();
        // the 9.0 at (1, 0) is below the diagonal and is dropped
        assert_eq!(cells, [(0, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0)]);
        Ok(())
    }

    #[test]
    fn test_dense_too_few_columns() {
        let input = "1.0\t2.0\n1.0\t2.0\n1.0\t2.0\n";
        let result = read_dense(
            Cursor::new(input),
            Path::new("t"),
            0,
            intra_target(3),
            0.0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_dense_too_few_rows() {
        let input = "1.0\t2.0\t3.0\n";
        let result = read_dense(
            Cursor::new(input),
            Path::new("t"),
            0,
            intra_target(3),
            0.0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_dense_substitutions() -> Result<()> {
        let input = "NaN\tinf\n-inf\tbogus\n";
        let target = MatrixTarget::inter(("chrA", 2), ("chrB", 2), false);
        let store = read_dense(Cursor::new(input), Path::new("t"), 0, target, 0.0)?;
        let cells: Vec<_> = store
            .iter_rows()
            .flat_map(|(row, cells)| cells.iter().map(move |c| (row, c.col, c.value)))
            .collect();
        // NaN and the non-numeric token both become the MCV and are omitted
        assert_eq!(
            cells,
            [
                (0, 1, POS_INF_SUBSTITUTE),
                (1, 0, NEG_INF_SUBSTITUTE),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_dense_swapped_transposes() -> Result<()> {
        // canonical target is 2 rows x 3 cols; the file lists the pair the
        // other way round, so it is 3 rows x 2 cols
        let input = "0.0\t5.0\n0.0\t0.0\n6.0\t0.0\n";
        let target = MatrixTarget::inter(("chrR", 2), ("chrC", 3), true);
        let mut store = read_dense(Cursor::new(input), Path::new("t"), 0, target, 0.0)?;
        store.seal()?;
        let cells: Vec<_> = store
            .iter_rows()
            .flat_map(|(row, cells)| cells.iter().map(move |c| (row, c.col, c.value)))
            .collect();
        assert_eq!(cells, [(0, 2, 6.0), (1, 0, 5.0)]);
        Ok(())
    }

    #[test]
    fn test_coordinate_swapped() -> Result<()> {
        let target = MatrixTarget::inter(("chrR", 4), ("chrC", 8), true);
        // the file lists (colChrom, rowChrom) coordinates
        let store = read_coordinates(
            Cursor::new("300\t100\t2.0\n"),
            Path::new("t"),
            CoordinateColumns::default(),
            target,
            50,
            0.0,
        )?;
        let (row, cells) = store.iter_rows().next().unwrap();
        assert_eq!((row, cells[0].col), (2, 6));
        Ok(())
    }

    #[test]
    fn test_mcv_cells_omitted() -> Result<()> {
        let store = read_coordinates(
            Cursor::new("0\t0\t0.0\n0\t50\t1.0\n"),
            Path::new("t"),
            CoordinateColumns::default(),
            intra_target(3),
            50,
            0.0,
        )?;
        assert_eq!(store.len(), 1);
        Ok(())
    }
}
