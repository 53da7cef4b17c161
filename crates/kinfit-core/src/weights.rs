use crate::domain::random_provider;
use crate::tabular::Table;
use kinfit_error::{FitResult, ResultExt, fit_bail};
use std::fmt::Write as _;
use std::path::Path;

/// Bootstrap weights for one reference file: an integer per (row, observable
/// column), produced by multinomial resampling of the row indices with
/// replacement. Weights in a column always sum to the row count.
#[derive(Debug, Clone, PartialEq)]
pub struct FileWeights {
    pub columns: Vec<String>,
    /// `rows[r][c]` weights row `r` of observable column `columns[c]`.
    pub rows: Vec<Vec<u32>>,
}

impl FileWeights {
    /// Resample each observable column independently: draw `n` row indices
    /// uniformly with replacement and count the hits per row.
    pub fn resample(reference: &Table, control: &str) -> FileWeights {
        let observables = reference.observable_indices(control);
        let columns = observables
            .iter()
            .map(|&i| reference.columns[i].clone())
            .collect::<Vec<_>>();

        let n = reference.len();
        let mut rows = vec![vec![0u32; columns.len()]; n];
        for col in 0..columns.len() {
            for _ in 0..n {
                let hit = random_provider::range(0..n);
                rows[hit][col] += 1;
            }
        }

        FileWeights { columns, rows }
    }
}

/// Per-reference-file bootstrap weights for one bootstrap iteration. File
/// order follows the configuration's reference-file order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeightMap {
    pub files: Vec<FileWeights>,
}

impl WeightMap {
    /// Draw a fresh map from the (unpreprocessed) reference tables.
    pub fn resample(references: &[Table], control: &str) -> WeightMap {
        WeightMap {
            files: references
                .iter()
                .map(|table| FileWeights::resample(table, control))
                .collect(),
        }
    }

    /// Weight for a reference point; columns absent from the map (and rows
    /// beyond it) weigh 1 so a missing file degrades to an unweighted fit.
    pub fn weight(&self, file_index: usize, row: usize, column: &str) -> u32 {
        self.files
            .get(file_index)
            .and_then(|file| {
                let col = file.columns.iter().position(|c| c == column)?;
                file.rows.get(row).map(|r| r[col])
            })
            .unwrap_or(1)
    }

    /// One weight file per reference file: `<stem>_weights.txt` beside the
    /// job's generation directories.
    pub fn write(&self, dir: &Path, stems: &[String]) -> FitResult<()> {
        for (file, stem) in self.files.iter().zip(stems.iter()) {
            let mut out = String::new();
            out.push('#');
            for name in &file.columns {
                let _ = write!(out, " {}", name);
            }
            out.push('\n');
            for row in &file.rows {
                let mut first = true;
                for w in row {
                    if !first {
                        out.push(' ');
                    }
                    let _ = write!(out, "{}", w);
                    first = false;
                }
                out.push('\n');
            }

            let path = dir.join(format!("{}_weights.txt", stem));
            std::fs::write(&path, out)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(())
    }

    pub fn read(dir: &Path, stems: &[String]) -> FitResult<WeightMap> {
        let mut files = Vec::with_capacity(stems.len());
        for stem in stems {
            let path = dir.join(format!("{}_weights.txt", stem));
            let table = Table::read(&path)?;
            let mut rows = Vec::with_capacity(table.len());
            for row in &table.rows {
                let mut weights = Vec::with_capacity(row.len());
                for value in row {
                    if *value < 0.0 || value.fract() != 0.0 {
                        fit_bail!(Tabular: "{}: weight {} is not a count", path.display(), value);
                    }
                    weights.push(*value as u32);
                }
                rows.push(weights);
            }
            files.push(FileWeights {
                columns: table.columns,
                rows,
            });
        }
        Ok(WeightMap { files })
    }
}
