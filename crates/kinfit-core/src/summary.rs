use crate::params::{ParamVector, Permutation, Population};
use kinfit_error::{FitResult, ResultExt, fit_bail, fit_err};
use std::fmt::Write as _;
use std::path::Path;

/// One row of a generation summary: a permutation id, its chi value and the
/// parameter vector behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub perm: usize,
    pub score: f64,
    pub values: Vec<f64>,
}

/// A ranked generation summary, the persisted artifact the genetic operator
/// breeds from. Rows are kept sorted ascending by score, stable across ties.
///
/// The on-disk format is one header line `Permutation Chi-Sq <names…>`
/// followed by whitespace-separated rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub names: Vec<String>,
    pub rows: Vec<SummaryRow>,
}

impl Summary {
    pub fn new(names: Vec<String>) -> Self {
        Summary {
            names,
            rows: Vec::new(),
        }
    }

    /// Build from a scored population, sorting ascending by score.
    pub fn from_population(names: Vec<String>, population: &mut Population) -> Summary {
        population.sort_by_score();
        Summary {
            names,
            rows: population
                .iter()
                .map(|perm| SummaryRow {
                    perm: perm.id,
                    score: perm.score,
                    values: perm.vector.values.clone(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn best(&self) -> Option<&SummaryRow> {
        self.rows.first()
    }

    pub fn sort(&mut self) {
        self.rows.sort_by(|a, b| a.score.total_cmp(&b.score));
    }

    /// The parent summary carried into the next generation: the union of this
    /// summary with the previous parent summary, ranked, truncated to `p`.
    pub fn merge_parents(&self, previous: Option<&Summary>, p: usize) -> Summary {
        let mut merged = self.clone();
        if let Some(prev) = previous {
            merged.rows.extend(prev.rows.iter().cloned());
        }
        merged.sort();
        merged.rows.truncate(p);
        merged
    }

    pub fn to_population(&self) -> Population {
        Population::new(
            self.rows
                .iter()
                .map(|row| {
                    let mut perm = Permutation::new(row.perm, ParamVector::new(row.values.clone()));
                    perm.score = row.score;
                    perm
                })
                .collect(),
        )
    }

    fn emit(&self, id_label: &str) -> String {
        let mut out = String::new();
        let _ = write!(out, "{} Chi-Sq", id_label);
        for name in &self.names {
            let _ = write!(out, " {}", name);
        }
        out.push('\n');
        for row in &self.rows {
            let _ = write!(out, "{} {}", row.perm, row.score);
            for value in &row.values {
                let _ = write!(out, " {}", value);
            }
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> FitResult<()> {
        std::fs::write(path, self.emit("Permutation"))
            .with_context(|| format!("writing summary {}", path.display()))
    }

    /// Bootstrap results table: same row shape, `Run` id column.
    pub fn write_runs(&self, path: &Path) -> FitResult<()> {
        std::fs::write(path, self.emit("Run"))
            .with_context(|| format!("writing bootstrap table {}", path.display()))
    }

    pub fn read(path: &Path) -> FitResult<Summary> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| fit_err!(Tabular: "cannot read summary {}: {}", path.display(), e))?;

        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| fit_err!(Tabular: "{}: empty summary", path.display()))?;
        let mut fields = header.split_whitespace();
        let id_label = fields.next().unwrap_or_default();
        let chi_label = fields.next().unwrap_or_default();
        if (id_label != "Permutation" && id_label != "Run") || chi_label != "Chi-Sq" {
            fit_bail!(Tabular: "{}: not a summary file", path.display());
        }
        let names = fields.map(str::to_string).collect::<Vec<_>>();

        let mut rows = Vec::new();
        for line in lines {
            let mut tokens = line.split_whitespace();
            let perm = tokens
                .next()
                .and_then(|t| t.parse::<usize>().ok())
                .ok_or_else(|| fit_err!(Tabular: "{}: bad permutation id", path.display()))?;
            let score = tokens
                .next()
                .and_then(|t| t.parse::<f64>().ok())
                .ok_or_else(|| fit_err!(Tabular: "{}: bad chi value", path.display()))?;
            let values = tokens
                .map(|t| t.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| fit_err!(Tabular: "{}: bad parameter value", path.display()))?;
            if values.len() != names.len() {
                fit_bail!(
                    Tabular: "{}: row width {} does not match {} names",
                    path.display(),
                    values.len(),
                    names.len()
                );
            }
            rows.push(SummaryRow {
                perm,
                score,
                values,
            });
        }

        Ok(Summary { names, rows })
    }
}

/// Per-reference-file score breakdown (`perm_model_diff`): one row per
/// permutation, one chi column per reference file.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBreakdown {
    pub ref_names: Vec<String>,
    /// (permutation id, per-reference chi values)
    pub rows: Vec<(usize, Vec<f64>)>,
}

impl ModelBreakdown {
    pub fn new(ref_names: Vec<String>) -> Self {
        ModelBreakdown {
            ref_names,
            rows: Vec::new(),
        }
    }

    pub fn write(&self, path: &Path) -> FitResult<()> {
        let mut out = String::from("Permutation");
        for name in &self.ref_names {
            let _ = write!(out, " {}", name);
        }
        out.push('\n');
        for (perm, values) in &self.rows {
            let _ = write!(out, "{}", perm);
            for value in values {
                let _ = write!(out, " {}", value);
            }
            out.push('\n');
        }
        std::fs::write(path, out)
            .with_context(|| format!("writing breakdown {}", path.display()))
    }
}
