use crate::config::{FitConfig, ObjectiveKind};
use crate::tabular::{SD_SUFFIX, Table};
use crate::weights::WeightMap;
use kinfit_error::{FitResult, fit_bail};
use std::fmt::{self, Display, Formatter};

/// Tolerance used when matching a simulation control value to a reference
/// control value.
pub const EPSILON: f64 = 1e-6;

/// Stand-in for a zero denominator introduced by preprocessing.
const ZERO_FLOOR: f64 = 1e-6;

/// Why one permutation could not be scored. These are not fatal: the
/// permutation is assigned the sentinel score and recorded as skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreFailure {
    MissingColumn(String),
    /// Simulation ends before the last reference control value.
    ShortSimulation { sim_end: f64, ref_end: f64 },
    /// No simulation row matches this reference control value.
    Alignment(f64),
    /// A forbidden divide-by-zero for the selected objective.
    DivideByZero { column: String, row: usize },
}

impl Display for ScoreFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingColumn(name) => write!(f, "simulation lacks column {:?}", name),
            Self::ShortSimulation { sim_end, ref_end } => write!(
                f,
                "simulation ends at {} before reference end {}",
                sim_end, ref_end
            ),
            Self::Alignment(t) => write!(f, "no simulation row aligns with control value {}", t),
            Self::DivideByZero { column, row } => {
                write!(f, "zero denominator in column {:?} at row {}", column, row)
            }
        }
    }
}

/// Column transformations applied before residuals are computed. Multiple
/// flags may be enabled at once; they always apply in the order
/// divide-by-init, log-transform (simulation only), standardize-simulation,
/// standardize-reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct Preprocess {
    pub divide_by_init: bool,
    pub log_base: Option<f64>,
    pub standardize_sim: bool,
    pub standardize_exp: bool,
}

impl Preprocess {
    pub fn from_config(config: &FitConfig) -> Self {
        Preprocess {
            divide_by_init: config.divide_by_init,
            log_base: config.log_transform_sim_data,
            standardize_sim: config.standardize_sim_data,
            standardize_exp: config.standardize_exp_data,
        }
    }

    pub fn apply_sim(&self, table: &mut Table, control: &str) {
        for col in table.observable_indices(control) {
            if self.divide_by_init {
                divide_by_init(table, col);
            }
            if let Some(base) = self.log_base {
                let ln_base = base.ln();
                for row in table.rows.iter_mut() {
                    let v = if row[col] == 0.0 { ZERO_FLOOR } else { row[col] };
                    row[col] = v.ln() / ln_base;
                }
            }
            if self.standardize_sim {
                standardize(table, col);
            }
        }
    }

    pub fn apply_exp(&self, table: &mut Table, control: &str) {
        for col in table.observable_indices(control) {
            if self.divide_by_init {
                divide_by_init(table, col);
            }
            if self.standardize_exp {
                standardize(table, col);
            }
        }
    }
}

fn divide_by_init(table: &mut Table, col: usize) {
    if table.rows.is_empty() {
        return;
    }
    let mut init = table.rows[0][col];
    if init == 0.0 {
        init = ZERO_FLOOR;
    }
    for row in table.rows.iter_mut() {
        row[col] /= init;
    }
    table.rows[0][col] = 1.0;
}

/// Subtract the column mean and divide by the sample standard deviation
/// (denominator N − 1), skipping NaN rows. A zero mean skips the column.
fn standardize(table: &mut Table, col: usize) {
    let values = table
        .rows
        .iter()
        .map(|row| row[col])
        .filter(|v| !v.is_nan())
        .collect::<Vec<_>>();
    if values.len() < 2 {
        return;
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean == 0.0 {
        return;
    }

    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    let sd = var.sqrt();
    if sd == 0.0 || !sd.is_finite() {
        return;
    }

    for row in table.rows.iter_mut() {
        if !row[col].is_nan() {
            row[col] = (row[col] - mean) / sd;
        }
    }
}

/// A preprocessed reference table plus the per-column means needed by the
/// column-mean objective.
#[derive(Debug, Clone)]
pub struct PreppedRef {
    pub table: Table,
    pub control_index: usize,
    /// Mean over non-NaN reference values per column index, computed after
    /// preprocessing.
    col_means: Vec<f64>,
}

/// Score of one permutation: the reported chi value is the square root of the
/// summed residuals, with a per-reference-file breakdown alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct PermScore {
    pub total: f64,
    pub per_ref: Vec<f64>,
}

/// Computes the objective-function value of a permutation's simulation
/// outputs against the reference datasets.
#[derive(Debug, Clone)]
pub struct Scorer {
    pub kind: ObjectiveKind,
    pub preprocess: Preprocess,
    pub control: String,
}

impl Scorer {
    pub fn from_config(config: &FitConfig) -> Self {
        Scorer {
            kind: config.objfunc,
            preprocess: Preprocess::from_config(config),
            control: config.control_column().to_string(),
        }
    }

    /// Preprocess a reference table once per generation. Fails (fatally) when
    /// the control column is absent, since no permutation could ever align.
    pub fn prep_reference(&self, mut table: Table) -> FitResult<PreppedRef> {
        let control_index = table.control_index(&self.control)?;
        if table.is_empty() {
            fit_bail!(Scoring: "reference table has no rows");
        }
        self.preprocess.apply_exp(&mut table, &self.control);

        let col_means = (0..table.columns.len())
            .map(|col| {
                let values = table
                    .rows
                    .iter()
                    .map(|row| row[col])
                    .filter(|v| !v.is_nan())
                    .collect::<Vec<_>>();
                if values.is_empty() {
                    f64::NAN
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            })
            .collect();

        Ok(PreppedRef {
            table,
            control_index,
            col_means,
        })
    }

    /// Score one permutation. `sims` pairs index-for-index with `refs`;
    /// `file_index` in the weight map follows the same order.
    pub fn score_permutation(
        &self,
        refs: &[PreppedRef],
        sims: Vec<Table>,
        weights: Option<&WeightMap>,
    ) -> Result<PermScore, ScoreFailure> {
        let mut total = 0.0;
        let mut per_ref = Vec::with_capacity(refs.len());

        for (file_index, (pref, mut sim)) in refs.iter().zip(sims.into_iter()).enumerate() {
            self.preprocess.apply_sim(&mut sim, &self.control);
            let file_sum = self.score_file(file_index, pref, &sim, weights)?;
            per_ref.push(file_sum.sqrt());
            total += file_sum;
        }

        Ok(PermScore {
            total: total.sqrt(),
            per_ref,
        })
    }

    fn score_file(
        &self,
        file_index: usize,
        pref: &PreppedRef,
        sim: &Table,
        weights: Option<&WeightMap>,
    ) -> Result<f64, ScoreFailure> {
        let ref_table = &pref.table;
        let sim_control = sim
            .column_index(&self.control)
            .ok_or_else(|| ScoreFailure::MissingColumn(self.control.clone()))?;

        // Pair every reference observable with its simulation column up front.
        let mut columns = Vec::new();
        for col in ref_table.observable_indices(&self.control) {
            let name = &ref_table.columns[col];
            let sim_col = sim
                .column_index(name)
                .ok_or_else(|| ScoreFailure::MissingColumn(name.clone()))?;
            let sd_col = ref_table.sd_index(name);
            columns.push((col, sim_col, sd_col, name.clone()));
        }

        if sim.is_empty() {
            return Err(ScoreFailure::ShortSimulation {
                sim_end: f64::NAN,
                ref_end: ref_table.rows[ref_table.len() - 1][pref.control_index],
            });
        }

        let sim_end = sim.rows[sim.len() - 1][sim_control];
        let ref_end = ref_table.rows[ref_table.len() - 1][pref.control_index];
        if sim_end < ref_end - EPSILON {
            return Err(ScoreFailure::ShortSimulation { sim_end, ref_end });
        }

        let mut sum = 0.0;
        let mut cursor = 0usize;
        for (row_index, ref_row) in ref_table.rows.iter().enumerate() {
            let t = ref_row[pref.control_index];

            // Advance forward through the simulation, never backward.
            while cursor < sim.len() && sim.rows[cursor][sim_control] < t - EPSILON {
                cursor += 1;
            }
            if cursor >= sim.len() || (sim.rows[cursor][sim_control] - t).abs() > EPSILON {
                return Err(ScoreFailure::Alignment(t));
            }

            let sim_row = &sim.rows[cursor];
            for (ref_col, sim_col, sd_col, name) in &columns {
                let e = ref_row[*ref_col];
                if e.is_nan() {
                    continue;
                }
                let s = sim_row[*sim_col];
                let d = e - s;

                let mut residual = match self.kind {
                    ObjectiveKind::Absolute => d * d,
                    ObjectiveKind::Sd => {
                        let sd_col = (*sd_col).ok_or_else(|| {
                            ScoreFailure::MissingColumn(format!("{}{}", name, SD_SUFFIX))
                        })?;
                        let sigma = ref_row[sd_col];
                        if !sigma.is_finite() || sigma == 0.0 {
                            return Err(ScoreFailure::DivideByZero {
                                column: name.clone(),
                                row: row_index,
                            });
                        }
                        (d / sigma).powi(2)
                    }
                    ObjectiveKind::Relative => {
                        if e == 0.0 {
                            return Err(ScoreFailure::DivideByZero {
                                column: name.clone(),
                                row: row_index,
                            });
                        }
                        (d / e).powi(2)
                    }
                    ObjectiveKind::ColumnMean => {
                        let mean = pref.col_means[*ref_col];
                        if mean == 0.0 || !mean.is_finite() {
                            return Err(ScoreFailure::DivideByZero {
                                column: name.clone(),
                                row: row_index,
                            });
                        }
                        (d / mean).powi(2)
                    }
                };

                if let Some(map) = weights {
                    residual *= map.weight(file_index, row_index, name) as f64;
                }

                sum += residual;
            }
        }

        Ok(sum)
    }
}
