use kinfit_error::{FitResult, fit_bail, fit_err};
use std::fmt::Write as _;
use std::path::Path;

/// Suffix marking a standard-deviation companion column in reference data.
pub const SD_SUFFIX: &str = "_SD";

/// A whitespace-separated table of floats, the exchange format shared by
/// experimental reference files (`.exp`), simulator outputs (`.gdat`) and
/// bootstrap weight files. The header line starts with `#` followed by the
/// column names; data rows hold one float (or the literal `NaN`) per column.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> FitResult<Table> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| fit_err!(Tabular: "empty table"))?;
        let header = header.trim();
        if !header.starts_with('#') {
            fit_bail!(Tabular: "header line must start with '#', found: {:?}", header);
        }

        let columns = header
            .trim_start_matches('#')
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if columns.is_empty() {
            fit_bail!(Tabular: "header declares no columns");
        }

        let mut rows = Vec::new();
        for (lineno, line) in lines.enumerate() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }

            let mut row = Vec::with_capacity(columns.len());
            for token in line.split_whitespace() {
                let value = token.parse::<f64>().map_err(
                    |_| fit_err!(Tabular: "row {}: unparsable value {:?}", lineno + 2, token),
                )?;
                row.push(value);
            }

            if row.len() != columns.len() {
                fit_bail!(
                    Tabular: "row {}: expected {} values, found {}",
                    lineno + 2,
                    columns.len(),
                    row.len()
                );
            }

            rows.push(row);
        }

        Ok(Table { columns, rows })
    }

    pub fn read(path: &Path) -> FitResult<Table> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| fit_err!(Tabular: "cannot read {}: {}", path.display(), e))?;
        Table::parse(&text)
    }

    /// Render back into the on-disk format. Values print with Rust's shortest
    /// round-trip float formatting so parse(emit(t)) == t.
    pub fn emit(&self) -> String {
        let mut out = String::new();
        out.push('#');
        for name in &self.columns {
            let _ = write!(out, " {}", name);
        }
        out.push('\n');
        for row in &self.rows {
            let mut first = true;
            for value in row {
                if !first {
                    out.push(' ');
                }
                let _ = write!(out, "{}", value);
                first = false;
            }
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> FitResult<()> {
        std::fs::write(path, self.emit())
            .map_err(|e| fit_err!(Tabular: "cannot write {}: {}", path.display(), e))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index of the control column, the independent variable used to align
    /// simulation rows with reference rows.
    pub fn control_index(&self, control: &str) -> FitResult<usize> {
        self.column_index(control)
            .ok_or_else(|| fit_err!(Tabular: "control column {:?} not present", control))
    }

    /// Indices of the observable columns: everything that is neither the
    /// control column nor a standard-deviation companion.
    pub fn observable_indices(&self, control: &str) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, name)| name.as_str() != control && !name.ends_with(SD_SUFFIX))
            .map(|(i, _)| i)
            .collect()
    }

    /// Index of the `_SD` companion of the given column, if the table has one.
    pub fn sd_index(&self, name: &str) -> Option<usize> {
        self.column_index(&format!("{}{}", name, SD_SUFFIX))
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.rows[row][col]
    }
}
