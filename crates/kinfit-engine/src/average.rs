use crate::task::SimTask;
use kinfit_error::{FitResult, fit_bail};
use kinfit_core::Table;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Subdirectory a replicate's simulations run in when `smoothing > 1`.
pub fn replicate_dir(gen_dir: &Path, replicate: usize) -> PathBuf {
    gen_dir.join(format!("rep{}", replicate))
}

/// Output file the simulator writes for (model stem, permutation, reference
/// stem) inside its task's outdir.
pub fn output_name(stem: &str, perm: usize, exp_stem: &str) -> String {
    format!("{}_perm{}_{}.gdat", stem, perm, exp_stem)
}

/// Replicate-annotated name an output is renamed to when it is pulled out of
/// its replicate subdirectory.
fn replicate_output_name(stem: &str, perm: usize, replicate: usize, exp_stem: &str) -> String {
    format!("{}_perm{}_rep{}_{}.gdat", stem, perm, replicate, exp_stem)
}

/// Averages replicate outputs per permutation into a single tabular output
/// per (permutation, reference file). A permutation fails only when every
/// one of its replicates failed. Running the averager twice over the same
/// replicate set writes identical output.
pub struct ReplicateAverager<'a> {
    pub gen_dir: &'a Path,
    pub stem: &'a str,
    pub exp_stems: &'a [String],
    pub smoothing: usize,
    pub control: &'a str,
}

impl<'a> ReplicateAverager<'a> {
    /// Collapse replicates for `perm_count` permutations. Returns the ids of
    /// permutations with no surviving replicate.
    pub fn average(&self, perm_count: usize) -> FitResult<Vec<usize>> {
        let mut failed = Vec::new();

        for perm in 0..perm_count {
            let survivors = self.surviving_replicates(perm);
            if survivors.is_empty() {
                failed.push(perm);
                continue;
            }

            if self.smoothing > 1 {
                self.collect_replicate_outputs(perm)?;
                for exp_stem in self.exp_stems {
                    self.average_one(perm, exp_stem, &survivors)?;
                }
            }
        }

        Ok(failed)
    }

    /// Replicates whose task finished and whose outputs all exist.
    fn surviving_replicates(&self, perm: usize) -> BTreeSet<usize> {
        (1..=self.smoothing)
            .filter(|&rep| {
                let name = SimTask::task_name(self.stem, perm, rep);
                if !self.gen_dir.join(format!("{}.finished", name)).is_file() {
                    return false;
                }
                self.exp_stems.iter().all(|exp_stem| {
                    if self.smoothing == 1 {
                        // Lone replicates write straight into the generation dir.
                        self.gen_dir
                            .join(output_name(self.stem, perm, exp_stem))
                            .is_file()
                    } else {
                        self.moved_output(perm, rep, exp_stem).is_file()
                            || replicate_dir(self.gen_dir, rep)
                                .join(output_name(self.stem, perm, exp_stem))
                                .is_file()
                    }
                })
            })
            .collect()
    }

    fn moved_output(&self, perm: usize, replicate: usize, exp_stem: &str) -> PathBuf {
        self.gen_dir
            .join(replicate_output_name(self.stem, perm, replicate, exp_stem))
    }

    /// Rename outputs out of their replicate subdirectories so the file name
    /// carries both indices. Already-moved outputs are left alone, which is
    /// what makes a second averaging pass a no-op.
    fn collect_replicate_outputs(&self, perm: usize) -> FitResult<()> {
        for rep in 1..=self.smoothing {
            for exp_stem in self.exp_stems {
                let source =
                    replicate_dir(self.gen_dir, rep).join(output_name(self.stem, perm, exp_stem));
                let target = self.moved_output(perm, rep, exp_stem);
                if source.is_file() && !target.is_file() {
                    debug!("collecting {} -> {}", source.display(), target.display());
                    std::fs::rename(&source, &target)?;
                }
            }
        }
        Ok(())
    }

    /// Arithmetic mean across replicates for every non-control cell.
    fn average_one(
        &self,
        perm: usize,
        exp_stem: &str,
        survivors: &BTreeSet<usize>,
    ) -> FitResult<()> {
        let mut tables = Vec::with_capacity(survivors.len());
        for &rep in survivors {
            tables.push(Table::read(&self.moved_output(perm, rep, exp_stem))?);
        }

        let first = &tables[0];
        for table in &tables[1..] {
            if table.columns != first.columns || table.len() != first.len() {
                fit_bail!(
                    Simulation: "replicate outputs of permutation {} disagree in shape",
                    perm
                );
            }
        }

        let control = first.column_index(self.control);
        let mut averaged = Table::new(first.columns.clone());
        for row in 0..first.len() {
            let mut out_row = Vec::with_capacity(first.columns.len());
            for col in 0..first.columns.len() {
                if Some(col) == control {
                    out_row.push(first.value(row, col));
                } else {
                    let sum: f64 = tables.iter().map(|t| t.value(row, col)).sum();
                    out_row.push(sum / tables.len() as f64);
                }
            }
            averaged.rows.push(out_row);
        }

        averaged.write(&self.gen_dir.join(output_name(self.stem, perm, exp_stem)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::touch;
    use tempfile::TempDir;

    fn exp_stems() -> Vec<String> {
        vec!["data".to_string()]
    }

    fn averager<'a>(dir: &'a Path, exp_stems: &'a [String], smoothing: usize) -> ReplicateAverager<'a> {
        ReplicateAverager {
            gen_dir: dir,
            stem: "model",
            exp_stems,
            smoothing,
            control: "time",
        }
    }

    fn write_replicate(dir: &Path, perm: usize, rep: usize, values: &[f64]) {
        let rep_dir = replicate_dir(dir, rep);
        std::fs::create_dir_all(&rep_dir).unwrap();
        let mut body = String::from("# time A\n");
        for (i, v) in values.iter().enumerate() {
            body.push_str(&format!("{} {}\n", i, v));
        }
        std::fs::write(rep_dir.join(output_name("model", perm, "data")), body).unwrap();
        touch(&dir.join(format!("{}.finished", SimTask::task_name("model", perm, rep)))).unwrap();
    }

    #[test]
    fn averages_replicates_per_cell() {
        let dir = TempDir::new().unwrap();
        let stems = exp_stems();
        write_replicate(dir.path(), 0, 1, &[1.0, 2.0]);
        write_replicate(dir.path(), 0, 2, &[3.0, 6.0]);

        let failed = averager(dir.path(), &stems, 2).average(1).unwrap();
        assert!(failed.is_empty());

        let table = Table::read(&dir.path().join(output_name("model", 0, "data"))).unwrap();
        assert_eq!(table.rows[0], vec![0.0, 2.0]);
        assert_eq!(table.rows[1], vec![1.0, 4.0]);
    }

    #[test]
    fn partial_replicate_failure_still_averages() {
        let dir = TempDir::new().unwrap();
        let stems = exp_stems();
        write_replicate(dir.path(), 0, 1, &[4.0]);
        touch(&dir.path().join("model_perm0_rep2.failed")).unwrap();

        let failed = averager(dir.path(), &stems, 2).average(1).unwrap();
        assert!(failed.is_empty());

        let table = Table::read(&dir.path().join(output_name("model", 0, "data"))).unwrap();
        assert_eq!(table.rows[0], vec![0.0, 4.0]);
    }

    #[test]
    fn all_replicates_failed_marks_permutation() {
        let dir = TempDir::new().unwrap();
        let stems = exp_stems();
        touch(&dir.path().join("model_perm0_rep1.failed")).unwrap();
        touch(&dir.path().join("model_perm0_rep2.failed")).unwrap();
        write_replicate(dir.path(), 1, 1, &[1.0]);
        write_replicate(dir.path(), 1, 2, &[1.0]);

        let failed = averager(dir.path(), &stems, 2).average(2).unwrap();
        assert_eq!(failed, vec![0]);
    }

    #[test]
    fn averaging_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let stems = exp_stems();
        write_replicate(dir.path(), 0, 1, &[1.0, 5.0]);
        write_replicate(dir.path(), 0, 2, &[2.0, 7.0]);

        averager(dir.path(), &stems, 2).average(1).unwrap();
        let first = std::fs::read_to_string(dir.path().join(output_name("model", 0, "data"))).unwrap();

        averager(dir.path(), &stems, 2).average(1).unwrap();
        let second = std::fs::read_to_string(dir.path().join(output_name("model", 0, "data"))).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn finished_sentinel_without_output_counts_as_failed() {
        let dir = TempDir::new().unwrap();
        let stems = exp_stems();
        touch(&dir.path().join("model_perm0_rep1.finished")).unwrap();

        let failed = averager(dir.path(), &stems, 1).average(1).unwrap();
        assert_eq!(failed, vec![0]);
    }
}
