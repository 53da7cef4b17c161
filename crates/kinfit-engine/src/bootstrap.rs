use crate::controller::{FitController, FitOutcome};
use kinfit_core::{Summary, SummaryRow, WeightMap};
use kinfit_error::{FitResult, ResultExt, fit_bail};
use std::path::Path;
use tracing::info;

/// Wraps the generation controller in a bootstrap outer loop: each iteration
/// resamples the reference weights, reruns the whole fit, and keeps the
/// best-fit row. Iterations whose best chi lands at or above `bootstrap_chi`
/// are retried; exhausting `bootstrap_retries` is fatal.
pub struct BootstrapController {
    controller: FitController,
}

impl BootstrapController {
    pub fn new(controller: FitController) -> Self {
        BootstrapController { controller }
    }

    pub fn run(&mut self) -> FitResult<Summary> {
        let config = self.controller.config().clone();
        let iterations = config.bootstrap;
        let references = self.controller.raw_references()?;
        let stems = crate::generation::GenerationRunner::exp_stems(&config);
        let names = config
            .variables
            .iter()
            .map(|spec| spec.name().to_string())
            .collect::<Vec<_>>();

        let mut table = Summary::new(names);
        for iteration in 1..=iterations {
            let mut retries = 0usize;
            let outcome = loop {
                self.wipe_fit_outputs()?;

                let weights = WeightMap::resample(&references, config.control_column());
                weights.write(&config.output_dir, &stems)?;
                self.controller.set_weights(Some(weights));

                let outcome = self.controller.submit()?;
                if outcome.best.score < config.bootstrap_chi {
                    break outcome;
                }

                retries += 1;
                if retries > config.bootstrap_retries {
                    fit_bail!(
                        Engine: "bootstrap iteration {}: best chi {} stayed above {} after {} retries",
                        iteration,
                        outcome.best.score,
                        config.bootstrap_chi,
                        config.bootstrap_retries
                    );
                }
                info!(
                    "bootstrap iteration {}: best chi {} >= {}; retry {} of {}",
                    iteration,
                    outcome.best.score,
                    config.bootstrap_chi,
                    retries,
                    config.bootstrap_retries
                );
            };

            self.record_iteration(iteration, &outcome, &mut table)?;
        }

        Ok(table)
    }

    fn record_iteration(
        &self,
        iteration: usize,
        outcome: &FitOutcome,
        table: &mut Summary,
    ) -> FitResult<()> {
        let config = self.controller.config();

        table.rows.push(SummaryRow {
            perm: iteration,
            score: outcome.best.score,
            values: outcome.best.values.clone(),
        });
        table.write_runs(&config.output_dir.join("params.txt"))?;

        let results = config.results_dir();
        let copy = config.output_dir.join(format!("Results_{}", iteration));
        copy_dir(&results, &copy)?;
        info!(
            "bootstrap iteration {} done: chi {} (results copied to {})",
            iteration,
            outcome.best.score,
            copy.display()
        );
        Ok(())
    }

    /// Clear everything one fit produced so the next iteration starts clean:
    /// generation directories, summaries and the Results directory. The
    /// bootstrap artifacts (`params.txt`, `Results_<i>`, weight files) stay.
    fn wipe_fit_outputs(&self) -> FitResult<()> {
        let config = self.controller.config();

        let mut g = 1;
        while config.generation_dir(g).exists() {
            std::fs::remove_dir_all(config.generation_dir(g))
                .context("clearing generation directory")?;
            let _ = std::fs::remove_file(
                config.output_dir.join(format!("{}_summary_diff.txt", g)),
            );
            g += 1;
        }

        let results = config.results_dir();
        if results.exists() {
            std::fs::remove_dir_all(&results).context("clearing Results directory")?;
        }
        Ok(())
    }
}

fn copy_dir(source: &Path, target: &Path) -> FitResult<()> {
    std::fs::create_dir_all(target).context("creating results copy")?;
    for entry in std::fs::read_dir(source).context("reading Results directory")? {
        let entry = entry.context("reading Results directory")?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).context("copying results file")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_dir_is_recursive() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("Results");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("sorted_params.txt"), "Permutation Chi-Sq k\n").unwrap();
        std::fs::write(source.join("nested/file.txt"), "x").unwrap();

        let target = dir.path().join("Results_1");
        copy_dir(&source, &target).unwrap();

        assert!(target.join("sorted_params.txt").is_file());
        assert!(target.join("nested/file.txt").is_file());
    }
}
