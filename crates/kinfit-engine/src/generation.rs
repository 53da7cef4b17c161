use crate::average::{ReplicateAverager, output_name, replicate_dir};
use crate::dispatch::{Dispatch, await_batch};
use crate::task::SimTask;
use kinfit_core::{
    ChangeLog, Executor, FitConfig, GenSnapshot, ModelBreakdown, ModelTemplate, ParamSchema,
    ParamVector, PermScore, Permutation, Population, PreppedRef, SENTINEL_SCORE, Scorer, Summary,
    Table, WeightMap,
};
use kinfit_error::{FitResult, ResultExt};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What one generation produced: the ranked summary (written to disk along
/// with the per-reference breakdown) and the number of sentinel-scored
/// permutations, which drives the retry decision.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub summary: Summary,
    pub failed: usize,
}

enum PermResult {
    Scored(PermScore),
    Skipped(String),
}

/// Sequences one generation: materialize the models, dispatch the batch,
/// await the sentinels, average replicates, score and summarize.
pub struct GenerationRunner<'a> {
    pub config: &'a FitConfig,
    pub schema: &'a ParamSchema,
    pub template: &'a ModelTemplate,
    pub scorer: &'a Scorer,
    pub refs: &'a Arc<Vec<PreppedRef>>,
    pub weights: Option<&'a Arc<WeightMap>>,
    pub network: Option<&'a Path>,
}

impl<'a> GenerationRunner<'a> {
    pub fn exp_stems(config: &FitConfig) -> Vec<String> {
        config
            .exp_files
            .iter()
            .map(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("data")
                    .to_string()
            })
            .collect()
    }

    pub fn run(
        &self,
        generation: usize,
        vectors: &[ParamVector],
        retries: usize,
        dispatch: &mut dyn Dispatch,
        poll_interval: Duration,
    ) -> FitResult<GenerationOutcome> {
        let gen_dir = self.config.generation_dir(generation);
        std::fs::create_dir_all(&gen_dir).context("creating generation directory")?;

        GenSnapshot {
            config: self.config.clone(),
            generation,
            names: self.schema.names().to_vec(),
            vectors: vectors.iter().map(|v| v.values.clone()).collect(),
            retries,
        }
        .write(&gen_dir)?;

        let tasks = self.materialize(&gen_dir, vectors)?;
        info!(
            "generation {}: dispatching {} simulations ({} permutations x {} replicates)",
            generation,
            tasks.len(),
            vectors.len(),
            self.config.smoothing
        );

        dispatch.dispatch(tasks)?;
        let report = await_batch(dispatch, poll_interval)?;
        debug!(
            "generation {}: {} of {} tasks failed",
            generation,
            report.failed_count(),
            report.statuses.len()
        );

        let exp_stems = Self::exp_stems(self.config);
        let averager = ReplicateAverager {
            gen_dir: &gen_dir,
            stem: self.template.stem(),
            exp_stems: &exp_stems,
            smoothing: self.config.smoothing,
            control: self.config.control_column(),
        };
        let failed_perms = averager
            .average(vectors.len())?
            .into_iter()
            .collect::<BTreeSet<_>>();

        self.score_and_summarize(generation, &gen_dir, vectors.len(), &failed_perms, &exp_stems)
    }

    /// Write one concrete model per permutation and derive a task per
    /// (permutation, replicate). Replicates share the model file but write
    /// into their own subdirectory.
    fn materialize(&self, gen_dir: &Path, vectors: &[ParamVector]) -> FitResult<Vec<SimTask>> {
        let stem = self.template.stem();
        let mut tasks = Vec::with_capacity(vectors.len() * self.config.smoothing);

        if self.config.smoothing > 1 {
            for rep in 1..=self.config.smoothing {
                std::fs::create_dir_all(replicate_dir(gen_dir, rep))
                    .context("creating replicate directory")?;
            }
        }

        for (perm, vector) in vectors.iter().enumerate() {
            let model_file = gen_dir.join(format!("{}_perm{}.bngl", stem, perm));
            self.template
                .materialize(self.schema, vector, &model_file, self.network)?;

            for rep in 1..=self.config.smoothing {
                let outdir = if self.config.smoothing > 1 {
                    replicate_dir(gen_dir, rep)
                } else {
                    gen_dir.to_path_buf()
                };
                tasks.push(SimTask {
                    name: SimTask::task_name(stem, perm, rep),
                    perm,
                    replicate: rep,
                    model_file: model_file.clone(),
                    outdir,
                    sentinel_dir: gen_dir.to_path_buf(),
                });
            }
        }

        Ok(tasks)
    }

    fn score_and_summarize(
        &self,
        generation: usize,
        gen_dir: &Path,
        perm_count: usize,
        failed_perms: &BTreeSet<usize>,
        exp_stems: &[String],
    ) -> FitResult<GenerationOutcome> {
        let stem = self.template.stem();

        // The change-log header is the on-disk source of truth for the
        // vectors; recover them rather than trusting in-memory state.
        let mut vectors = Vec::with_capacity(perm_count);
        for perm in 0..perm_count {
            let model_file = gen_dir.join(format!("{}_perm{}.bngl", stem, perm));
            let log = ChangeLog::read(&model_file)?;
            vectors.push(log.to_vector(self.schema)?);
        }

        let executor = if self.config.parallel_count > 1 {
            Executor::worker_pool(self.config.parallel_count)
        } else {
            Executor::serial()
        };

        let scorer = Arc::new(self.scorer.clone());
        let refs = Arc::clone(self.refs);
        let weights = self.weights.map(Arc::clone);

        let mut jobs: Vec<Box<dyn FnOnce() -> PermResult + Send>> =
            Vec::with_capacity(perm_count);
        for perm in 0..perm_count {
            if failed_perms.contains(&perm) {
                jobs.push(Box::new(move || {
                    PermResult::Skipped("all replicates failed".to_string())
                }));
                continue;
            }

            let scorer = Arc::clone(&scorer);
            let refs = Arc::clone(&refs);
            let weights = weights.clone();
            let sim_paths = exp_stems
                .iter()
                .map(|exp_stem| gen_dir.join(output_name(stem, perm, exp_stem)))
                .collect::<Vec<PathBuf>>();

            jobs.push(Box::new(move || {
                let mut sims = Vec::with_capacity(sim_paths.len());
                for path in &sim_paths {
                    match Table::read(path) {
                        Ok(table) => sims.push(table),
                        Err(e) => return PermResult::Skipped(e.to_string()),
                    }
                }
                match scorer.score_permutation(&refs, sims, weights.as_deref()) {
                    Ok(score) => PermResult::Scored(score),
                    Err(failure) => PermResult::Skipped(failure.to_string()),
                }
            }));
        }

        let results = executor.execute_batch(jobs);

        let mut breakdown = ModelBreakdown::new(exp_stems.to_vec());
        let mut population = Population::default();
        let mut failed = 0usize;
        for (perm, (vector, result)) in vectors.into_iter().zip(results).enumerate() {
            let mut member = Permutation::new(perm, vector);
            match result {
                PermResult::Scored(score) => {
                    member.score = score.total;
                    breakdown.rows.push((perm, score.per_ref));
                }
                PermResult::Skipped(reason) => {
                    info!("generation {}: permutation {} skipped: {}", generation, perm, reason);
                    member.score = SENTINEL_SCORE;
                    failed += 1;
                }
            }
            population.push(member);
        }

        let summary = Summary::from_population(self.schema.names().to_vec(), &mut population);
        summary.write(
            &self
                .config
                .output_dir
                .join(format!("{}_summary_diff.txt", generation)),
        )?;
        breakdown.write(&gen_dir.join("perm_model_diff.txt"))?;

        if let Some(best) = summary.best() {
            info!(
                "Generation {:<3} | Chi: {:>10.4} | Failed: {}",
                generation, best.score, failed
            );
        }

        Ok(GenerationOutcome { summary, failed })
    }
}
