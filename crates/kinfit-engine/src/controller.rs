use crate::dispatch::{ClusterDispatch, CommandProbe, Dispatch, LocalDispatch};
use crate::generation::{GenerationOutcome, GenerationRunner};
use crate::simulator::Simulator;
use kinfit_breed::{Breeder, Termination};
use kinfit_core::{
    FitConfig, GenSnapshot, ModelTemplate, ParallelMode, ParamSchema, ParamVector, PreppedRef,
    Scorer, Summary, SummaryRow, Table, WeightMap, generate_population,
};
use kinfit_error::{FitResult, ResultExt, fit_bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Why the fit stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The generation budget ran out.
    BudgetExhausted,
    Stalled,
    ThresholdMet,
    /// A generation kept failing and earlier results were consolidated.
    RetriesExhausted,
}

#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub best: SummaryRow,
    pub generations_run: usize,
    pub reason: StopReason,
}

/// Streaming job log: human-readable progress lines appended to
/// `<job>.log`, which the progress monitor tails. Lines also go to tracing.
pub struct StatusLog {
    path: PathBuf,
}

impl StatusLog {
    pub fn new(path: PathBuf) -> Self {
        StatusLog { path }
    }

    pub fn record(&self, message: &str) {
        // The monitor streams the log file to the console, so tracing only
        // carries these at debug level to avoid double-printing.
        debug!("{}", message);
        let stamped = format!(
            "[{}] {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        );
        if let Err(e) = append(&self.path, &stamped) {
            warn!("cannot append to {}: {}", self.path.display(), e);
        }
    }
}

fn append(path: &Path, text: &str) -> std::io::Result<()> {
    use std::io::Write as _;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(text.as_bytes())
}

/// `.lock_<job>` file guarding the output tree. Created at submit, removed
/// on drop at final termination; a leftover lock means another run may still
/// own the tree and re-submitting prompts the user.
pub struct JobLock {
    path: PathBuf,
}

impl JobLock {
    pub fn acquire(config: &FitConfig) -> FitResult<JobLock> {
        let path = config.lock_path();
        if path.exists() {
            fit_bail!(
                Engine: "lock file {} exists; another run of {:?} may be active (remove it or resume)",
                path.display(),
                config.job_name
            );
        }
        std::fs::write(
            &path,
            format!(
                "{} started {} pid {}\n",
                config.job_name,
                chrono::Local::now().to_rfc3339(),
                std::process::id()
            ),
        )
        .context("creating job lock")?;
        Ok(JobLock { path })
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Supervises the whole fit: sequences generations, enforces the retry
/// policy, reacts to the breeder's termination decisions and consolidates
/// results. The controller itself is single-threaded; all concurrency lives
/// behind the dispatch seam.
pub struct FitController {
    config: FitConfig,
    template: ModelTemplate,
    simulator: Simulator,
    scorer: Scorer,
    refs: Arc<Vec<PreppedRef>>,
    weights: Option<Arc<WeightMap>>,
    network: Option<PathBuf>,
    status: StatusLog,
}

impl FitController {
    pub fn new(config: FitConfig) -> FitResult<FitController> {
        std::fs::create_dir_all(&config.output_dir).context("creating output directory")?;

        let template = ModelTemplate::load(&config.model)?;
        let scorer = Scorer::from_config(&config);

        let mut refs = Vec::with_capacity(config.exp_files.len());
        for exp in &config.exp_files {
            let table = Table::read(exp)?;
            refs.push(scorer.prep_reference(table)?);
        }

        let simulator = Simulator::new(config.simulator.clone());
        let status = StatusLog::new(config.log_path());

        Ok(FitController {
            config,
            template,
            simulator,
            scorer,
            refs: Arc::new(refs),
            weights: None,
            network: None,
            status,
        })
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Raw (unpreprocessed) reference tables, used by the bootstrap loop to
    /// draw weight maps.
    pub fn raw_references(&self) -> FitResult<Vec<Table>> {
        self.config.exp_files.iter().map(|p| Table::read(p)).collect()
    }

    pub fn set_weights(&mut self, weights: Option<WeightMap>) {
        self.weights = weights.map(Arc::new);
    }

    /// Fresh fit from generation 1.
    pub fn submit(&mut self) -> FitResult<FitOutcome> {
        let target = self.config.permutation_count(1);
        let (schema, vectors) = generate_population(&self.config.variables, target)?;
        self.status.record(&format!(
            "job {:?}: generation 1 seeded with {} permutations of {} parameters",
            self.config.job_name,
            vectors.len(),
            schema.len()
        ));

        if self.config.generate_network && self.network.is_none() {
            self.generate_network()?;
        }

        self.run_from(schema, vectors, 1, 0, None)
    }

    /// Pick the fit back up from the newest generation holding a config
    /// snapshot: partial outputs of that generation are wiped (the snapshot
    /// survives), higher generations are dropped entirely.
    pub fn resume(&mut self, new_generations: Option<usize>) -> FitResult<FitOutcome> {
        let mut latest = None;
        let mut g = 1;
        while self.config.generation_dir(g).exists() {
            if GenSnapshot::exists(&self.config.generation_dir(g)) {
                latest = Some(g);
            }
            g += 1;
        }
        let Some(latest) = latest else {
            fit_bail!(Engine: "no recoverable generation under {}", self.config.output_dir.display());
        };

        let gen_dir = self.config.generation_dir(latest);
        let mut snapshot = GenSnapshot::read(&gen_dir)?;
        if let Some(n) = new_generations {
            snapshot.config.generations = n;
        }
        self.config = snapshot.config.clone();

        let mut higher = latest + 1;
        while self.config.generation_dir(higher).exists() {
            std::fs::remove_dir_all(self.config.generation_dir(higher))
                .context("removing abandoned generation")?;
            let _ = std::fs::remove_file(
                self.config
                    .output_dir
                    .join(format!("{}_summary_diff.txt", higher)),
            );
            higher += 1;
        }
        clear_partial_outputs(&gen_dir)?;
        snapshot.write(&gen_dir)?;

        if self.config.generate_network && self.network.is_none() {
            self.generate_network()?;
        }

        let parent = if latest > 1 {
            Summary::read(
                &self
                    .config
                    .generation_dir(latest - 1)
                    .join("parent_summary_diff.txt"),
            )
            .ok()
        } else {
            None
        };

        self.status.record(&format!(
            "job {:?}: resuming at generation {} (budget {})",
            self.config.job_name, latest, self.config.generations
        ));

        let schema = ParamSchema::new(snapshot.names);
        let vectors = snapshot
            .vectors
            .into_iter()
            .map(ParamVector::new)
            .collect::<Vec<_>>();
        self.run_from(schema, vectors, latest, snapshot.retries, parent)
    }

    /// Consolidation only: rebuild the Results directory from whatever
    /// generation summaries are on disk.
    pub fn results(&self) -> FitResult<SummaryRow> {
        let mut last = 0;
        while self
            .config
            .output_dir
            .join(format!("{}_summary_diff.txt", last + 1))
            .is_file()
        {
            last += 1;
        }
        if last == 0 {
            fit_bail!(Engine: "no generation summaries under {}", self.config.output_dir.display());
        }
        self.finalize(last)
    }

    fn generate_network(&mut self) -> FitResult<()> {
        let gen_dir = self.config.generation_dir(1);
        std::fs::create_dir_all(&gen_dir).context("creating generation directory")?;

        let netgen = gen_dir.join(format!("{}_netgen.bngl", self.template.stem()));
        self.template.write_plain(&netgen)?;
        let net = self.simulator.generate_network(&netgen, &gen_dir)?;
        self.status
            .record(&format!("reaction network generated at {}", net.display()));
        self.network = Some(net);
        Ok(())
    }

    fn make_dispatch(&self) -> (Box<dyn Dispatch>, Duration) {
        let walltime = Duration::from_secs(self.config.sim_walltime);
        match self.config.parallel {
            ParallelMode::Local => (
                Box::new(LocalDispatch::new(
                    self.simulator.clone(),
                    self.config.parallel_count,
                    walltime,
                )),
                Duration::from_millis(500),
            ),
            ParallelMode::Cluster => (
                Box::new(ClusterDispatch::new(
                    self.simulator.clone(),
                    self.config.cluster.clone(),
                    walltime,
                    Box::new(CommandProbe::new(self.config.cluster.scheduler)),
                )),
                Duration::from_secs(self.config.cluster.poll_interval_secs),
            ),
        }
    }

    fn run_from(
        &mut self,
        schema: ParamSchema,
        mut vectors: Vec<ParamVector>,
        start_gen: usize,
        start_retries: usize,
        mut parent: Option<Summary>,
    ) -> FitResult<FitOutcome> {
        let breeder = Breeder::from_config(&self.config, schema.clone());
        let mut g = start_gen;
        let mut retries = start_retries;

        loop {
            let outcome = self.run_generation(g, &schema, &vectors, retries)?;

            // Retry policy: a generation drowning in failures is wiped and
            // re-run while retries remain.
            if outcome.failed > self.config.population_size.saturating_sub(3) {
                if retries < self.config.max_retries {
                    retries += 1;
                    self.status.record(&format!(
                        "generation {}: {} of {} permutations failed; retry {} of {}",
                        g,
                        outcome.failed,
                        vectors.len(),
                        retries,
                        self.config.max_retries
                    ));
                    std::fs::remove_dir_all(self.config.generation_dir(g))
                        .context("wiping failed generation")?;
                    continue;
                }
                if g >= 3 {
                    self.status.record(&format!(
                        "generation {}: retries exhausted; consolidating completed generations",
                        g
                    ));
                    let best = self.finalize(g - 1)?;
                    return Ok(FitOutcome {
                        best,
                        generations_run: g - 1,
                        reason: StopReason::RetriesExhausted,
                    });
                }
                fit_bail!(
                    Engine: "generation {} failed {} times with fewer than 3 usable permutations",
                    g,
                    retries + 1
                );
            }
            retries = 0;

            if self.config.delete_old_files && g > 1 {
                self.delete_sim_outputs(g - 1);
            }

            if g >= self.config.generations {
                let best = self.finalize(g)?;
                return Ok(FitOutcome {
                    best,
                    generations_run: g,
                    reason: StopReason::BudgetExhausted,
                });
            }

            let bred = match breeder.next_generation(&outcome.summary, parent.as_ref()) {
                Ok(bred) => bred,
                Err(e) => {
                    // Too few survivors: consolidate what exists, then
                    // surface the fatal.
                    self.status.record(&format!("fitting terminated: {}", e));
                    let _ = self.finalize(g);
                    return Err(e);
                }
            };

            bred.parent_summary
                .write(&self.config.generation_dir(g).join("parent_summary_diff.txt"))?;

            match bred.termination {
                Some(Termination::Stalled) => {
                    self.status
                        .record(&format!("generation {}: population stalled", g));
                    let best = self.finalize(g)?;
                    return Ok(FitOutcome {
                        best,
                        generations_run: g,
                        reason: StopReason::Stalled,
                    });
                }
                Some(Termination::ThresholdMet) => {
                    self.status
                        .record(&format!("generation {}: objective threshold met", g));
                    let best = self.finalize(g)?;
                    return Ok(FitOutcome {
                        best,
                        generations_run: g,
                        reason: StopReason::ThresholdMet,
                    });
                }
                None => {
                    parent = Some(bred.parent_summary);
                    vectors = bred.vectors;
                    g += 1;
                }
            }
        }
    }

    fn run_generation(
        &self,
        g: usize,
        schema: &ParamSchema,
        vectors: &[ParamVector],
        retries: usize,
    ) -> FitResult<GenerationOutcome> {
        let runner = GenerationRunner {
            config: &self.config,
            schema,
            template: &self.template,
            scorer: &self.scorer,
            refs: &self.refs,
            weights: self.weights.as_ref(),
            network: self.network.as_deref(),
        };
        let (mut dispatch, poll_interval) = self.make_dispatch();
        runner.run(g, vectors, retries, dispatch.as_mut(), poll_interval)
    }

    /// Write the Results directory: every generation's summary merged and
    /// sorted into `sorted_params.txt`, plus the best permutation's model
    /// and simulation outputs.
    fn finalize(&self, last_gen: usize) -> FitResult<SummaryRow> {
        let results = self.config.results_dir();
        std::fs::create_dir_all(&results).context("creating Results directory")?;

        let mut all: Vec<(usize, SummaryRow)> = Vec::new();
        let mut names = Vec::new();
        for g in 1..=last_gen {
            let path = self
                .config
                .output_dir
                .join(format!("{}_summary_diff.txt", g));
            if !path.is_file() {
                continue;
            }
            let summary = Summary::read(&path)?;
            names = summary.names.clone();
            all.extend(summary.rows.into_iter().map(|row| (g, row)));
        }
        if all.is_empty() {
            fit_bail!(Engine: "nothing to consolidate: no generation summaries found");
        }
        all.sort_by(|a, b| a.1.score.total_cmp(&b.1.score));

        let sorted = Summary {
            names,
            rows: all.iter().map(|(_, row)| row.clone()).collect(),
        };
        sorted.write(&results.join("sorted_params.txt"))?;

        let (best_gen, best) = &all[0];
        self.copy_best_outputs(*best_gen, best.perm, &results);
        self.status.record(&format!(
            "results written to {} (best chi {} from generation {} permutation {})",
            results.display(),
            best.score,
            best_gen,
            best.perm
        ));

        Ok(best.clone())
    }

    /// Best-effort copies; older outputs may have been deleted.
    fn copy_best_outputs(&self, generation: usize, perm: usize, results: &Path) {
        let gen_dir = self.config.generation_dir(generation);
        let stem = self.template.stem();

        let mut sources = vec![gen_dir.join(format!("{}_perm{}.bngl", stem, perm))];
        for exp_stem in GenerationRunner::exp_stems(&self.config) {
            sources.push(gen_dir.join(crate::average::output_name(stem, perm, &exp_stem)));
        }

        for source in sources {
            if source.is_file()
                && let Some(name) = source.file_name()
                && let Err(e) = std::fs::copy(&source, results.join(name))
            {
                warn!("cannot copy {} into Results: {}", source.display(), e);
            }
        }
    }

    fn delete_sim_outputs(&self, generation: usize) {
        let gen_dir = self.config.generation_dir(generation);
        let Ok(entries) = std::fs::read_dir(&gen_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if path.is_dir() && name.starts_with("rep") {
                let _ = std::fs::remove_dir_all(&path);
            } else if name.ends_with(".gdat") || name.ends_with(".BNG_OUT") {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

/// Drop everything in a resumed generation's directory except its config
/// snapshot.
fn clear_partial_outputs(gen_dir: &Path) -> FitResult<()> {
    for entry in std::fs::read_dir(gen_dir).context("reading generation directory")? {
        let entry = entry.context("reading generation directory")?;
        if entry.file_name() == GenSnapshot::FILE_NAME {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path).context("clearing partial outputs")?;
        } else {
            std::fs::remove_file(&path).context("clearing partial outputs")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn job_lock_blocks_second_acquire_and_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let lock = JobLock::acquire(&config).unwrap();
        assert!(config.lock_path().is_file());
        assert!(JobLock::acquire(&config).is_err());

        drop(lock);
        assert!(!config.lock_path().is_file());
        assert!(JobLock::acquire(&config).is_ok());
    }

    #[test]
    fn clear_partial_outputs_spares_the_snapshot() {
        let dir = TempDir::new().unwrap();
        let gen_dir = dir.path().join("3");
        std::fs::create_dir_all(gen_dir.join("rep1")).unwrap();
        std::fs::write(gen_dir.join(GenSnapshot::FILE_NAME), "{}").unwrap();
        std::fs::write(gen_dir.join("model_perm0.bngl"), "x").unwrap();

        clear_partial_outputs(&gen_dir).unwrap();

        assert!(gen_dir.join(GenSnapshot::FILE_NAME).is_file());
        assert!(!gen_dir.join("model_perm0.bngl").exists());
        assert!(!gen_dir.join("rep1").exists());
    }

    fn test_config(dir: &TempDir) -> FitConfig {
        let model = dir.path().join("model.bngl");
        std::fs::write(&model, "begin parameters\nk 1.0\nend parameters\n").unwrap();
        let exp = dir.path().join("data.exp");
        std::fs::write(&exp, "# time A\n0 1\n").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        FitConfig {
            job_name: "job".into(),
            model,
            exp_files: vec![exp],
            output_dir: out,
            simulator: PathBuf::from("/bin/true"),
            generations: 2,
            population_size: 4,
            smoothing: 1,
            objfunc: kinfit_core::ObjectiveKind::Absolute,
            parallel: ParallelMode::Local,
            parallel_count: 1,
            cluster: Default::default(),
            sim_walltime: 60,
            max_retries: 1,
            bootstrap: 0,
            bootstrap_chi: 0.0,
            bootstrap_retries: 1,
            mutation: Default::default(),
            swap_rate: 0.5,
            variables: vec![kinfit_core::VarSpec::Random {
                name: "k".into(),
                first: 0.0,
                last: 1.0,
            }],
            stop_when_stalled: false,
            min_objfunc_value: None,
            max_objfunc_value: None,
            max_parents: usize::MAX,
            keep_parents: 0,
            first_gen_permutations: None,
            force_different_parents: false,
            extra_weight: 0.0,
            seed: None,
            scan_parameter: None,
            divide_by_init: false,
            log_transform_sim_data: None,
            standardize_sim_data: false,
            standardize_exp_data: false,
            delete_old_files: false,
            generate_network: false,
        }
    }
}
