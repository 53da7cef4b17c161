use kinfit_error::{FitResult, ResultExt, ensure, fit_bail, fit_err};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Objective-function variant used to score a simulation against reference
/// data. Serialized as the numeric selector from the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ObjectiveKind {
    /// (e − s)²
    Absolute,
    /// ((e − s) / σ)² with σ from the paired `_SD` column
    Sd,
    /// ((e − s) / e)²
    Relative,
    /// ((e − s) / μ_col)² with μ_col the mean of the reference column
    ColumnMean,
}

impl TryFrom<u8> for ObjectiveKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ObjectiveKind::Absolute),
            2 => Ok(ObjectiveKind::Sd),
            3 => Ok(ObjectiveKind::Relative),
            4 => Ok(ObjectiveKind::ColumnMean),
            other => Err(format!("objfunc must be 1..=4, found {}", other)),
        }
    }
}

impl From<ObjectiveKind> for u8 {
    fn from(kind: ObjectiveKind) -> u8 {
        match kind {
            ObjectiveKind::Absolute => 1,
            ObjectiveKind::Sd => 2,
            ObjectiveKind::Relative => 3,
            ObjectiveKind::ColumnMean => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelMode {
    #[default]
    Local,
    Cluster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    #[default]
    Torque,
    Slurm,
    Sge,
}

/// Batch-scheduler settings, only consulted when `parallel = "cluster"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub scheduler: SchedulerKind,
    /// Number of chunks running concurrently on the cluster.
    pub cluster_parallel: usize,
    /// Simulations packed into a single chunk job.
    pub multisim: usize,
    /// Fatal quota on queued+running jobs before submitting more work.
    pub job_limit: Option<usize>,
    pub poll_interval_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            scheduler: SchedulerKind::default(),
            cluster_parallel: 4,
            multisim: 1,
            job_limit: None,
            poll_interval_secs: 30,
        }
    }
}

/// One declarative free-variable spec. The generator folds these, in order,
/// into the initial population (see [crate::generator]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VarSpec {
    Fixed {
        name: String,
        value: f64,
    },
    /// Cartesian product with the working set.
    List {
        name: String,
        values: Vec<f64>,
    },
    /// Zipped with the working set; arity must match.
    StaticList {
        name: String,
        values: Vec<f64>,
    },
    /// `steps` equally spaced values in [first, last], last exact.
    Linear {
        name: String,
        first: f64,
        last: f64,
        steps: usize,
    },
    /// Geometrically spaced values from first to last.
    Log {
        name: String,
        first: f64,
        last: f64,
        steps: usize,
    },
    /// Uniform on [first, last).
    Random {
        name: String,
        first: f64,
        last: f64,
    },
    /// 10^(log10(min) + U·(log10(max) − log10(min)))
    LogUniform {
        name: String,
        min: f64,
        max: f64,
    },
    /// exp(ln(mean) + Z·stddev), Z standard normal.
    LogNormRandom {
        name: String,
        mean: f64,
        stddev: f64,
    },
}

impl VarSpec {
    pub fn name(&self) -> &str {
        match self {
            VarSpec::Fixed { name, .. }
            | VarSpec::List { name, .. }
            | VarSpec::StaticList { name, .. }
            | VarSpec::Linear { name, .. }
            | VarSpec::Log { name, .. }
            | VarSpec::Random { name, .. }
            | VarSpec::LogUniform { name, .. }
            | VarSpec::LogNormRandom { name, .. } => name,
        }
    }

    fn validate(&self) -> FitResult<()> {
        match self {
            VarSpec::List { name, values } | VarSpec::StaticList { name, values } => {
                ensure!(!values.is_empty(), ParamSpec: "{}: empty value list", name);
            }
            VarSpec::Linear {
                name,
                first,
                last,
                steps,
            } => {
                ensure!(*steps >= 2, ParamSpec: "{}: linear needs at least 2 steps", name);
                ensure!(last > first, ParamSpec: "{}: inverted range [{}, {}]", name, first, last);
            }
            VarSpec::Log {
                name,
                first,
                last,
                steps,
            } => {
                ensure!(*steps >= 2, ParamSpec: "{}: log needs at least 2 steps", name);
                ensure!(*first > 0.0, ParamSpec: "{}: log range must be positive", name);
                ensure!(last > first, ParamSpec: "{}: inverted range [{}, {}]", name, first, last);
            }
            VarSpec::Random { name, first, last } => {
                ensure!(last > first, ParamSpec: "{}: inverted range [{}, {}]", name, first, last);
            }
            VarSpec::LogUniform { name, min, max } => {
                ensure!(*min > 0.0, ParamSpec: "{}: loguniform range must be positive", name);
                ensure!(max > min, ParamSpec: "{}: inverted range [{}, {}]", name, min, max);
            }
            VarSpec::LogNormRandom { name, mean, stddev } => {
                ensure!(*mean > 0.0, ParamSpec: "{}: lognormal mean must be positive", name);
                ensure!(*stddev >= 0.0, ParamSpec: "{}: negative stddev", name);
            }
            VarSpec::Fixed { .. } => {}
        }
        Ok(())
    }
}

/// Mutation settings for one parameter name; the `default` key applies to any
/// parameter without its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MutationSpec {
    /// Probability that a child position mutates at all.
    pub prob: f64,
    /// Perturbation is a uniform draw on [−v·pct, +v·pct] added to value v.
    pub pct: f64,
}

fn default_smoothing() -> usize {
    1
}

fn default_parallel_count() -> usize {
    2
}

fn default_walltime() -> u64 {
    3600
}

fn default_retries() -> usize {
    3
}

fn default_swap_rate() -> f64 {
    0.5
}

fn default_max_parents() -> usize {
    usize::MAX
}

fn default_bootstrap_retries() -> usize {
    1
}

/// Immutable snapshot of a fitting job, deserialized from the TOML
/// configuration file named on the command line. One modified copy per
/// generation is persisted for restart/resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub job_name: String,
    /// Template model file with a `begin parameters` block.
    pub model: PathBuf,
    /// Reference time-course data, one or more `.exp` files.
    pub exp_files: Vec<PathBuf>,
    pub output_dir: PathBuf,
    /// The external simulator executable.
    pub simulator: PathBuf,

    /// Generation budget N.
    pub generations: usize,
    /// Population size P.
    pub population_size: usize,
    /// Replicate runs R per permutation.
    #[serde(default = "default_smoothing")]
    pub smoothing: usize,
    pub objfunc: ObjectiveKind,

    #[serde(default)]
    pub parallel: ParallelMode,
    /// Worker-pool width in local mode.
    #[serde(default = "default_parallel_count")]
    pub parallel_count: usize,
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Per-simulation walltime in seconds.
    #[serde(default = "default_walltime")]
    pub sim_walltime: u64,
    /// Whole-generation retries on catastrophic failure.
    #[serde(default = "default_retries")]
    pub max_retries: usize,

    /// Bootstrap iteration count B; 0 disables bootstrapping.
    #[serde(default)]
    pub bootstrap: usize,
    #[serde(default)]
    pub bootstrap_chi: f64,
    #[serde(default = "default_bootstrap_retries")]
    pub bootstrap_retries: usize,

    #[serde(default)]
    pub mutation: BTreeMap<String, MutationSpec>,
    /// Probability that a crossover position keeps its parent (historic
    /// direction; see `PositionalCrossover`).
    #[serde(default = "default_swap_rate")]
    pub swap_rate: f64,
    pub variables: Vec<VarSpec>,

    #[serde(default)]
    pub stop_when_stalled: bool,
    #[serde(default)]
    pub min_objfunc_value: Option<f64>,
    #[serde(default)]
    pub max_objfunc_value: Option<f64>,
    #[serde(default = "default_max_parents")]
    pub max_parents: usize,
    /// Keep-top-K parents re-inserted unchanged after breeding.
    #[serde(default)]
    pub keep_parents: usize,
    #[serde(default)]
    pub first_gen_permutations: Option<usize>,
    #[serde(default)]
    pub force_different_parents: bool,
    #[serde(default)]
    pub extra_weight: f64,

    #[serde(default)]
    pub seed: Option<u64>,
    /// Control column name; `None` means `time`.
    #[serde(default)]
    pub scan_parameter: Option<String>,

    #[serde(default)]
    pub divide_by_init: bool,
    /// Log base for simulation-data transformation, when enabled.
    #[serde(default)]
    pub log_transform_sim_data: Option<f64>,
    #[serde(default)]
    pub standardize_sim_data: bool,
    #[serde(default)]
    pub standardize_exp_data: bool,

    /// Delete a generation's simulation outputs once the next generation has
    /// been scored.
    #[serde(default)]
    pub delete_old_files: bool,
    /// Deterministic-ODE path: generate the reaction network once in
    /// generation 1 and reference it from every permutation file.
    #[serde(default)]
    pub generate_network: bool,
}

impl FitConfig {
    /// Load and validate a configuration from a TOML file. Any malformed spec,
    /// missing required key or missing input file is fatal here.
    pub fn load(path: &Path) -> FitResult<FitConfig> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| fit_err!(InvalidConfig: "cannot read {}: {}", path.display(), e))?;
        let config: FitConfig = toml::from_str(&text)
            .map_err(|e| fit_err!(InvalidConfig: "{}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FitResult<()> {
        ensure!(!self.job_name.is_empty(), InvalidConfig: "job_name is empty");
        ensure!(self.generations >= 1, InvalidConfig: "generations must be at least 1");
        ensure!(self.population_size >= 3, InvalidConfig: "population_size must be at least 3");
        ensure!(self.smoothing >= 1, InvalidConfig: "smoothing must be at least 1");
        ensure!(self.parallel_count >= 1, InvalidConfig: "parallel_count must be at least 1");
        ensure!(!self.exp_files.is_empty(), InvalidConfig: "no reference data files");
        ensure!(!self.variables.is_empty(), InvalidConfig: "no variable declarations");
        ensure!(
            (0.0..=1.0).contains(&self.swap_rate),
            InvalidConfig: "swap_rate must be within [0, 1]"
        );
        ensure!(
            (0.0..=10.0).contains(&self.extra_weight),
            InvalidConfig: "extra_weight must be within [0, 10]"
        );

        if let Some(first_gen) = self.first_gen_permutations {
            ensure!(
                first_gen >= self.population_size,
                InvalidConfig: "first_gen_permutations ({}) below population_size ({})",
                first_gen,
                self.population_size
            );
        }

        if let Some(base) = self.log_transform_sim_data {
            ensure!(
                base > 0.0 && base != 1.0,
                InvalidConfig: "log_transform_sim_data base must be positive and not 1"
            );
        }

        for (name, spec) in &self.mutation {
            ensure!(
                (0.0..=1.0).contains(&spec.prob),
                InvalidConfig: "mutation {:?}: prob must be within [0, 1]",
                name
            );
            ensure!(spec.pct >= 0.0, InvalidConfig: "mutation {:?}: negative pct", name);
        }

        for spec in &self.variables {
            spec.validate()?;
        }

        if !self.model.is_file() {
            fit_bail!(InvalidConfig: "model file not found: {}", self.model.display());
        }
        for exp in &self.exp_files {
            if !exp.is_file() {
                fit_bail!(InvalidConfig: "reference data file not found: {}", exp.display());
            }
        }

        if matches!(self.parallel, ParallelMode::Cluster) {
            ensure!(
                self.cluster.cluster_parallel >= 1 && self.cluster.multisim >= 1,
                InvalidConfig: "cluster chunking must be at least 1x1"
            );
        }

        Ok(())
    }

    /// The column used to align simulation rows with reference rows.
    pub fn control_column(&self) -> &str {
        self.scan_parameter.as_deref().unwrap_or("time")
    }

    /// Simulations to run in generation `gen`: the first generation may be
    /// oversized, every later generation holds exactly P permutations.
    pub fn permutation_count(&self, generation: usize) -> usize {
        if generation == 1 {
            self.first_gen_permutations
                .unwrap_or(self.population_size)
        } else {
            self.population_size
        }
    }

    /// Directory holding generation `gen`'s files.
    pub fn generation_dir(&self, generation: usize) -> PathBuf {
        self.output_dir.join(generation.to_string())
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output_dir.join("Results")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.output_dir.join(format!(".lock_{}", self.job_name))
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.log", self.job_name))
    }
}

/// Per-generation state snapshot written as `<gen>/config.json`. Resume finds
/// the highest generation carrying one of these and picks up from there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenSnapshot {
    pub config: FitConfig,
    pub generation: usize,
    pub names: Vec<String>,
    pub vectors: Vec<Vec<f64>>,
    /// Retries already burned on this generation.
    pub retries: usize,
}

impl GenSnapshot {
    pub const FILE_NAME: &'static str = "config.json";

    pub fn write(&self, gen_dir: &Path) -> FitResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| fit_err!(Serde: "snapshot: {}", e))?;
        std::fs::write(gen_dir.join(Self::FILE_NAME), text)
            .context("writing generation snapshot")?;
        Ok(())
    }

    pub fn read(gen_dir: &Path) -> FitResult<GenSnapshot> {
        let text = std::fs::read_to_string(gen_dir.join(Self::FILE_NAME))
            .context("reading generation snapshot")?;
        serde_json::from_str(&text).map_err(|e| fit_err!(Serde: "snapshot: {}", e))
    }

    pub fn exists(gen_dir: &Path) -> bool {
        gen_dir.join(Self::FILE_NAME).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn minimal_toml(dir: &TempDir) -> String {
        let model = write_file(dir, "model.bngl", "begin parameters\nk 1.0\nend parameters\n");
        let exp = write_file(dir, "data.exp", "# time A\n0 1\n");
        format!(
            r#"
            job_name = "fit"
            model = "{}"
            exp_files = ["{}"]
            output_dir = "{}"
            simulator = "/usr/bin/true"
            generations = 2
            population_size = 8
            objfunc = 1

            [[variables]]
            kind = "random"
            name = "k"
            first = 0.0
            last = 1.0
            "#,
            model.display(),
            exp.display(),
            dir.path().join("out").display()
        )
    }

    #[test]
    fn loads_minimal_config() {
        let dir = TempDir::new().unwrap();
        let conf = write_file(&dir, "fit.toml", &minimal_toml(&dir));
        let config = FitConfig::load(&conf).unwrap();

        assert_eq!(config.population_size, 8);
        assert_eq!(config.objfunc, ObjectiveKind::Absolute);
        assert_eq!(config.smoothing, 1);
        assert_eq!(config.control_column(), "time");
        assert_eq!(config.permutation_count(1), 8);
    }

    #[test]
    fn rejects_bad_objfunc() {
        let dir = TempDir::new().unwrap();
        let text = minimal_toml(&dir).replace("objfunc = 1", "objfunc = 9");
        let conf = write_file(&dir, "fit.toml", &text);
        assert!(FitConfig::load(&conf).is_err());
    }

    #[test]
    fn rejects_missing_model_file() {
        let dir = TempDir::new().unwrap();
        let text = minimal_toml(&dir).replace("model.bngl", "nope.bngl");
        let conf = write_file(&dir, "fit.toml", &text);
        let err = FitConfig::load(&conf).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn rejects_inverted_variable_range() {
        let dir = TempDir::new().unwrap();
        let text = minimal_toml(&dir)
            .replace("first = 0.0", "first = 2.0")
            .replace("last = 1.0", "last = 1.0");
        let conf = write_file(&dir, "fit.toml", &text);
        assert!(FitConfig::load(&conf).is_err());
    }

    #[test]
    fn first_gen_oversize_counts() {
        let dir = TempDir::new().unwrap();
        // Top-level keys must precede the [[variables]] tables.
        let text = minimal_toml(&dir)
            .replace("objfunc = 1", "objfunc = 1\nfirst_gen_permutations = 20");
        let conf = write_file(&dir, "fit.toml", &text);
        let config = FitConfig::load(&conf).unwrap();
        assert_eq!(config.permutation_count(1), 20);
        assert_eq!(config.permutation_count(2), 8);
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = TempDir::new().unwrap();
        let conf = write_file(&dir, "fit.toml", &minimal_toml(&dir));
        let config = FitConfig::load(&conf).unwrap();

        let gen_dir = dir.path().join("1");
        std::fs::create_dir_all(&gen_dir).unwrap();
        let snapshot = GenSnapshot {
            config,
            generation: 1,
            names: vec!["k".into()],
            vectors: vec![vec![0.5], vec![0.25]],
            retries: 0,
        };
        snapshot.write(&gen_dir).unwrap();

        assert!(GenSnapshot::exists(&gen_dir));
        let back = GenSnapshot::read(&gen_dir).unwrap();
        assert_eq!(back.generation, 1);
        assert_eq!(back.vectors, snapshot.vectors);
    }
}
