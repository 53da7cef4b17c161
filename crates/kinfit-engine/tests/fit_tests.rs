#![cfg(unix)]

use kinfit_core::random_provider;
use kinfit_core::{FitConfig, ObjectiveKind, ParallelMode, Summary, VarSpec};
use kinfit_engine::bootstrap::BootstrapController;
use kinfit_engine::controller::{FitController, StopReason};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A stand-in simulator: recovers `k` from the materialized model's change
/// log and writes an exponential-decay trace for it, honoring the
/// `--outdir <dir> <model>` contract and the `<stem>_data.gdat` output name.
fn stub_simulator(dir: &Path) -> PathBuf {
    let exe = dir.join("sim.sh");
    std::fs::write(
        &exe,
        r##"#!/bin/sh
outdir="$2"
model="$3"
k=$(sed -n 's/^# k changed to //p' "$model" | head -n 1)
stem=$(basename "$model" .bngl)
awk -v k="$k" 'BEGIN { print "# time A"; for (t = 0; t <= 2; t++) printf "%d %.10f\n", t, exp(-k * t) }' > "$outdir/${stem}_data.gdat"
"##,
    )
    .unwrap();
    let mut perms = std::fs::metadata(&exe).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&exe, perms).unwrap();
    exe
}

/// A simulator that always exits nonzero without writing anything.
fn broken_simulator(dir: &Path) -> PathBuf {
    let exe = dir.join("broken.sh");
    std::fs::write(&exe, "#!/bin/sh\nexit 1\n").unwrap();
    let mut perms = std::fs::metadata(&exe).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&exe, perms).unwrap();
    exe
}

/// Template with one free parameter and a reference trace of exp(-t),
/// i.e. the optimum sits at k = 1.
fn fixture(dir: &TempDir, simulator: PathBuf) -> FitConfig {
    let model = dir.path().join("model.bngl");
    std::fs::write(
        &model,
        "begin parameters\n1 k 0.5\nend parameters\nsimulate({method=>\"ode\"})\n",
    )
    .unwrap();

    let exp = dir.path().join("data.exp");
    std::fs::write(
        &exp,
        "# time A\n0 1.0\n1 0.3678794412\n2 0.1353352832\n",
    )
    .unwrap();

    FitConfig {
        job_name: "decay".into(),
        model,
        exp_files: vec![exp],
        output_dir: dir.path().join("out"),
        simulator,
        generations: 2,
        population_size: 8,
        smoothing: 1,
        objfunc: ObjectiveKind::Absolute,
        parallel: ParallelMode::Local,
        parallel_count: 4,
        cluster: Default::default(),
        sim_walltime: 60,
        max_retries: 1,
        bootstrap: 0,
        bootstrap_chi: 0.0,
        bootstrap_retries: 1,
        mutation: [(
            "default".to_string(),
            kinfit_core::MutationSpec {
                prob: 0.3,
                pct: 0.2,
            },
        )]
        .into_iter()
        .collect(),
        swap_rate: 0.5,
        variables: vec![VarSpec::Random {
            name: "k".into(),
            first: 0.0,
            last: 2.0,
        }],
        stop_when_stalled: false,
        min_objfunc_value: None,
        max_objfunc_value: None,
        max_parents: usize::MAX,
        keep_parents: 1,
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

#[test]
fn two_generation_fit_improves_monotonically() {
    let dir = TempDir::new().unwrap();
    let config = fixture(&dir, stub_simulator(dir.path()));
    random_provider::set_seed(2024);

    let mut controller = FitController::new(config.clone()).unwrap();
    let outcome = controller.submit().unwrap();

    assert_eq!(outcome.generations_run, 2);
    assert_eq!(outcome.reason, StopReason::BudgetExhausted);

    let gen1 = Summary::read(&config.output_dir.join("1_summary_diff.txt")).unwrap();
    let gen2 = Summary::read(&config.output_dir.join("2_summary_diff.txt")).unwrap();

    // Population size conservation, and the kept parent guarantees the best
    // chi never regresses between generations.
    assert_eq!(gen1.len(), 8);
    assert_eq!(gen2.len(), 8);
    assert!(gen2.best().unwrap().score <= gen1.best().unwrap().score);

    // The parent summary bridging the generations holds exactly P rows.
    let parents =
        Summary::read(&config.output_dir.join("1").join("parent_summary_diff.txt")).unwrap();
    assert_eq!(parents.len(), 8);

    let sorted =
        Summary::read(&config.output_dir.join("Results").join("sorted_params.txt")).unwrap();
    assert_eq!(sorted.len(), 16);
    assert_eq!(sorted.best().unwrap().score, outcome.best.score);
}

#[test]
fn first_generation_oversize_restores_population() {
    let dir = TempDir::new().unwrap();
    let mut config = fixture(&dir, stub_simulator(dir.path()));
    config.first_gen_permutations = Some(12);
    random_provider::set_seed(7);

    let mut controller = FitController::new(config.clone()).unwrap();
    controller.submit().unwrap();

    let gen1 = Summary::read(&config.output_dir.join("1_summary_diff.txt")).unwrap();
    let gen2 = Summary::read(&config.output_dir.join("2_summary_diff.txt")).unwrap();
    assert_eq!(gen1.len(), 12);
    assert_eq!(gen2.len(), 8);
}

#[test]
fn threshold_stops_early() {
    let dir = TempDir::new().unwrap();
    let mut config = fixture(&dir, stub_simulator(dir.path()));
    // Any population hits this: scores are bounded by the trace itself.
    config.min_objfunc_value = Some(1e6);
    config.generations = 5;
    random_provider::set_seed(99);

    let mut controller = FitController::new(config.clone()).unwrap();
    let outcome = controller.submit().unwrap();
    assert_eq!(outcome.reason, StopReason::ThresholdMet);
    assert_eq!(outcome.generations_run, 1);
    assert!(!config.output_dir.join("2_summary_diff.txt").exists());
}

#[test]
fn failing_simulator_exhausts_retries_fatally() {
    let dir = TempDir::new().unwrap();
    let config = fixture(&dir, broken_simulator(dir.path()));
    random_provider::set_seed(5);

    let mut controller = FitController::new(config.clone()).unwrap();
    let err = controller.submit().unwrap_err();
    assert!(err.to_string().contains("fewer than 3 usable permutations"));

    // Every permutation left a failed sentinel on the last attempt.
    let failed = std::fs::read_dir(config.output_dir.join("1"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".failed"))
        .count();
    assert_eq!(failed, 8);
}

#[test]
fn resume_continues_with_a_larger_budget() {
    let dir = TempDir::new().unwrap();
    let mut config = fixture(&dir, stub_simulator(dir.path()));
    config.generations = 1;
    random_provider::set_seed(11);

    let mut controller = FitController::new(config.clone()).unwrap();
    let first = controller.submit().unwrap();
    assert_eq!(first.generations_run, 1);

    let mut resumed = FitController::new(config.clone()).unwrap();
    let outcome = resumed.resume(Some(2)).unwrap();
    assert_eq!(outcome.generations_run, 2);
    assert!(config.output_dir.join("2_summary_diff.txt").is_file());
    // The resumed generation reused its snapshot, so generation 1 scores the
    // same population again.
    let gen1 = Summary::read(&config.output_dir.join("1_summary_diff.txt")).unwrap();
    assert_eq!(gen1.best().unwrap().score, first.best.score);
}

#[test]
fn results_verb_consolidates_from_disk() {
    let dir = TempDir::new().unwrap();
    let config = fixture(&dir, stub_simulator(dir.path()));
    random_provider::set_seed(42);

    let mut controller = FitController::new(config.clone()).unwrap();
    let outcome = controller.submit().unwrap();

    // Blow away Results and rebuild it from the summaries alone.
    std::fs::remove_dir_all(config.results_dir()).unwrap();
    let best = FitController::new(config.clone()).unwrap().results().unwrap();
    assert_eq!(best.score, outcome.best.score);
    assert!(config.results_dir().join("sorted_params.txt").is_file());
}

#[test]
fn replicates_are_averaged_into_one_output() {
    let dir = TempDir::new().unwrap();
    let mut config = fixture(&dir, stub_simulator(dir.path()));
    config.smoothing = 3;
    config.generations = 1;
    random_provider::set_seed(17);

    let mut controller = FitController::new(config.clone()).unwrap();
    controller.submit().unwrap();

    let gen_dir = config.output_dir.join("1");
    // Replicate outputs were renamed out of their subdirectories and the
    // averaged file exists per permutation.
    assert!(gen_dir.join("model_perm0_rep1_data.gdat").is_file());
    assert!(gen_dir.join("model_perm0_rep3_data.gdat").is_file());
    assert!(gen_dir.join("model_perm0_data.gdat").is_file());
}

#[test]
fn bootstrap_writes_params_table_and_result_copies() {
    let dir = TempDir::new().unwrap();
    let mut config = fixture(&dir, stub_simulator(dir.path()));
    config.generations = 1;
    config.population_size = 4;
    config.bootstrap = 2;
    config.bootstrap_chi = 1e9;
    random_provider::set_seed(23);

    let controller = FitController::new(config.clone()).unwrap();
    let table = BootstrapController::new(controller).run().unwrap();

    assert_eq!(table.len(), 2);
    let on_disk = Summary::read(&config.output_dir.join("params.txt")).unwrap();
    assert_eq!(on_disk.len(), 2);
    assert_eq!(on_disk.rows[0].perm, 1);
    assert_eq!(on_disk.rows[1].perm, 2);

    assert!(config.output_dir.join("Results_1/sorted_params.txt").is_file());
    assert!(config.output_dir.join("Results_2/sorted_params.txt").is_file());
    assert!(config.output_dir.join("data_weights.txt").is_file());
}
