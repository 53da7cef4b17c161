use clap::{Parser, Subcommand};
use kinfit_core::{FitConfig, random_provider};
use kinfit_engine::{
    BootstrapController, FitController, JobLock, ProgressMonitor, init_logging,
};
use kinfit_error::{FitResult, fit_bail};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kinfit", version, about = "Fit reaction-network model parameters to experimental data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fresh fitting job from a configuration file
    Submit { conf: PathBuf },
    /// Continue an interrupted job from its newest recoverable generation
    Resume {
        conf: PathBuf,
        /// Raise the generation budget to this many generations
        #[arg(short, long)]
        generations: Option<usize>,
    },
    /// Consolidate results from completed generations without running anything
    Results { conf: PathBuf },
}

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> FitResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit { conf } => {
            let config = load(&conf)?;
            confirm_stale_lock(&config)?;

            let mut controller = FitController::new(config.clone())?;
            let _lock = JobLock::acquire(controller.config())?;
            let _monitor = ProgressMonitor::spawn(
                config.output_dir.clone(),
                config.log_path(),
                config.bootstrap,
            );

            if config.bootstrap > 0 {
                BootstrapController::new(controller).run()?;
            } else {
                let outcome = controller.submit()?;
                println!(
                    "best chi {} after {} generations ({:?})",
                    outcome.best.score, outcome.generations_run, outcome.reason
                );
            }
        }
        Commands::Resume { conf, generations } => {
            let config = load(&conf)?;
            confirm_stale_lock(&config)?;

            let mut controller = FitController::new(config.clone())?;
            let _lock = JobLock::acquire(controller.config())?;
            let _monitor = ProgressMonitor::spawn(
                config.output_dir.clone(),
                config.log_path(),
                config.bootstrap,
            );

            let outcome = controller.resume(generations)?;
            println!(
                "best chi {} after {} generations ({:?})",
                outcome.best.score, outcome.generations_run, outcome.reason
            );
        }
        Commands::Results { conf } => {
            let config = load(&conf)?;
            let controller = FitController::new(config)?;
            let best = controller.results()?;
            println!("best chi {} (permutation {})", best.score, best.perm);
        }
    }

    Ok(())
}

fn load(conf: &PathBuf) -> FitResult<FitConfig> {
    let config = FitConfig::load(conf)?;
    if let Some(seed) = config.seed {
        random_provider::set_seed(seed);
    }
    Ok(config)
}

/// A leftover lock file usually means a crashed or still-running job; ask
/// before clobbering it.
fn confirm_stale_lock(config: &FitConfig) -> FitResult<()> {
    let lock = config.lock_path();
    if !lock.exists() {
        return Ok(());
    }

    print!(
        "Lock file {} exists; job {:?} may still be running. Remove it and continue? [y/N] ",
        lock.display(),
        config.job_name
    );
    std::io::stdout().flush().ok();

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    if answer.trim().eq_ignore_ascii_case("y") {
        std::fs::remove_file(&lock)?;
        return Ok(());
    }

    fit_bail!(Engine: "aborted: lock file {} left in place", lock.display())
}
