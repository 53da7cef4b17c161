use super::{BatchReport, Dispatch, Progress};
use crate::simulator::Simulator;
use crate::task::{SimTask, TaskStatus, touch};
use kinfit_core::{ClusterConfig, SchedulerKind};
use kinfit_error::{FitResult, fit_bail, fit_err};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Queued/running totals reported by the scheduler for the submitting user.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCounts {
    pub queued: usize,
    pub running: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running
    }
}

/// Scheduler-queue observation, a seam so tests can stand in for `qstat`.
pub trait QueueProbe: Send {
    fn counts(&self) -> FitResult<QueueCounts>;
}

/// Probes the real scheduler queue by running its status command and
/// counting state tokens (Q for torque, qw for SGE, PD for slurm).
pub struct CommandProbe {
    kind: SchedulerKind,
}

impl CommandProbe {
    pub fn new(kind: SchedulerKind) -> Self {
        CommandProbe { kind }
    }

    fn status_command(&self) -> Command {
        match self.kind {
            SchedulerKind::Torque | SchedulerKind::Sge => Command::new("qstat"),
            SchedulerKind::Slurm => {
                let mut command = Command::new("squeue");
                command.args(["-h", "-o", "%t"]);
                command
            }
        }
    }

    fn queued_token(&self) -> &'static str {
        match self.kind {
            SchedulerKind::Torque => " Q ",
            SchedulerKind::Sge => " qw ",
            SchedulerKind::Slurm => "PD",
        }
    }

    fn running_token(&self) -> &'static str {
        match self.kind {
            SchedulerKind::Torque => " R ",
            SchedulerKind::Sge => " r ",
            SchedulerKind::Slurm => "R",
        }
    }
}

impl QueueProbe for CommandProbe {
    fn counts(&self) -> FitResult<QueueCounts> {
        let output = self
            .status_command()
            .output()
            .map_err(|e| fit_err!(Cluster: "cannot query scheduler queue: {}", e))?;
        let text = String::from_utf8_lossy(&output.stdout);

        let mut counts = QueueCounts::default();
        for line in text.lines() {
            if line.contains(self.queued_token()) {
                counts.queued += 1;
            } else if line.contains(self.running_token()) {
                counts.running += 1;
            }
        }
        Ok(counts)
    }
}

struct TrackedTask {
    task: SimTask,
    deadline: Duration,
    status: TaskStatus,
}

/// Cluster run executor. Permutations are packed into chunks of
/// `cluster_parallel × multisim` tasks; each chunk becomes one batch job
/// whose script chains the simulator invocations with `&&` and compensates
/// any missed task with a `touch <name>.failed`. The dispatcher then only
/// polls sentinels; walltime is the scheduler's business, and per-task
/// deadlines stretch while the queue still holds waiting jobs so queueing
/// never eats walltime budget.
pub struct ClusterDispatch {
    simulator: Simulator,
    config: ClusterConfig,
    walltime: Duration,
    probe: Box<dyn QueueProbe>,
    tasks: Vec<TrackedTask>,
    submitted_at: Option<Instant>,
    last_extension: Option<Instant>,
}

impl ClusterDispatch {
    pub fn new(
        simulator: Simulator,
        config: ClusterConfig,
        walltime: Duration,
        probe: Box<dyn QueueProbe>,
    ) -> Self {
        ClusterDispatch {
            simulator,
            config,
            walltime,
            probe,
            tasks: Vec::new(),
            submitted_at: None,
            last_extension: None,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.config.cluster_parallel * self.config.multisim
    }

    /// The chunk script: every invocation that succeeds touches its own
    /// `.finished`; if the chain breaks, the trailing loop fails every task
    /// that never finished.
    fn chunk_script(&self, chunk: &[SimTask]) -> String {
        let mut script = String::from("#!/bin/sh\n");

        let mut chain = Vec::with_capacity(chunk.len());
        for task in chunk {
            chain.push(format!(
                "{} > {} 2>&1 && touch {}",
                self.simulator.shell_invocation(&task.model_file, &task.outdir),
                task.console_path().display(),
                task.finished_path().display()
            ));
        }
        let _ = writeln!(script, "{}", chain.join(" && "));

        script.push_str("for f in");
        for task in chunk {
            let _ = write!(script, " {}", task.sentinel_dir.join(&task.name).display());
        }
        script.push('\n');
        script.push_str("do [ -e \"$f.finished\" ] || touch \"$f.failed\"\ndone\n");
        script
    }

    fn submit_command(&self, script: &PathBuf) -> Command {
        match self.config.scheduler {
            SchedulerKind::Torque | SchedulerKind::Sge => {
                let mut command = Command::new("qsub");
                command.arg(script);
                command
            }
            SchedulerKind::Slurm => {
                let mut command = Command::new("sbatch");
                command.arg(script);
                command
            }
        }
    }
}

impl Dispatch for ClusterDispatch {
    fn dispatch(&mut self, batch: Vec<SimTask>) -> FitResult<()> {
        if self.submitted_at.is_some() {
            fit_bail!(Engine: "cluster dispatcher is one-shot; build a new one per batch");
        }

        // Quota check before any work leaves this process.
        if let Some(limit) = self.config.job_limit {
            let counts = self.probe.counts()?;
            if counts.total() > limit {
                fit_bail!(
                    Cluster: "{} jobs queued or running exceeds job_limit {}",
                    counts.total(),
                    limit
                );
            }
        }

        let chunk_size = self.chunk_size().max(1);
        for (index, chunk) in batch.chunks(chunk_size).enumerate() {
            let script_path = chunk[0].sentinel_dir.join(format!("chunk{}.sh", index));
            std::fs::write(&script_path, self.chunk_script(chunk))?;

            let output = self
                .submit_command(&script_path)
                .output()
                .map_err(|e| fit_err!(Cluster: "cannot submit chunk {}: {}", index, e))?;
            if !output.status.success() {
                fit_bail!(
                    Cluster: "chunk {} submission failed: {}",
                    index,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }

            let job_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            info!("submitted chunk {} as job {:?}", index, job_id);
        }

        self.tasks = batch
            .into_iter()
            .map(|task| TrackedTask {
                task,
                deadline: self.walltime,
                status: TaskStatus::Queued,
            })
            .collect();
        self.submitted_at = Some(Instant::now());
        self.last_extension = Some(Instant::now());
        Ok(())
    }

    fn poll(&mut self) -> FitResult<Progress> {
        let submitted_at = self
            .submitted_at
            .ok_or_else(|| fit_err!(Engine: "poll before dispatch"))?;

        // While the scheduler still holds queued chunks, stretch every
        // pending deadline by the time since the last poll.
        let counts = self.probe.counts().unwrap_or_default();
        if counts.queued > 0
            && let Some(last) = self.last_extension
        {
            let elapsed = last.elapsed();
            for tracked in self.tasks.iter_mut() {
                if !tracked.status.is_terminal() {
                    tracked.deadline += elapsed;
                }
            }
            debug!(
                "{} chunks still queued; deadlines extended by {:?}",
                counts.queued, elapsed
            );
        }
        self.last_extension = Some(Instant::now());

        for tracked in self.tasks.iter_mut() {
            if tracked.status.is_terminal() {
                continue;
            }
            match tracked.task.sentinel_status() {
                Some(status) => tracked.status = status,
                None => {
                    if submitted_at.elapsed() > tracked.deadline {
                        warn!(
                            "task {} saw no sentinel within {:?}; marking failed",
                            tracked.task.name, tracked.deadline
                        );
                        touch(&tracked.task.failed_path())?;
                        tracked.status = TaskStatus::TimedOut;
                    }
                }
            }
        }

        let total = self.tasks.len();
        let terminal = self
            .tasks
            .iter()
            .filter(|t| t.status.is_terminal())
            .count();

        if terminal == total {
            Ok(Progress::Done(BatchReport {
                statuses: self
                    .tasks
                    .iter()
                    .map(|t| (t.task.name.clone(), t.status))
                    .collect(),
            }))
        } else {
            Ok(Progress::Pending {
                finished: terminal,
                total,
            })
        }
    }
}
