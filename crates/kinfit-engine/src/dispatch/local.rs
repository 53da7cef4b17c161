use super::{BatchReport, Dispatch, Progress};
use crate::simulator::Simulator;
use crate::task::{SimTask, TaskStatus, touch};
use kinfit_core::ThreadPool;
use kinfit_error::{FitResult, fit_bail};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a worker checks its child process for exit or cancellation.
const REAP_INTERVAL: Duration = Duration::from_millis(100);

struct Entry {
    task: SimTask,
    status: TaskStatus,
    started: Option<Instant>,
    deadline: Duration,
    cancel: Arc<AtomicBool>,
}

/// Local run executor: a fixed-width worker pool running one simulator
/// process per task. `poll` acts as the supervisor, flagging tasks past
/// their walltime; the owning worker then writes the `.failed` sentinel and
/// kills its child. At most one worker ever writes to a given output path
/// because task names embed the (permutation, replicate) pair.
pub struct LocalDispatch {
    simulator: Simulator,
    pool: ThreadPool,
    walltime: Duration,
    board: Arc<Mutex<Vec<Entry>>>,
    dispatched: bool,
}

impl LocalDispatch {
    pub fn new(simulator: Simulator, workers: usize, walltime: Duration) -> Self {
        LocalDispatch {
            simulator,
            pool: ThreadPool::new(workers),
            walltime,
            board: Arc::new(Mutex::new(Vec::new())),
            dispatched: false,
        }
    }

    fn submit(&self, index: usize, task: SimTask) {
        let board = Arc::clone(&self.board);
        let mut command = self.simulator.command(&task.model_file, &task.outdir);

        self.pool.submit(move || {
            let cancel = {
                let mut entries = board.lock().unwrap();
                let entry = &mut entries[index];
                entry.status = TaskStatus::Running;
                entry.started = Some(Instant::now());
                Arc::clone(&entry.cancel)
            };

            let console = std::fs::File::create(task.console_path());
            let mut child = match console
                .and_then(|log| {
                    let err_log = log.try_clone()?;
                    command
                        .stdin(Stdio::null())
                        .stdout(log)
                        .stderr(err_log)
                        .spawn()
                })
            {
                Ok(child) => child,
                Err(e) => {
                    warn!("task {}: cannot launch simulator: {}", task.name, e);
                    let _ = touch(&task.failed_path());
                    board.lock().unwrap()[index].status = TaskStatus::Failed;
                    return;
                }
            };

            let final_status = loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        if status.success() {
                            let _ = touch(&task.finished_path());
                            break TaskStatus::Finished;
                        }
                        let _ = touch(&task.failed_path());
                        break TaskStatus::Failed;
                    }
                    Ok(None) => {
                        if cancel.load(Ordering::Acquire) {
                            // Sentinel first, so observers see a terminal
                            // state before the process disappears.
                            let _ = touch(&task.failed_path());
                            let _ = child.kill();
                            let _ = child.wait();
                            break TaskStatus::TimedOut;
                        }
                        std::thread::sleep(REAP_INTERVAL);
                    }
                    Err(e) => {
                        warn!("task {}: wait failed: {}", task.name, e);
                        let _ = touch(&task.failed_path());
                        let _ = child.kill();
                        break TaskStatus::Failed;
                    }
                }
            };

            board.lock().unwrap()[index].status = final_status;
        });
    }
}

impl Dispatch for LocalDispatch {
    fn dispatch(&mut self, batch: Vec<SimTask>) -> FitResult<()> {
        if self.dispatched {
            fit_bail!(Engine: "local dispatcher is one-shot; build a new one per batch");
        }
        self.dispatched = true;

        {
            let mut board = self.board.lock().unwrap();
            for task in &batch {
                board.push(Entry {
                    task: task.clone(),
                    status: TaskStatus::Queued,
                    started: None,
                    deadline: self.walltime,
                    cancel: Arc::new(AtomicBool::new(false)),
                });
            }
        }

        for (index, task) in batch.into_iter().enumerate() {
            debug!("dispatching {} to local pool", task.name);
            self.submit(index, task);
        }
        Ok(())
    }

    fn poll(&mut self) -> FitResult<Progress> {
        let mut board = self.board.lock().unwrap();

        // Supervisor pass: flag running tasks past their walltime.
        for entry in board.iter_mut() {
            if entry.status == TaskStatus::Running
                && let Some(started) = entry.started
                && started.elapsed() > entry.deadline
                && !entry.cancel.swap(true, Ordering::AcqRel)
            {
                warn!(
                    "task {} exceeded walltime of {:?}",
                    entry.task.name, entry.deadline
                );
            }
        }

        let total = board.len();
        let terminal = board
            .iter()
            .filter(|entry| entry.status.is_terminal())
            .count();

        if terminal == total {
            Ok(Progress::Done(BatchReport {
                statuses: board
                    .iter()
                    .map(|entry| (entry.task.name.clone(), entry.status))
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
