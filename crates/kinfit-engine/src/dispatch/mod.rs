pub mod cluster;
pub mod local;

pub use cluster::{ClusterDispatch, CommandProbe, QueueCounts, QueueProbe};
pub use local::LocalDispatch;

use crate::task::{SimTask, TaskStatus};
use kinfit_error::FitResult;
use std::time::Duration;

/// Where a dispatched batch stands. `poll` doubles as the walltime
/// supervisor: each call checks deadlines before counting sentinels.
#[derive(Debug, Clone)]
pub enum Progress {
    Pending { finished: usize, total: usize },
    Done(BatchReport),
}

/// Terminal statuses of every task in a batch, in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub statuses: Vec<(String, TaskStatus)>,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|(_, status)| !matches!(status, TaskStatus::Finished))
            .count()
    }
}

/// The run-executor seam: local worker pools and cluster schedulers both
/// implement this, so the generation controller never knows which one it is
/// driving. Dispatch is one-shot; a fresh dispatcher is built per batch.
pub trait Dispatch {
    fn dispatch(&mut self, batch: Vec<SimTask>) -> FitResult<()>;
    fn poll(&mut self) -> FitResult<Progress>;
}

/// Block until every task of the dispatched batch reaches a terminal state.
pub fn await_batch(
    dispatch: &mut dyn Dispatch,
    poll_interval: Duration,
) -> FitResult<BatchReport> {
    loop {
        match dispatch.poll()? {
            Progress::Done(report) => return Ok(report),
            Progress::Pending { .. } => std::thread::sleep(poll_interval),
        }
    }
}
