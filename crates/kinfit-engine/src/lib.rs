pub mod average;
pub mod bootstrap;
pub mod controller;
pub mod dispatch;
pub mod generation;
pub mod monitor;
pub mod simulator;
pub mod task;

pub use average::ReplicateAverager;
pub use bootstrap::BootstrapController;
pub use controller::{FitController, FitOutcome, JobLock, StatusLog, StopReason};
pub use dispatch::{
    BatchReport, ClusterDispatch, CommandProbe, Dispatch, LocalDispatch, Progress, QueueCounts,
    QueueProbe, await_batch,
};
pub use generation::{GenerationOutcome, GenerationRunner};
pub use monitor::ProgressMonitor;
pub use simulator::Simulator;
pub use task::{SimTask, TaskStatus};

pub use kinfit_breed::*;
pub use kinfit_core::*;
pub use kinfit_error::{FitError, FitResult, ensure, fit_err};

pub fn init_logging() {
    use std::sync::Once;
    static INIT_LOGGING: Once = Once::new();

    INIT_LOGGING.call_once(|| {
        use tracing_subscriber::fmt::format::FmtSpan;
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        std::panic::set_hook(Box::new(|info| {
            tracing::error!("PANIC: {}", info);
        }));

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .with_target(false)
                    .with_level(true)
                    .compact(),
            )
            .init();
    });
}
