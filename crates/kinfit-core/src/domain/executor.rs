use super::thread_pool::{ThreadPool, WaitGroup};

/// Execution strategy for CPU-bound batches. The scorer runs one job per
/// permutation through this; the local run executor builds its worker pool
/// on the same [ThreadPool].
pub enum Executor {
    Serial,
    WorkerPool(ThreadPool),
}

impl Executor {
    pub fn serial() -> Self {
        Executor::Serial
    }

    pub fn worker_pool(num_workers: usize) -> Self {
        Executor::WorkerPool(ThreadPool::new(num_workers))
    }

    pub fn num_workers(&self) -> usize {
        match self {
            Executor::Serial => 1,
            Executor::WorkerPool(pool) => pool.num_workers(),
        }
    }

    /// Run every job and collect the results in submission order.
    pub fn execute_batch<F, R>(&self, jobs: Vec<F>) -> Vec<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        match self {
            Executor::Serial => jobs.into_iter().map(|job| job()).collect(),
            Executor::WorkerPool(pool) => {
                let wg = WaitGroup::new();
                let mut results = Vec::with_capacity(jobs.len());
                for job in jobs {
                    let guard = wg.guard();
                    let result = pool.submit_with_result(move || {
                        let res = job();
                        drop(guard);
                        res
                    });
                    results.push(result);
                }

                wg.wait();

                results.into_iter().map(|r| r.result()).collect()
            }
        }
    }

    /// Fire-and-forget submission; completion is observed elsewhere (for
    /// simulation tasks, through the sentinel files on disk).
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Executor::Serial => f(),
            Executor::WorkerPool(pool) => pool.submit(f),
        }
    }
}
