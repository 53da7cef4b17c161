use std::path::{Path, PathBuf};

/// Lifecycle of one simulation task. `TimedOut` is terminal like `Failed`;
/// the two are distinguished so the log can say which it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Finished,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::TimedOut
        )
    }
}

/// One simulator invocation: a (permutation, replicate) pair. The task name
/// carries both indices, which keeps every output path unique and lets the
/// scorer restore permutation order from filenames.
#[derive(Debug, Clone)]
pub struct SimTask {
    pub name: String,
    pub perm: usize,
    pub replicate: usize,
    pub model_file: PathBuf,
    /// Where the simulator writes its tabular outputs.
    pub outdir: PathBuf,
    /// Where the `.finished`/`.failed` sentinels live (the generation dir).
    pub sentinel_dir: PathBuf,
}

impl SimTask {
    pub fn task_name(stem: &str, perm: usize, replicate: usize) -> String {
        format!("{}_perm{}_rep{}", stem, perm, replicate)
    }

    pub fn finished_path(&self) -> PathBuf {
        self.sentinel_dir.join(format!("{}.finished", self.name))
    }

    pub fn failed_path(&self) -> PathBuf {
        self.sentinel_dir.join(format!("{}.failed", self.name))
    }

    /// Captured simulator stdout/stderr.
    pub fn console_path(&self) -> PathBuf {
        self.outdir.join(format!("{}.BNG_OUT", self.name))
    }

    /// Terminal status recorded on disk, if any. The sentinels are the single
    /// source of truth for task state across processes.
    pub fn sentinel_status(&self) -> Option<TaskStatus> {
        if self.finished_path().is_file() {
            Some(TaskStatus::Finished)
        } else if self.failed_path().is_file() {
            Some(TaskStatus::Failed)
        } else {
            None
        }
    }
}

/// Create an empty sentinel file. Sentinel creation is the commit point of a
/// task's terminal state, so errors here must not be silent; the caller maps
/// them into the batch report.
pub fn touch(path: &Path) -> std::io::Result<()> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn task(dir: &Path) -> SimTask {
        SimTask {
            name: SimTask::task_name("model", 3, 1),
            perm: 3,
            replicate: 1,
            model_file: dir.join("model_perm3.bngl"),
            outdir: dir.to_path_buf(),
            sentinel_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn task_names_carry_both_indices() {
        assert_eq!(SimTask::task_name("model", 3, 2), "model_perm3_rep2");
    }

    #[test]
    fn sentinels_decide_status() {
        let dir = TempDir::new().unwrap();
        let task = task(dir.path());

        assert_eq!(task.sentinel_status(), None);
        touch(&task.failed_path()).unwrap();
        assert_eq!(task.sentinel_status(), Some(TaskStatus::Failed));

        // A finished sentinel wins over a stale failed one.
        touch(&task.finished_path()).unwrap();
        assert_eq!(task.sentinel_status(), Some(TaskStatus::Finished));
    }

    #[test]
    fn touch_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.finished");
        touch(&path).unwrap();
        touch(&path).unwrap();
        assert!(path.is_file());
    }
}
