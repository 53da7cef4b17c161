use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Detached observer of a running job: polls the output tree for the
/// terminal Results directory (or the last `Results_<i>` under bootstrap)
/// and streams new bytes of the job log to stdout as they appear. It shares
/// no state with the fit beyond the filesystem and dies with its parent.
pub struct ProgressMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    pub fn spawn(output_dir: PathBuf, log_path: PathBuf, bootstrap: usize) -> ProgressMonitor {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            let terminal_dir = if bootstrap > 0 {
                output_dir.join(format!("Results_{}", bootstrap))
            } else {
                output_dir.join("Results")
            };

            let mut offset = 0u64;
            loop {
                offset = drain_log(&log_path, offset);

                if terminal_dir.is_dir() {
                    // One last drain so nothing written at shutdown is lost.
                    drain_log(&log_path, offset);
                    break;
                }
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        });

        ProgressMonitor {
            stop,
            handle: Some(handle),
        }
    }
}

/// Emit any bytes past `offset` and return the new offset. A missing or
/// shrunken log is treated as empty rather than an error.
fn drain_log(path: &PathBuf, offset: u64) -> u64 {
    let Ok(mut file) = std::fs::File::open(path) else {
        return offset;
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    if len <= offset {
        return if len < offset { 0 } else { offset };
    }

    if file.seek(SeekFrom::Start(offset)).is_err() {
        return offset;
    }
    let mut chunk = String::new();
    if file.read_to_string(&mut chunk).is_err() {
        return offset;
    }
    print!("{}", chunk);
    len
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
