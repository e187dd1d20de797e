use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

const STDERR_TAIL_LINES: usize = 32;
const STOP_WAIT: Duration = Duration::from_secs(2);

pub type ProcessResult<T> = Result<T, ProcessError>;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn encoder {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Starting,
    Active,
    Stopped,
    Failed,
}

impl HandleStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, HandleStatus::Starting | HandleStatus::Active)
    }
}

/// Reference to a live encoder process. The process itself stays owned by
/// the manager; the handle only carries identity, status, and recent
/// stderr for diagnostics.
#[derive(Debug, Clone)]
pub struct TranscodeHandle {
    id: Uuid,
    status: Arc<StdMutex<HandleStatus>>,
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,
}

impl TranscodeHandle {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: Arc::new(StdMutex::new(HandleStatus::Starting)),
            stderr_tail: Arc::new(StdMutex::new(VecDeque::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> HandleStatus {
        *self.status.lock().unwrap()
    }

    /// Recent stderr lines from the encoder, oldest first.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().unwrap().iter().cloned().collect()
    }

    fn set_status(&self, status: HandleStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Terminal states stick: a stop after a failure must not mask it.
    fn settle(&self, status: HandleStatus) {
        let mut current = self.status.lock().unwrap();
        if current.is_live() {
            *current = status;
        }
    }

    fn push_stderr(&self, line: String) {
        let mut tail = self.stderr_tail.lock().unwrap();
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

struct ManagedProcess {
    child: Child,
    // Held for the process lifetime so global transcode capacity frees
    // exactly when the process goes away, on any exit path.
    _permit: Option<OwnedSemaphorePermit>,
}

/// Owns every encoder OS process and is the only component allowed to
/// terminate one. Exits are observed by a per-process monitor task; a
/// non-zero status is recorded on the handle as `Failed` rather than
/// surfaced as an error.
pub struct ProcessManager {
    procs: Arc<Mutex<HashMap<Uuid, ManagedProcess>>>,
    monitor_interval: Duration,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            procs: Arc::new(Mutex::new(HashMap::new())),
            monitor_interval: Duration::from_millis(200),
        }
    }

    pub fn with_monitor_interval(mut self, monitor_interval: Duration) -> Self {
        self.monitor_interval = monitor_interval;
        self
    }

    pub async fn start(
        &self,
        program: &Path,
        args: &[String],
        working_dir: &Path,
        permit: Option<OwnedSemaphorePermit>,
    ) -> ProcessResult<TranscodeHandle> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

        let handle = TranscodeHandle::new();
        if let Some(stderr) = child.stderr.take() {
            let reader_handle = handle.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(process = %reader_handle.id(), "{line}");
                    reader_handle.push_stderr(line);
                }
            });
        }

        self.procs.lock().await.insert(
            handle.id,
            ManagedProcess {
                child,
                _permit: permit,
            },
        );
        handle.set_status(HandleStatus::Active);
        self.spawn_monitor(handle.clone());
        debug!(process = %handle.id(), program = %program.display(), "encoder process started");
        Ok(handle)
    }

    /// Stops the process behind the handle. Idempotent: a handle whose
    /// process already exited (or was never registered) is a no-op.
    pub async fn stop(&self, handle: &TranscodeHandle) {
        let entry = self.procs.lock().await.remove(&handle.id);
        if let Some(mut entry) = entry {
            let _ = entry.child.start_kill();
            if timeout(STOP_WAIT, entry.child.wait()).await.is_err() {
                warn!(process = %handle.id(), "encoder did not exit within stop window");
            }
        }
        handle.settle(HandleStatus::Stopped);
    }

    pub async fn is_alive(&self, handle: &TranscodeHandle) -> bool {
        self.procs.lock().await.contains_key(&handle.id) && handle.status().is_live()
    }

    pub async fn active_count(&self) -> usize {
        self.procs.lock().await.len()
    }

    fn spawn_monitor(&self, handle: TranscodeHandle) {
        let procs = Arc::clone(&self.procs);
        let interval = self.monitor_interval;
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let mut map = procs.lock().await;
                let Some(entry) = map.get_mut(&handle.id) else {
                    // Stopped externally; status already settled.
                    break;
                };
                match entry.child.try_wait() {
                    Ok(Some(status)) if status.success() => {
                        handle.settle(HandleStatus::Stopped);
                        map.remove(&handle.id);
                        break;
                    }
                    Ok(Some(status)) => {
                        warn!(
                            process = %handle.id(),
                            status = status.code(),
                            stderr = handle.stderr_tail().join(" | "),
                            "encoder exited with failure"
                        );
                        handle.set_status(HandleStatus::Failed);
                        map.remove(&handle.id);
                        break;
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(process = %handle.id(), %error, "failed to poll encoder process");
                        handle.set_status(HandleStatus::Failed);
                        map.remove(&handle.id);
                        break;
                    }
                }
            }
        });
    }
}
