//! Deferred removal of session directories.

use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Schedules removal of a finished session directory.
///
/// Implementations must never surface a removal failure to the caller; the
/// build result has already been decided when removal runs.
pub trait CleanupScheduler: Debug + Send + Sync {
    fn schedule(&self, dir: PathBuf, delay: Duration) -> CleanupHandle;
}

/// Handle to one scheduled removal.
///
/// Dropping the handle leaves the removal running.
#[derive(Debug)]
pub struct CleanupHandle {
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A handle with no task behind it, for schedulers that track removals
    /// themselves.
    pub fn detached() -> Self {
        Self { task: None }
    }

    /// Wait until the removal has run (or was cancelled).
    pub async fn wait(self) {
        if let Some(task) = self.task {
            let _ = task.await;
        }
    }

    /// Abort the removal if it has not started yet.
    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

/// Removes directories from a tokio task after the delay.
///
/// Outside a runtime (a run future dropped after its runtime shut down) the
/// directory is removed at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCleanup;

impl CleanupScheduler for TokioCleanup {
    fn schedule(&self, dir: PathBuf, delay: Duration) -> CleanupHandle {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => CleanupHandle::from_task(runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                remove_session_dir(&dir).await;
            })),
            Err(_) => {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    if e.kind() != ErrorKind::NotFound {
                        warn!(dir = %dir.display(), error = %e, "unable to remove session directory");
                    }
                }
                CleanupHandle::detached()
            }
        }
    }
}

/// Recursively remove `dir`, logging instead of failing.
///
/// Returns `true` if the directory is gone afterwards.
pub async fn remove_session_dir(dir: &Path) -> bool {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!(dir = %dir.display(), "removed session directory");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "unable to remove session directory");
            false
        }
    }
}
