//! Run triggering
//!
//! A harvest runs as a spawned job guarded by a sentinel lock file, so a second
//! trigger while one is active is refused instead of starting a parallel run.

use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::application::orchestrator::{HarvestError, RunOrchestrator};
use crate::domain::run_state::RunSummary;
use crate::infrastructure::browser::{BrowserResult, BrowserSession};

/// Contents of the lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub run_id: Uuid,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Held for the lifetime of a run; dropping it removes the lock file
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    info: LockInfo,
}

impl RunLock {
    /// Creates the lock file atomically. `Ok(None)` when another run holds it.
    pub fn acquire(path: &Path, run_id: Uuid) -> Result<Option<Self>, HarvestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let lock = Self {
            path: path.to_path_buf(),
            info: LockInfo {
                run_id,
                pid: std::process::id(),
                started_at: Utc::now(),
            },
        };
        serde_json::to_writer_pretty(file, &lock.info).map_err(std::io::Error::from)?;
        Ok(Some(lock))
    }

    /// Who holds the lock at `path`, if it is readable
    pub fn holder(path: &Path) -> Option<LockInfo> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove run lock {:?}: {}", self.path, e);
        }
    }
}

pub enum TriggerOutcome {
    Started(RunHandle),
    AlreadyRunning,
}

/// A spawned harvest
pub struct RunHandle {
    run_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<Result<RunSummary, HarvestError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Asks the run to stop at its next cell or entity boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<RunSummary, HarvestError> {
        self.task.await.map_err(|e| HarvestError::Task(e.to_string()))?
    }
}

/// Starts `orchestrator` on a new task unless the lock at `lock_path` is held.
/// The browser is opened inside the task and closed when the run ends.
pub fn trigger<F, Fut, B>(
    orchestrator: RunOrchestrator,
    lock_path: &Path,
    open_session: F,
) -> Result<TriggerOutcome, HarvestError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = BrowserResult<B>> + Send + 'static,
    B: BrowserSession + 'static,
{
    let run_id = Uuid::new_v4();
    let Some(lock) = RunLock::acquire(lock_path, run_id)? else {
        match RunLock::holder(lock_path) {
            Some(holder) => info!(
                "Harvest already running (run {}, pid {}, since {})",
                holder.run_id,
                holder.pid,
                holder.started_at.to_rfc3339()
            ),
            None => info!("Harvest already running (lock {:?})", lock_path),
        }
        return Ok(TriggerOutcome::AlreadyRunning);
    };

    let cancel = orchestrator.cancellation_token();
    let span = info_span!("harvest", run_id = %run_id);
    let task = tokio::spawn(
        async move {
            let _lock = lock;
            let mut session = open_session().await?;
            let result = orchestrator.run(&mut session).await;
            if let Err(e) = session.close().await {
                warn!("Browser close failed: {}", e);
            }
            result
        }
        .instrument(span),
    );

    info!("Harvest {} started", run_id);
    Ok(TriggerOutcome::Started(RunHandle { run_id, cancel, task }))
}
