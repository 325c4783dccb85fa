//! Single-slot model download coordinator.
//!
//! At most one [`DownloadJob`] exists process-wide.  The job moves through
//! `starting -> downloading -> {completed | error | cancelled}` and, once
//! terminal, stays visible for the retention window before the slot returns
//! to idle.  Every change is published on a watch channel so clients can
//! follow it over SSE instead of polling.
//!
//! Each job carries a generation number.  Callbacks and timers from an older
//! generation find a newer one in the slot and do nothing.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use strum::AsRefStr;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServerError;
use crate::runtime::PullProgress;
use crate::services::registry::ModelRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DownloadStatus {
    Starting,
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub id: String,
    pub model_name: String,
    pub status: DownloadStatus,
    /// 0–100, never decreasing while the job is live.
    pub progress: u8,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    job: Option<DownloadJob>,
    abort: Option<AbortHandle>,
    generation: u64,
}

struct Shared {
    slot: Mutex<Slot>,
    events: watch::Sender<Option<DownloadJob>>,
    retention: Duration,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Slot>, ServerError> {
        self.slot
            .lock()
            .map_err(|_| ServerError::Internal("download slot poisoned".into()))
    }

    fn publish(&self, job: Option<DownloadJob>) {
        self.events.send_replace(job);
    }

    /// Mutate the live job of `generation`; stale or terminal jobs are left alone.
    fn apply(&self, generation: u64, mutate: impl FnOnce(&mut DownloadJob)) {
        let Ok(mut slot) = self.slot.lock() else { return };
        if slot.generation != generation {
            return;
        }
        let Some(job) = slot.job.as_mut() else { return };
        if job.status.is_terminal() {
            return;
        }
        mutate(job);
        job.updated_at = Utc::now();
        let snapshot = job.clone();
        self.publish(Some(snapshot));
    }

    /// Move the job of `generation` to a terminal state and schedule its removal.
    fn finish(self: &Arc<Self>, generation: u64, status: DownloadStatus, message: String) {
        let settled = match self.slot.lock() {
            Ok(mut slot) => self.settle(&mut slot, generation, status, message).is_some(),
            Err(_) => false,
        };
        if settled {
            self.schedule_clear(generation);
        }
    }

    /// Terminal transition on an already locked slot.  Returns the settled
    /// job, or `None` when the job is stale or already terminal.
    fn settle(
        &self,
        slot: &mut Slot,
        generation: u64,
        status: DownloadStatus,
        message: String,
    ) -> Option<DownloadJob> {
        if slot.generation != generation {
            return None;
        }
        let job = slot.job.as_mut()?;
        if job.status.is_terminal() {
            return None;
        }
        job.status = status;
        if status == DownloadStatus::Completed {
            job.progress = 100;
        }
        job.message = message;
        job.updated_at = Utc::now();
        let snapshot = job.clone();
        slot.abort = None;
        self.publish(Some(snapshot.clone()));
        Some(snapshot)
    }

    fn schedule_clear(self: &Arc<Self>, generation: u64) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.retention).await;
            let Ok(mut slot) = shared.slot.lock() else { return };
            let expired = slot.generation == generation
                && slot.job.as_ref().is_some_and(|j| j.status.is_terminal());
            if expired {
                slot.job = None;
                shared.publish(None);
            }
        });
    }
}

#[derive(Clone)]
pub struct DownloadCoordinator {
    shared: Arc<Shared>,
    registry: ModelRegistry,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.progress().map(|j| j.status.as_ref().to_owned());
        write!(f, "DownloadCoordinator({})", status.as_deref().unwrap_or("idle"))
    }
}

impl DownloadCoordinator {
    pub fn new(registry: ModelRegistry, retention: Duration) -> Self {
        let (events, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::default()),
                events,
                retention,
            }),
            registry,
        }
    }

    /// Begin pulling `model_name` in the background.
    pub fn start(&self, model_name: &str) -> Result<DownloadJob, ServerError> {
        let model_name = model_name.trim().to_owned();
        if model_name.is_empty() {
            return Err(ServerError::Validation("model name is required".into()));
        }

        let mut slot = self.shared.lock()?;
        if slot.job.is_some() {
            return Err(ServerError::Conflict("a download is already in progress".into()));
        }
        slot.generation += 1;
        let generation = slot.generation;
        let now = Utc::now();
        let job = DownloadJob {
            id: Uuid::new_v4().to_string(),
            model_name: model_name.clone(),
            status: DownloadStatus::Starting,
            progress: 0,
            message: format!("Starting download of {model_name}"),
            started_at: now,
            updated_at: now,
        };
        slot.job = Some(job.clone());
        self.shared.publish(Some(job.clone()));

        let shared = Arc::clone(&self.shared);
        let registry = self.registry.clone();
        let handle = tokio::spawn(async move {
            let on_progress = |p: PullProgress| {
                shared.apply(generation, |job| {
                    job.status = DownloadStatus::Downloading;
                    match p.percent() {
                        Some(pct) => {
                            // 100 is reserved for the completed state.
                            job.progress = job.progress.max(pct.min(99));
                            job.message = format!("{} ({pct}%)", p.status);
                        }
                        None => job.message = p.status.clone(),
                    }
                });
            };
            match registry.pull(&model_name, &on_progress).await {
                Ok(()) => {
                    info!(model = %model_name, "model download completed");
                    shared.finish(
                        generation,
                        DownloadStatus::Completed,
                        format!("Successfully downloaded {model_name}"),
                    );
                }
                Err(e) => {
                    warn!(model = %model_name, error = %e, "model download failed");
                    shared.finish(
                        generation,
                        DownloadStatus::Error,
                        format!("Download failed: {e}"),
                    );
                }
            }
        });
        slot.abort = Some(handle.abort_handle());
        info!(model = %job.model_name, job_id = %job.id, "model download started");
        Ok(job)
    }

    /// Snapshot of the current job, `None` when idle.
    pub fn progress(&self) -> Option<DownloadJob> {
        self.shared.lock().ok().and_then(|slot| slot.job.clone())
    }

    /// Abort the live job.  The runtime may keep pulling in the background.
    ///
    /// The liveness check and the move to `cancelled` happen under one slot
    /// lock, so a pull finishing concurrently either wins outright (and this
    /// returns Conflict) or is ignored.
    pub fn cancel(&self) -> Result<DownloadJob, ServerError> {
        let mut slot = self.shared.lock()?;
        let job = slot
            .job
            .as_ref()
            .ok_or_else(|| ServerError::NotFound("no active download".into()))?;
        if job.status.is_terminal() {
            return Err(ServerError::Conflict(format!(
                "download of {} already {}",
                job.model_name,
                job.status.as_ref()
            )));
        }
        let model = job.model_name.clone();
        let generation = slot.generation;
        if let Some(abort) = slot.abort.take() {
            abort.abort();
        }
        let job = self
            .shared
            .settle(
                &mut slot,
                generation,
                DownloadStatus::Cancelled,
                format!("Download of {model} cancelled"),
            )
            .ok_or_else(|| ServerError::Internal("download vanished while cancelling".into()))?;
        drop(slot);

        self.shared.schedule_clear(generation);
        info!(model = %model, "model download cancelled");
        Ok(job)
    }

    /// Drop a finished job immediately instead of waiting out the retention window.
    pub fn reset(&self) -> Result<(), ServerError> {
        let mut slot = self.shared.lock()?;
        match &slot.job {
            None => Ok(()),
            Some(job) if !job.status.is_terminal() => Err(ServerError::Conflict(
                "cannot reset while a download is in progress".into(),
            )),
            Some(_) => {
                slot.job = None;
                self.shared.publish(None);
                Ok(())
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DownloadJob>> {
        self.shared.events.subscribe()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
