use std::sync::Arc;

use shared::domain::{EntryId, UploadTaskId};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    task::{TransitionError, UploadTask},
    CompletionPolicy, UploadFile, UploadFileInfo, UploadSettings,
};
use crate::LifelogApi;

#[derive(Debug, Clone)]
pub enum UploadEvent {
    TaskAdded(UploadTask),
    TaskUpdated(UploadTask),
    TaskRemoved(UploadTaskId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("file is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("unsupported file type")]
    UnsupportedType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFile {
    pub name: String,
    pub reason: RejectReason,
}

#[derive(Debug)]
pub struct BatchAcceptance {
    pub accepted: Vec<UploadTaskId>,
    pub rejected: Vec<RejectedFile>,
    driver: Option<JoinHandle<()>>,
}

impl BatchAcceptance {
    /// Waits until every upload call in the batch has resolved. Completion
    /// watchers may still be running afterwards.
    pub async fn uploads_issued(self) {
        if let Some(driver) = self.driver {
            let _ = driver.await;
        }
    }
}

struct TrackedTask {
    task: UploadTask,
    cancel: CancellationToken,
}

struct PendingUpload {
    id: UploadTaskId,
    file: UploadFile,
    cancel: CancellationToken,
}

/// Tracks every accepted file from upload to completion.
pub struct UploadOrchestrator {
    api: Arc<dyn LifelogApi>,
    settings: UploadSettings,
    tasks: Mutex<Vec<TrackedTask>>,
    events: broadcast::Sender<UploadEvent>,
}

impl UploadOrchestrator {
    pub fn new(api: Arc<dyn LifelogApi>, settings: UploadSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            api,
            settings,
            tasks: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the visible tasks in acceptance order.
    pub async fn tasks(&self) -> Vec<UploadTask> {
        self.tasks
            .lock()
            .await
            .iter()
            .map(|tracked| tracked.task.clone())
            .collect()
    }

    pub async fn task(&self, id: UploadTaskId) -> Option<UploadTask> {
        self.tasks
            .lock()
            .await
            .iter()
            .find(|tracked| tracked.task.id == id)
            .map(|tracked| tracked.task.clone())
    }

    fn validate(&self, file: &UploadFile) -> Result<(), RejectReason> {
        if file.size() > self.settings.max_file_size_bytes {
            return Err(RejectReason::TooLarge {
                size: file.size(),
                limit: self.settings.max_file_size_bytes,
            });
        }
        if file.entry_type().is_none() {
            return Err(RejectReason::UnsupportedType);
        }
        Ok(())
    }

    /// Accepts a batch of files. Each valid file becomes an `Uploading` task
    /// at 0% before this returns; uploads are then issued one after another
    /// in acceptance order.
    pub async fn accept(self: &Arc<Self>, files: Vec<UploadFile>) -> BatchAcceptance {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut pending = Vec::new();
        let mut added = Vec::new();

        {
            let mut tasks = self.tasks.lock().await;
            for file in files {
                if let Err(reason) = self.validate(&file) {
                    info!(file = %file.name, "upload: rejected file: {reason}");
                    rejected.push(RejectedFile {
                        name: file.name,
                        reason,
                    });
                    continue;
                }

                let id = UploadTaskId::new();
                let task = UploadTask::new(id, UploadFileInfo::from(&file));
                let cancel = CancellationToken::new();
                added.push(task.clone());
                tasks.push(TrackedTask {
                    task,
                    cancel: cancel.clone(),
                });
                accepted.push(id);
                pending.push(PendingUpload { id, file, cancel });
            }
        }

        for task in added {
            let _ = self.events.send(UploadEvent::TaskAdded(task));
        }

        let driver = if pending.is_empty() {
            None
        } else {
            let orchestrator = Arc::clone(self);
            Some(tokio::spawn(async move {
                orchestrator.run_batch(pending).await;
            }))
        };

        BatchAcceptance {
            accepted,
            rejected,
            driver,
        }
    }

    /// Drops a task from the visible list and stops its outstanding work.
    /// Purely local: nothing is sent to the service.
    pub async fn remove(&self, id: UploadTaskId) -> bool {
        let removed = {
            let mut tasks = self.tasks.lock().await;
            tasks
                .iter()
                .position(|tracked| tracked.task.id == id)
                .map(|index| tasks.remove(index))
        };

        let Some(removed) = removed else {
            return false;
        };
        removed.cancel.cancel();
        debug!(task_id = %id, "upload: task removed");
        let _ = self.events.send(UploadEvent::TaskRemoved(id));
        true
    }

    /// Resolves once no visible task is `Uploading` or `Processing`.
    pub async fn wait_until_settled(&self) {
        let mut events = self.events.subscribe();
        loop {
            let settled = self
                .tasks
                .lock()
                .await
                .iter()
                .all(|tracked| tracked.task.status.is_terminal());
            if settled {
                return;
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Applies `change` to a live task and broadcasts the result when it
    /// reports a visible change. Returns false when the task is gone or the
    /// transition was refused.
    async fn apply<F>(&self, id: UploadTaskId, change: F) -> bool
    where
        F: FnOnce(&mut UploadTask) -> Result<bool, TransitionError>,
    {
        let updated = {
            let mut tasks = self.tasks.lock().await;
            let Some(tracked) = tasks.iter_mut().find(|tracked| tracked.task.id == id) else {
                return false;
            };
            match change(&mut tracked.task) {
                Ok(true) => tracked.task.clone(),
                Ok(false) => return true,
                Err(err) => {
                    debug!(task_id = %id, "upload: {err}");
                    return false;
                }
            }
        };
        let _ = self.events.send(UploadEvent::TaskUpdated(updated));
        true
    }

    async fn run_batch(self: Arc<Self>, batch: Vec<PendingUpload>) {
        for pending in batch {
            if pending.cancel.is_cancelled() {
                debug!(task_id = %pending.id, "upload: skipping removed task");
                continue;
            }
            self.upload_one(pending).await;
        }
    }

    async fn upload_one(self: &Arc<Self>, pending: PendingUpload) {
        let PendingUpload { id, file, cancel } = pending;

        let stop_ticks = cancel.child_token();
        let ticker = self.spawn_progress_ticker(id, stop_ticks.clone());

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.api.upload_file(&file) => Some(result),
        };
        stop_ticks.cancel();
        let _ = ticker.await;

        let Some(result) = result else {
            debug!(task_id = %id, "upload: task removed while uploading, request dropped");
            return;
        };

        match result {
            Ok(response) => {
                let remote_id = response.id.clone();
                let applied = self
                    .apply(id, |task| task.mark_processing(&response).map(|()| true))
                    .await;
                if !applied {
                    return;
                }
                info!(task_id = %id, file = %file.name, entry_id = %remote_id, "upload: accepted by service");
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move {
                    orchestrator.watch_completion(id, remote_id, cancel).await;
                });
            }
            Err(err) => {
                warn!(task_id = %id, file = %file.name, "upload: failed: {err}");
                let message = err.to_string();
                self.apply(id, move |task| task.mark_failed(message).map(|()| true))
                    .await;
            }
        }
    }

    fn spawn_progress_ticker(
        self: &Arc<Self>,
        id: UploadTaskId,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let tick = self.settings.progress_tick;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = sleep(tick) => {
                        if !orchestrator.apply(id, UploadTask::tick).await {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn watch_completion(&self, id: UploadTaskId, remote_id: EntryId, cancel: CancellationToken) {
        match self.settings.completion {
            CompletionPolicy::FixedDelay(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(delay) => {}
                }
            }
            CompletionPolicy::PollStatus {
                interval,
                max_attempts,
            } => {
                let mut attempts = 0;
                loop {
                    if attempts >= max_attempts {
                        warn!(
                            task_id = %id,
                            entry_id = %remote_id,
                            attempts,
                            "upload: processing not confirmed, completing unconfirmed"
                        );
                        break;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = sleep(interval) => {}
                    }
                    attempts += 1;

                    let polled = tokio::select! {
                        _ = cancel.cancelled() => return,
                        polled = self.api.get_upload_entry(&remote_id) => polled,
                    };
                    match polled {
                        Ok(entry) if entry.processed => break,
                        Ok(_) => debug!(task_id = %id, attempts, "upload: still processing"),
                        Err(err) => {
                            debug!(task_id = %id, attempts, "upload: status poll failed: {err}")
                        }
                    }
                }
            }
        }

        if self.apply(id, |task| task.mark_completed().map(|()| true)).await {
            info!(task_id = %id, entry_id = %remote_id, "upload: processing completed");
        }
    }
}

#[cfg(test)]
#[path = "../tests/upload_tests.rs"]
mod tests;
