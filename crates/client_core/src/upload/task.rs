use shared::{
    domain::{EntryId, UploadTaskId},
    protocol::UploadResponse,
};
use thiserror::Error;

use super::UploadFileInfo;

pub const PROGRESS_STEP: u8 = 10;
/// Simulated progress never passes this value before the upload resolves.
pub const PROGRESS_CAP: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    Uploading,
    Processing,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Uploading => "Uploading...",
            Self::Processing => "Processing with AI...",
            Self::Completed => "Ready",
            Self::Error => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal upload transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: UploadStatus,
    pub to: UploadStatus,
}

/// Lifecycle record of one accepted file.
///
/// Legal paths are `Uploading -> Processing -> Completed` and
/// `Uploading -> Error`; every mutator rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub id: UploadTaskId,
    pub file: UploadFileInfo,
    pub status: UploadStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub remote_entry_id: Option<EntryId>,
    pub remote_task_id: Option<String>,
}

impl UploadTask {
    pub fn new(id: UploadTaskId, file: UploadFileInfo) -> Self {
        Self {
            id,
            file,
            status: UploadStatus::Uploading,
            progress: 0,
            error: None,
            remote_entry_id: None,
            remote_task_id: None,
        }
    }

    fn require(&self, expected: UploadStatus, to: UploadStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }

    /// One simulated-progress tick. Returns whether progress moved.
    pub fn tick(&mut self) -> Result<bool, TransitionError> {
        self.require(UploadStatus::Uploading, UploadStatus::Uploading)?;
        let next = self.progress.saturating_add(PROGRESS_STEP).min(PROGRESS_CAP);
        if next > self.progress {
            self.progress = next;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn mark_processing(&mut self, response: &UploadResponse) -> Result<(), TransitionError> {
        self.require(UploadStatus::Uploading, UploadStatus::Processing)?;
        self.status = UploadStatus::Processing;
        self.progress = 100;
        self.remote_entry_id = Some(response.id.clone());
        if self.remote_task_id.is_none() {
            self.remote_task_id = response.task_id.clone();
        }
        Ok(())
    }

    /// Progress is left at its last tick.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.require(UploadStatus::Uploading, UploadStatus::Error)?;
        let message = message.into();
        self.status = UploadStatus::Error;
        self.error = Some(if message.trim().is_empty() {
            "Upload failed".to_string()
        } else {
            message
        });
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), TransitionError> {
        self.require(UploadStatus::Processing, UploadStatus::Completed)?;
        self.status = UploadStatus::Completed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> UploadTask {
        UploadTask::new(
            UploadTaskId::new(),
            UploadFileInfo {
                name: "a.txt".into(),
                mime_type: "text/plain".into(),
                size_bytes: 3,
                entry_type: Some(shared::domain::EntryType::Text),
            },
        )
    }

    fn response(task_id: Option<&str>) -> UploadResponse {
        UploadResponse {
            id: EntryId::from("41"),
            message: "ok".into(),
            task_id: task_id.map(str::to_string),
        }
    }

    #[test]
    fn ticks_are_capped_and_monotonic() {
        let mut task = task();
        let mut seen = vec![task.progress];
        for _ in 0..15 {
            task.tick().expect("tick while uploading");
            seen.push(task.progress);
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(task.progress, PROGRESS_CAP);
        assert!(!task.tick().expect("tick at cap"));
    }

    #[test]
    fn success_path_reaches_completed() {
        let mut task = task();
        task.tick().expect("tick");
        task.mark_processing(&response(Some("celery-1")))
            .expect("processing");
        assert_eq!(task.progress, 100);
        assert_eq!(task.remote_task_id.as_deref(), Some("celery-1"));
        assert_eq!(task.remote_entry_id, Some(EntryId::from("41")));
        assert!(task.tick().is_err());

        task.mark_completed().expect("completed");
        assert!(task.status.is_terminal());
    }

    #[test]
    fn failure_keeps_last_progress() {
        let mut task = task();
        task.tick().expect("tick");
        task.tick().expect("tick");
        task.mark_failed("Upload failed: 500 Internal Server Error")
            .expect("error");
        assert_eq!(task.status, UploadStatus::Error);
        assert_eq!(task.progress, 20);
        assert_eq!(
            task.error.as_deref(),
            Some("Upload failed: 500 Internal Server Error")
        );
    }

    #[test]
    fn empty_failure_message_gets_default() {
        let mut task = task();
        task.mark_failed("  ").expect("error");
        assert_eq!(task.error.as_deref(), Some("Upload failed"));
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        let mut failed = task();
        failed.mark_failed("boom").expect("error");
        assert!(failed.tick().is_err());
        assert!(failed.mark_processing(&response(None)).is_err());
        assert!(failed.mark_completed().is_err());

        let mut done = task();
        done.mark_processing(&response(Some("t"))).expect("processing");
        done.mark_completed().expect("completed");
        assert!(done.mark_failed("late").is_err());
        assert!(done.mark_processing(&response(Some("other"))).is_err());
        assert_eq!(done.remote_task_id.as_deref(), Some("t"));
    }

    #[test]
    fn completion_requires_processing() {
        let mut task = task();
        let err = task.mark_completed().expect_err("uploading cannot complete");
        assert_eq!(err.from, UploadStatus::Uploading);
        assert_eq!(err.to, UploadStatus::Completed);
    }
}
