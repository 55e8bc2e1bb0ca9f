//! Upload lifecycle: per-file state machine, simulated progress, and
//! completion tracking.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use shared::domain::EntryType;

mod orchestrator;
mod task;

pub use orchestrator::{BatchAcceptance, RejectReason, RejectedFile, UploadEvent, UploadOrchestrator};
pub use task::{TransitionError, UploadStatus, UploadTask, PROGRESS_CAP, PROGRESS_STEP};

pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// How a task leaves `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Poll the entry until the service reports it processed. Running out of
    /// attempts completes the task unconfirmed.
    PollStatus {
        interval: Duration,
        max_attempts: u32,
    },
    /// Complete after a fixed delay with no server confirmation.
    FixedDelay(Duration),
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self::PollStatus {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub progress_tick: Duration,
    pub completion: CompletionPolicy,
    pub max_file_size_bytes: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            progress_tick: Duration::from_millis(200),
            completion: CompletionPolicy::default(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
        }
    }
}

/// A file offered for upload, with its bytes in memory.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            name,
            mime_type,
            bytes,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read upload file '{}'", path.display()))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("upload path has no file name: '{}'", path.display()))?;
        Ok(Self::new(name, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn entry_type(&self) -> Option<EntryType> {
        EntryType::from_file_name(&self.name)
    }
}

/// The file metadata a task keeps for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFileInfo {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub entry_type: Option<EntryType>,
}

impl From<&UploadFile> for UploadFileInfo {
    fn from(file: &UploadFile) -> Self {
        Self {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes: file.size(),
            entry_type: file.entry_type(),
        }
    }
}
