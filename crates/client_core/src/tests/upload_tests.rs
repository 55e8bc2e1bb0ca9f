use std::time::Duration;

use super::*;
use crate::{
    error::GatewayError,
    test_support::{entry, FakeApi},
    upload::{UploadStatus, DEFAULT_MAX_FILE_SIZE_BYTES, PROGRESS_CAP},
};
use shared::{domain::EntryType, protocol::UploadResponse};

fn settings(completion: CompletionPolicy) -> UploadSettings {
    UploadSettings {
        progress_tick: Duration::from_millis(200),
        completion,
        max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
    }
}

fn fixed_delay() -> UploadSettings {
    settings(CompletionPolicy::FixedDelay(Duration::from_secs(3)))
}

fn accepted(id: &str) -> UploadResponse {
    UploadResponse {
        id: EntryId::from(id),
        message: "File uploaded successfully".into(),
        task_id: Some(format!("task-{id}")),
    }
}

fn rejected_upload() -> GatewayError {
    GatewayError::UploadRejected {
        status: 500,
        status_text: "Internal Server Error".into(),
        detail: None,
    }
}

fn drain(events: &mut broadcast::Receiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn mixed_batch_settles_success_and_failure_independently() {
    let api = Arc::new(FakeApi::default());
    api.uploads
        .push_after(Duration::from_millis(700), Ok(accepted("41")));
    api.uploads
        .push_after(Duration::from_millis(300), Err(rejected_upload()));
    let orchestrator = UploadOrchestrator::new(api.clone(), fixed_delay());

    let batch = orchestrator
        .accept(vec![
            UploadFile::new("A.txt", b"journal".to_vec()),
            UploadFile::new("B.jpg", vec![0xff, 0xd8]),
        ])
        .await;
    assert_eq!(batch.accepted.len(), 2);
    assert!(batch.rejected.is_empty());

    let tasks = orchestrator.tasks().await;
    assert_eq!(tasks.len(), 2);
    assert!(tasks
        .iter()
        .all(|task| task.status == UploadStatus::Uploading && task.progress == 0));
    let (a, b) = (batch.accepted[0], batch.accepted[1]);

    batch.uploads_issued().await;

    let task_a = orchestrator.task(a).await.expect("A tracked");
    assert_eq!(task_a.status, UploadStatus::Processing);
    assert_eq!(task_a.progress, 100);
    assert_eq!(task_a.remote_entry_id, Some(EntryId::from("41")));
    assert_eq!(task_a.remote_task_id.as_deref(), Some("task-41"));

    let task_b = orchestrator.task(b).await.expect("B tracked");
    assert_eq!(task_b.status, UploadStatus::Error);
    assert_eq!(
        task_b.error.as_deref(),
        Some("Upload failed: 500 Internal Server Error")
    );
    // One tick landed before the failure and the failure left it in place.
    assert_eq!(task_b.progress, 10);

    orchestrator.wait_until_settled().await;
    assert_eq!(
        orchestrator.task(a).await.expect("A tracked").status,
        UploadStatus::Completed
    );
    assert_eq!(
        orchestrator.task(b).await.expect("B tracked").status,
        UploadStatus::Error
    );
    assert_eq!(api.uploaded_names(), ["A.txt", "B.jpg"]);
}

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_and_capped_until_the_upload_resolves() {
    let api = Arc::new(FakeApi::default());
    api.uploads
        .push_after(Duration::from_secs(5), Ok(accepted("7")));
    let orchestrator = UploadOrchestrator::new(api.clone(), fixed_delay());
    let mut events = orchestrator.subscribe_events();

    let batch = orchestrator
        .accept(vec![UploadFile::new("voice.m4a", vec![1; 32])])
        .await;
    batch.uploads_issued().await;

    let mut progress = Vec::new();
    for event in drain(&mut events) {
        if let UploadEvent::TaskUpdated(task) = event {
            progress.push((task.status, task.progress));
        }
    }
    let (last, ticks) = progress.split_last().expect("updates were broadcast");
    assert_eq!(*last, (UploadStatus::Processing, 100));
    assert!(!ticks.is_empty());
    assert!(ticks
        .iter()
        .all(|(status, pct)| *status == UploadStatus::Uploading && *pct <= PROGRESS_CAP));
    assert!(ticks.windows(2).all(|w| w[0].1 < w[1].1));
    assert_eq!(ticks.last().map(|(_, pct)| *pct), Some(PROGRESS_CAP));
}

#[tokio::test(start_paused = true)]
async fn removing_an_uploading_task_stops_all_updates() {
    let api = Arc::new(FakeApi::default());
    api.uploads
        .push_after(Duration::from_secs(10), Ok(accepted("9")));
    let orchestrator = UploadOrchestrator::new(api.clone(), fixed_delay());

    let batch = orchestrator
        .accept(vec![UploadFile::new("notes.md", b"# notes".to_vec())])
        .await;
    let id = batch.accepted[0];
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut events = orchestrator.subscribe_events();
    assert!(orchestrator.remove(id).await);
    assert!(!orchestrator.remove(id).await);
    batch.uploads_issued().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], UploadEvent::TaskRemoved(removed) if removed == id));
    assert!(orchestrator.tasks().await.is_empty());
    assert_eq!(api.upload_entries.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn removing_a_processing_task_skips_completion() {
    let api = Arc::new(FakeApi::default());
    api.uploads.push(Ok(accepted("12")));
    let orchestrator = UploadOrchestrator::new(api.clone(), fixed_delay());

    let batch = orchestrator
        .accept(vec![UploadFile::new("photo.png", vec![0; 8])])
        .await;
    let id = batch.accepted[0];
    batch.uploads_issued().await;
    assert_eq!(
        orchestrator.task(id).await.expect("tracked").status,
        UploadStatus::Processing
    );

    let mut events = orchestrator.subscribe_events();
    assert!(orchestrator.remove(id).await);
    tokio::time::sleep(Duration::from_secs(10)).await;

    let seen = drain(&mut events);
    assert!(seen
        .iter()
        .all(|event| matches!(event, UploadEvent::TaskRemoved(_))));
    assert!(orchestrator.task(id).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn removed_tasks_later_in_the_batch_are_never_uploaded() {
    let api = Arc::new(FakeApi::default());
    api.uploads
        .push_after(Duration::from_secs(2), Ok(accepted("1")));
    api.uploads.push(Ok(accepted("2")));
    let orchestrator = UploadOrchestrator::new(api.clone(), fixed_delay());

    let batch = orchestrator
        .accept(vec![
            UploadFile::new("A.txt", b"a".to_vec()),
            UploadFile::new("B.txt", b"b".to_vec()),
        ])
        .await;
    assert!(orchestrator.remove(batch.accepted[1]).await);
    batch.uploads_issued().await;

    assert_eq!(api.uploaded_names(), ["A.txt"]);
    assert_eq!(orchestrator.tasks().await.len(), 1);
}

#[tokio::test]
async fn invalid_files_are_rejected_without_tasks() {
    let api = Arc::new(FakeApi::default());
    api.uploads.push(Ok(accepted("3")));
    let orchestrator = UploadOrchestrator::new(
        api.clone(),
        UploadSettings {
            max_file_size_bytes: 4,
            ..fixed_delay()
        },
    );

    let batch = orchestrator
        .accept(vec![
            UploadFile::new("big.wav", vec![0; 5]),
            UploadFile::new("report.pdf", vec![0; 2]),
            UploadFile::new("ok.txt", vec![0; 4]),
        ])
        .await;

    assert_eq!(batch.accepted.len(), 1);
    assert_eq!(
        batch.rejected,
        vec![
            RejectedFile {
                name: "big.wav".into(),
                reason: RejectReason::TooLarge { size: 5, limit: 4 },
            },
            RejectedFile {
                name: "report.pdf".into(),
                reason: RejectReason::UnsupportedType,
            },
        ]
    );
    let tasks = orchestrator.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].file.name, "ok.txt");
    assert_eq!(tasks[0].file.entry_type, Some(EntryType::Text));
}

#[tokio::test]
async fn empty_batch_issues_nothing() {
    let api = Arc::new(FakeApi::default());
    let orchestrator = UploadOrchestrator::new(api.clone(), fixed_delay());

    let batch = orchestrator
        .accept(vec![UploadFile::new("archive.zip", vec![1])])
        .await;
    assert!(batch.accepted.is_empty());
    batch.uploads_issued().await;
    orchestrator.wait_until_settled().await;
    assert_eq!(api.uploads.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn poll_policy_completes_once_the_entry_is_processed() {
    let api = Arc::new(FakeApi::default());
    api.uploads.push(Ok(accepted("20")));
    let mut pending = entry("20", "Voice memo", EntryType::Audio);
    pending.processed = false;
    let mut done = pending.clone();
    done.processed = true;
    api.upload_entries.push(Ok(pending));
    api.upload_entries
        .push(Err(GatewayError::Unavailable("flaky".into())));
    api.upload_entries.push(Ok(done));

    let orchestrator = UploadOrchestrator::new(
        api.clone(),
        settings(CompletionPolicy::PollStatus {
            interval: Duration::from_secs(1),
            max_attempts: 10,
        }),
    );
    let batch = orchestrator
        .accept(vec![UploadFile::new("memo.ogg", vec![0; 16])])
        .await;
    let id = batch.accepted[0];

    orchestrator.wait_until_settled().await;
    assert_eq!(
        orchestrator.task(id).await.expect("tracked").status,
        UploadStatus::Completed
    );
    assert_eq!(api.upload_entries.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn poll_policy_gives_up_after_max_attempts() {
    let api = Arc::new(FakeApi::default());
    api.uploads.push(Ok(accepted("21")));
    let orchestrator = UploadOrchestrator::new(
        api.clone(),
        settings(CompletionPolicy::PollStatus {
            interval: Duration::from_secs(1),
            max_attempts: 2,
        }),
    );

    let batch = orchestrator
        .accept(vec![UploadFile::new("diagram.webp", vec![0; 16])])
        .await;
    let id = batch.accepted[0];

    orchestrator.wait_until_settled().await;
    assert_eq!(
        orchestrator.task(id).await.expect("tracked").status,
        UploadStatus::Completed
    );
    assert_eq!(api.upload_entries.calls(), 2);
}
