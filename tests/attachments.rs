mod common;

use common::{RemoteOp, TestContext, job, local, photo, setup, setup_with, sync, test_settings};
use fieldsync::application::ports::{OperationQueue, RemoteError};
use fieldsync::domain::entities::{
    Operation, QueueEntry, QueueEntryStatus, RecordData, SyncStatus,
};
use fieldsync::domain::value_objects::{EntityType, LocalId};
use std::path::Path;
use std::time::Duration;

fn remote_url(record: &fieldsync::domain::entities::Record) -> (Option<String>, bool) {
    match &record.data {
        RecordData::Photo(fields) => (fields.remote_url.clone(), fields.uploaded),
        other => panic!("expected a photo, got {other:?}"),
    }
}

async fn photo_on_new_job(ctx: &TestContext, path: &Path) -> LocalId {
    let parent = ctx.records.create(job("Meter swap"), None).await.unwrap();
    ctx.records
        .create(photo(Some(path.to_str().unwrap())), Some(parent.local_id))
        .await
        .unwrap()
        .local_id
}

async fn upload_entries(ctx: &TestContext, local_id: LocalId) -> Vec<QueueEntry> {
    ctx.queue
        .entries_for(EntityType::Photo, local_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.operation == Operation::Upload)
        .collect()
}

#[tokio::test]
async fn photo_is_uploaded_after_its_metadata() {
    let ctx = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meter.jpg");
    std::fs::write(&path, b"\xff\xd8\xff\xe0 jpeg bytes").unwrap();

    let parent = ctx.records.create(job("Meter swap"), None).await.unwrap();
    let shot = ctx
        .records
        .create(photo(Some(path.to_str().unwrap())), Some(parent.local_id))
        .await
        .unwrap();

    let report = sync(&ctx).await;
    assert!(report.succeeded(), "{:?}", report.errors);
    assert_eq!(report.uploaded, 1);

    let stored = local(&ctx, EntityType::Photo, shot.local_id).await.unwrap();
    let server_id = stored.server_id.clone().unwrap();
    let (url, uploaded) = remote_url(&stored);
    assert!(uploaded);
    assert_eq!(
        url.as_deref(),
        Some(format!("https://files.example.test/{server_id}").as_str())
    );

    let ops: Vec<(RemoteOp, EntityType)> = ctx
        .remote
        .calls()
        .into_iter()
        .filter(|c| c.op != RemoteOp::List)
        .map(|c| (c.op, c.entity_type))
        .collect();
    assert_eq!(
        ops,
        vec![
            (RemoteOp::Create, EntityType::Job),
            (RemoteOp::Create, EntityType::Photo),
            (RemoteOp::Upload, EntityType::Photo),
        ]
    );

    let remote = ctx.remote.record(EntityType::Photo, &server_id).unwrap();
    assert!(remote.fields.get("local_path").is_none());
    assert!(remote.fields.get("uploaded").is_none());

    assert!(upload_entries(&ctx, shot.local_id).await.is_empty());
    assert_eq!(ctx.orchestrator.current().pending_changes_count, 0);

    let again = sync(&ctx).await;
    assert!(again.succeeded());
    assert_eq!(ctx.remote.calls_of(RemoteOp::Upload).len(), 1);
    let still = local(&ctx, EntityType::Photo, shot.local_id).await.unwrap();
    assert_eq!(remote_url(&still), (url, true));
}

#[tokio::test]
async fn missing_attachment_file_waits_for_the_user() {
    let ctx = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lost.jpg");
    let shot = photo_on_new_job(&ctx, &path).await;

    let report = sync(&ctx).await;
    assert_eq!(report.status, Some(SyncStatus::Error));
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.failed, 1);
    assert!(report.errors[0].contains("missing"), "{:?}", report.errors);
    assert!(ctx.remote.calls_of(RemoteOp::Upload).is_empty());

    let stored = local(&ctx, EntityType::Photo, shot).await.unwrap();
    assert!(stored.server_id.is_some());
    assert_eq!(remote_url(&stored), (None, false));

    let failed = ctx.orchestrator.failed_changes().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].operation, Operation::Upload);
    assert_eq!(failed[0].entity_id, shot);
    let state = ctx.orchestrator.current();
    assert_eq!(state.failed_changes_count, 1);
    assert!(state.last_error.unwrap().contains("missing"));

    let quiet = sync(&ctx).await;
    assert!(quiet.succeeded(), "{:?}", quiet.errors);
    assert!(ctx.remote.calls_of(RemoteOp::Upload).is_empty());

    std::fs::write(&path, b"found it").unwrap();
    ctx.orchestrator.retry_failed(failed[0].id).await.unwrap();
    let report = sync(&ctx).await;
    assert!(report.succeeded(), "{:?}", report.errors);
    assert_eq!(report.uploaded, 1);
    assert!(ctx.orchestrator.failed_changes().await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_upload_is_terminal_until_retried() {
    let ctx = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huge.jpg");
    std::fs::write(&path, b"far too many bytes").unwrap();
    let shot = photo_on_new_job(&ctx, &path).await;
    ctx.remote.fail_always(
        RemoteOp::Upload,
        EntityType::Photo,
        RemoteError::Rejected {
            status: 413,
            message: "too large".to_string(),
        },
    );

    let report = sync(&ctx).await;
    assert_eq!(report.status, Some(SyncStatus::Error));
    assert_eq!(report.failed, 1);
    assert_eq!(ctx.remote.calls_of(RemoteOp::Upload).len(), 1);
    let failed = ctx.orchestrator.failed_changes().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].operation, Operation::Upload);
    assert_eq!(failed[0].status, QueueEntryStatus::Failed);
    assert_eq!(failed[0].retry_count, 1);
    assert!(failed[0].last_error.as_deref().unwrap().contains("413"));

    // the metadata went through; only the file is stuck
    let quiet = sync(&ctx).await;
    assert!(quiet.succeeded(), "{:?}", quiet.errors);
    assert_eq!(ctx.remote.calls_of(RemoteOp::Upload).len(), 1);
    assert!(ctx.orchestrator.current().last_sync_time.is_some());

    ctx.remote.clear_failures();
    ctx.orchestrator.retry_failed(failed[0].id).await.unwrap();
    let report = sync(&ctx).await;
    assert!(report.succeeded(), "{:?}", report.errors);
    assert_eq!(report.uploaded, 1);
    assert!(ctx.orchestrator.failed_changes().await.unwrap().is_empty());
    let stored = local(&ctx, EntityType::Photo, shot).await.unwrap();
    assert!(remote_url(&stored).1);
}

#[tokio::test]
async fn transient_upload_failures_stop_after_the_retry_limit() {
    let ctx = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flaky.jpg");
    std::fs::write(&path, b"bytes").unwrap();
    let shot = photo_on_new_job(&ctx, &path).await;
    ctx.remote.fail_always(
        RemoteOp::Upload,
        EntityType::Photo,
        RemoteError::Server { status: 503 },
    );

    for attempt in 1..=3u32 {
        let report = sync(&ctx).await;
        assert_eq!(report.status, Some(SyncStatus::Error));
        let entries = upload_entries(&ctx, shot).await;
        assert_eq!(entries[0].retry_count, attempt);
    }
    let entries = upload_entries(&ctx, shot).await;
    assert_eq!(entries[0].status, QueueEntryStatus::Failed);

    sync(&ctx).await;
    assert_eq!(ctx.remote.calls_of(RemoteOp::Upload).len(), 3);
    assert_eq!(ctx.orchestrator.current().failed_changes_count, 1);
}

#[tokio::test]
async fn slow_upload_times_out_and_stays_queued() {
    let mut settings = test_settings();
    settings.request_timeout = Duration::from_millis(200);
    let ctx = setup_with(settings, true).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow.jpg");
    std::fs::write(&path, b"bytes").unwrap();
    let shot = photo_on_new_job(&ctx, &path).await;
    ctx.remote
        .delay_next(RemoteOp::Upload, EntityType::Photo, Duration::from_secs(1));

    let report = sync(&ctx).await;
    assert_eq!(report.status, Some(SyncStatus::Error));
    assert!(report.errors[0].contains("timed out"), "{:?}", report.errors);
    let entries = upload_entries(&ctx, shot).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, QueueEntryStatus::Pending);
    assert_eq!(entries[0].retry_count, 1);

    let report = sync(&ctx).await;
    assert!(report.succeeded(), "{:?}", report.errors);
    assert_eq!(report.uploaded, 1);
}

#[tokio::test]
async fn failed_upload_is_retried_next_cycle() {
    let ctx = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sig.jpg");
    std::fs::write(&path, b"bytes").unwrap();
    let parent = ctx.records.create(job("Upload retry"), None).await.unwrap();
    let shot = ctx
        .records
        .create(photo(Some(path.to_str().unwrap())), Some(parent.local_id))
        .await
        .unwrap();
    ctx.remote.fail_next(
        RemoteOp::Upload,
        EntityType::Photo,
        RemoteError::Server { status: 502 },
    );

    let report = sync(&ctx).await;
    assert_eq!(report.status, Some(SyncStatus::Error));
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    let entries = upload_entries(&ctx, shot.local_id).await;
    assert_eq!(entries[0].status, QueueEntryStatus::Pending);
    assert_eq!(entries[0].retry_count, 1);

    let report = sync(&ctx).await;
    assert!(report.succeeded(), "{:?}", report.errors);
    assert_eq!(report.uploaded, 1);
    let stored = local(&ctx, EntityType::Photo, shot.local_id).await.unwrap();
    assert!(remote_url(&stored).1);
}
