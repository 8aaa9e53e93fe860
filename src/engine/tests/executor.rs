//! End-to-end executor tests against the in-memory gateway.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::db::NewTask;
use crate::engine::test_helpers::{
    MockGateway, create_test_engine, wait_for_status, wait_for_terminal, write_source_file,
};
use crate::error::{Error, TransferError};
use crate::gateway::ObjectStoreGateway;
use crate::types::{CommandOutcome, Event, Status};

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn upload_single_part_file() {
    let gateway = Arc::new(MockGateway::new());
    let (engine, dir) = create_test_engine(gateway.clone()).await;
    let source = write_source_file(dir.path(), "small.bin", MIB).await;

    engine.start_queue_processor();
    let id = engine.start_upload("bucket", "small.bin", &source).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);

    let stored = gateway.get_object("bucket", "small.bin").unwrap();
    let original = tokio::fs::read(&source).await.unwrap();
    assert_eq!(stored, original);

    assert_eq!(gateway.upload_part_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.open_sessions(), 0, "session must be consumed");

    let task = engine.get_task(id).await.unwrap();
    assert_eq!(task.transferred_bytes, MIB as u64);
}

#[tokio::test]
async fn upload_multipart_file() {
    let gateway = Arc::new(MockGateway::new());
    let (engine, dir) = create_test_engine(gateway.clone()).await;
    // 12 MiB over 5 MiB chunks: two full parts and a 2 MiB tail
    let source = write_source_file(dir.path(), "large.bin", 12 * MIB).await;

    engine.start_queue_processor();
    let mut events = engine.subscribe();
    let id = engine.start_upload("bucket", "large.bin", &source).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);
    assert_eq!(gateway.upload_part_calls.load(Ordering::SeqCst), 3);

    let stored = gateway.get_object("bucket", "large.bin").unwrap();
    let original = tokio::fs::read(&source).await.unwrap();
    assert_eq!(stored, original);

    // The completion event carries the committed object's descriptor
    loop {
        match events.recv().await.unwrap() {
            Event::UploadComplete { id: event_id, descriptor } => {
                assert_eq!(event_id, id);
                assert_eq!(descriptor.bucket, "bucket");
                assert_eq!(descriptor.key, "large.bin");
                assert!(descriptor.etag.is_some());
                break;
            }
            Event::TaskFailed { error, .. } => panic!("upload failed: {error}"),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn upload_empty_file_commits_empty_object() {
    let gateway = Arc::new(MockGateway::new());
    let (engine, dir) = create_test_engine(gateway.clone()).await;
    let source = write_source_file(dir.path(), "empty.bin", 0).await;

    engine.start_queue_processor();
    let id = engine.start_upload("bucket", "empty.bin", &source).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);
    assert_eq!(gateway.get_object("bucket", "empty.bin").unwrap(), Vec::<u8>::new());
    assert_eq!(gateway.open_sessions(), 0);
}

#[tokio::test]
async fn upload_retries_transient_part_failures() {
    let gateway = Arc::new(MockGateway::new());
    gateway.fail_next_upload_parts.store(2, Ordering::SeqCst);

    let (engine, dir) = create_test_engine(gateway.clone()).await;
    let source = write_source_file(dir.path(), "flaky.bin", MIB).await;

    engine.start_queue_processor();
    let id = engine.start_upload("bucket", "flaky.bin", &source).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);

    // Two injected failures plus the successful attempt
    assert_eq!(gateway.upload_part_calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        gateway.get_object("bucket", "flaky.bin").unwrap().len(),
        MIB
    );
}

#[tokio::test]
async fn resumed_upload_reuses_stored_parts() {
    let gateway = Arc::new(MockGateway::new());
    let (engine, dir) = create_test_engine(gateway.clone()).await;
    let source = write_source_file(dir.path(), "resumed.bin", 12 * MIB).await;
    let chunk = 5 * MIB as u64;

    // Simulate an earlier run that uploaded parts 1 and 2 before pausing
    let upload_id = gateway
        .start_or_resume_upload("bucket", "resumed.bin", None)
        .await
        .unwrap();
    gateway
        .upload_part("bucket", "resumed.bin", &upload_id, 1, &source, 0, chunk)
        .await
        .unwrap();
    gateway
        .upload_part("bucket", "resumed.bin", &upload_id, 2, &source, chunk, chunk)
        .await
        .unwrap();

    let id = engine
        .db
        .insert_task(&NewTask {
            task_type: 0,
            bucket_name: "bucket".to_string(),
            object_key: "resumed.bin".to_string(),
            local_path: source.to_string_lossy().to_string(),
            file_name: "resumed.bin".to_string(),
            file_size: Some(12 * MIB as i64),
            chunk_size: chunk as i64,
            status: Status::Paused.to_i32(),
        })
        .await
        .unwrap();
    engine.db.set_upload_id(id, Some(&upload_id)).await.unwrap();
    engine.db.update_progress(id, 2 * chunk).await.unwrap();

    engine.start_queue_processor();
    engine.resume_task(id).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);

    // Two seeded calls, then only the tail part from the executor
    assert_eq!(gateway.upload_part_calls.load(Ordering::SeqCst), 3);

    let stored = gateway.get_object("bucket", "resumed.bin").unwrap();
    let original = tokio::fs::read(&source).await.unwrap();
    assert_eq!(stored, original);

    let row = engine.db.get_task(id).await.unwrap().unwrap();
    assert!(row.upload_id.is_none(), "consumed session must be cleared");
}

#[tokio::test]
async fn download_writes_file_and_removes_transient() {
    let gateway = Arc::new(MockGateway::new());
    let data: Vec<u8> = (0..50_000).map(|i| (i % 256) as u8).collect();
    gateway.put_object("bucket", "obj.bin", data.clone());

    let (engine, dir) = create_test_engine(gateway).await;
    let dest = dir.path().join("downloads").join("obj.bin");

    engine.start_queue_processor();
    let id = engine.start_download("bucket", "obj.bin", &dest).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    let transient = dest.with_file_name("obj.bin.s3tpart");
    assert!(!transient.exists(), "transient must be renamed away");

    let task = engine.get_task(id).await.unwrap();
    assert_eq!(task.file_size, Some(50_000));
    assert_eq!(task.transferred_bytes, 50_000);
}

#[tokio::test]
async fn download_resumes_from_existing_transient() {
    let gateway = Arc::new(MockGateway::new());
    let data: Vec<u8> = (0..40_000).map(|i| (i % 256) as u8).collect();
    gateway.put_object("bucket", "obj.bin", data.clone());

    let (engine, dir) = create_test_engine(gateway.clone()).await;
    let dest = dir.path().join("obj.bin");

    // A previous run left the first 10 000 bytes in the transient file
    let transient = dir.path().join("obj.bin.s3tpart");
    tokio::fs::write(&transient, &data[..10_000]).await.unwrap();

    engine.start_queue_processor();
    let id = engine.start_download("bucket", "obj.bin", &dest).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);

    let offsets = gateway.stream_offsets.lock().unwrap().clone();
    assert_eq!(offsets, vec![10_000], "stream must start past the stored bytes");
}

#[tokio::test]
async fn download_restarts_when_store_lacks_range_support() {
    let gateway = Arc::new(MockGateway::without_range_resume());
    let data: Vec<u8> = (0..20_000).map(|i| (i % 256) as u8).collect();
    gateway.put_object("bucket", "obj.bin", data.clone());

    let (engine, dir) = create_test_engine(gateway.clone()).await;
    let dest = dir.path().join("obj.bin");

    let transient = dir.path().join("obj.bin.s3tpart");
    tokio::fs::write(&transient, &data[..5_000]).await.unwrap();

    engine.start_queue_processor();
    let id = engine.start_download("bucket", "obj.bin", &dest).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);

    let offsets = gateway.stream_offsets.lock().unwrap().clone();
    assert_eq!(offsets, vec![0], "partial bytes must be discarded");
}

#[tokio::test]
async fn download_of_missing_object_fails_with_message() {
    let gateway = Arc::new(MockGateway::new());
    let (engine, dir) = create_test_engine(gateway).await;
    let dest = dir.path().join("missing.bin");

    engine.start_queue_processor();
    let mut events = engine.subscribe();
    let id = engine.start_download("bucket", "missing.bin", &dest).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Failed);

    let task = engine.get_task(id).await.unwrap();
    let message = task.error_message.unwrap();
    assert!(message.contains("missing.bin"), "error should name the key: {message}");

    loop {
        match events.recv().await.unwrap() {
            Event::TaskFailed { id: event_id, error } => {
                assert_eq!(event_id, id);
                assert!(error.contains("missing.bin"));
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn download_of_empty_object_completes() {
    let gateway = Arc::new(MockGateway::new());
    gateway.put_object("bucket", "empty.bin", Vec::new());

    let (engine, dir) = create_test_engine(gateway).await;
    let dest = dir.path().join("empty.bin");

    engine.start_queue_processor();
    let id = engine.start_download("bucket", "empty.bin", &dest).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn progress_events_carry_totals() {
    let gateway = Arc::new(MockGateway::new());
    let data = vec![7u8; 10_000];
    gateway.put_object("bucket", "obj.bin", data);

    let (engine, dir) = create_test_engine(gateway).await;
    let dest = dir.path().join("obj.bin");

    engine.start_queue_processor();
    let mut events = engine.subscribe();
    let id = engine.start_download("bucket", "obj.bin", &dest).await.unwrap();

    let mut last = 0u64;
    loop {
        match events.recv().await.unwrap() {
            Event::Progress { id: event_id, bytes_transferred, total_bytes } => {
                assert_eq!(event_id, id);
                assert_eq!(total_bytes, Some(10_000));
                assert!(bytes_transferred >= last, "progress must be monotonic");
                last = bytes_transferred;
            }
            Event::DownloadComplete { path, .. } => {
                assert_eq!(path, dest);
                break;
            }
            Event::TaskFailed { error, .. } => panic!("download failed: {error}"),
            _ => continue,
        }
    }
    assert_eq!(last, 10_000);
}

#[tokio::test]
async fn pause_running_download_keeps_transient_for_resume() {
    let gateway = Arc::new(MockGateway::new());
    // Enough increments (1 KiB buffer) that a pause lands mid-transfer
    let data: Vec<u8> = (0..512 * 1024).map(|i| (i % 256) as u8).collect();
    gateway.put_object("bucket", "obj.bin", data.clone());

    let (engine, dir) = create_test_engine(gateway).await;
    let dest = dir.path().join("obj.bin");

    engine.start_queue_processor();
    let id = engine.start_download("bucket", "obj.bin", &dest).await.unwrap();

    wait_for_status(&engine, id, |s| s == Status::Running).await;
    let outcome = engine.pause_task(id).await.unwrap();

    if outcome == CommandOutcome::Applied {
        // The executor records the pause when it stops at its next
        // increment boundary, unless the copy already finished
        let status = wait_for_status(&engine, id, |s| {
            s == Status::Paused || s == Status::Completed
        })
        .await;
        if status == Status::Paused {
            engine.resume_task(id).await.unwrap();
        }
    }

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
}

#[tokio::test]
async fn cancel_with_part_in_flight_stays_cancelled() {
    let gateway = Arc::new(MockGateway::new());
    gateway.stall_parts_until_abort.store(true, Ordering::SeqCst);

    let (engine, dir) = create_test_engine(gateway.clone()).await;
    let source = write_source_file(dir.path(), "inflight.bin", 12 * MIB).await;

    engine.start_queue_processor();
    let mut events = engine.subscribe();
    let id = engine.start_upload("bucket", "inflight.bin", &source).await.unwrap();

    // Wait until part 1 is in flight against the open session
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while gateway.upload_part_calls.load(Ordering::SeqCst) == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "first part never started"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(engine.cancel_task(id).await.unwrap(), CommandOutcome::Applied);
    assert_eq!(gateway.open_sessions(), 0, "cancel must abort the session");

    // The stalled part now fails against the aborted session; the task
    // must hold at cancelled instead of flipping to failed
    for _ in 0..20 {
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        assert_eq!(engine.get_task(id).await.unwrap().status, Status::Cancelled);
    }
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, Event::TaskFailed { .. }),
            "a cancelled task must not surface a failure"
        );
    }
}

#[tokio::test]
async fn resume_is_rejected_while_the_executor_is_draining() {
    let gateway = Arc::new(MockGateway::new());
    gateway.part_delay_ms.store(1000, Ordering::SeqCst);

    let (engine, dir) = create_test_engine(gateway.clone()).await;
    let source = write_source_file(dir.path(), "draining.bin", 12 * MIB).await;

    engine.start_queue_processor();
    let id = engine.start_upload("bucket", "draining.bin", &source).await.unwrap();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while gateway.upload_part_calls.load(Ordering::SeqCst) == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "first part never started"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(engine.pause_task(id).await.unwrap(), CommandOutcome::Applied);

    // Part 1 is still in flight: the row reads running until the executor
    // stops, and resuming now must not spawn a second executor
    assert_eq!(engine.get_task(id).await.unwrap().status, Status::Running);
    let err = engine.resume_task(id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transfer(TransferError::InvalidState { .. })
    ));

    gateway.part_delay_ms.store(0, Ordering::SeqCst);
    wait_for_status(&engine, id, |s| s == Status::Paused).await;
    engine.resume_task(id).await.unwrap();

    assert_eq!(wait_for_terminal(&engine, id).await, Status::Completed);

    // One part before the pause, two after; a duplicate executor would
    // add calls on top of these
    assert_eq!(gateway.upload_part_calls.load(Ordering::SeqCst), 3);
    let stored = gateway.get_object("bucket", "draining.bin").unwrap();
    assert_eq!(stored, tokio::fs::read(&source).await.unwrap());
}

#[tokio::test]
async fn delete_running_task_is_rejected() {
    let gateway = Arc::new(MockGateway::new());
    gateway.part_delay_ms.store(1000, Ordering::SeqCst);

    let (engine, dir) = create_test_engine(gateway.clone()).await;
    let source = write_source_file(dir.path(), "busy.bin", MIB).await;

    engine.start_queue_processor();
    let id = engine.start_upload("bucket", "busy.bin", &source).await.unwrap();
    wait_for_status(&engine, id, |s| s == Status::Running).await;

    let err = engine.delete_task(id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transfer(TransferError::InvalidState { ref operation, ref current_state, .. })
            if operation == "delete" && current_state == "Running"
    ));

    // Cancelling makes it terminal, after which the delete goes through
    assert_eq!(engine.cancel_task(id).await.unwrap(), CommandOutcome::Applied);
    engine.delete_task(id).await.unwrap();
}
