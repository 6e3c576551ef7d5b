// tests/orchestrator_test.rs

mod common;

use common::*;
use shelf_dl::{
    config::HealingSettings,
    constants::layout,
    downloader::{FixedDelayPolicy, HealingService},
    error::AppError,
    models::{AudioInfo, DownloadStage, ValidationResult},
};
use std::{fs, sync::Arc, sync::atomic::Ordering, time::Duration};
use tempfile::tempdir;

#[tokio::test]
async fn test_happy_path_writes_complete_book() {
    let dir = tempdir().unwrap();
    let h = harness(
        dir.path(),
        FakeApi::with_book(book("b1", "L1", true)),
        FakeTransport::with_session(session("L1", 3)),
    );
    let progress = ProgressLog::default();

    h.orchestrator
        .download_book(&book("b1", "L1", true), progress.callback())
        .await
        .expect("download should succeed");

    let book_dir = dir.path().join("b1");
    assert!(book_dir.join(layout::METADATA_FILE).is_file());
    assert!(book_dir.join(layout::COVER_FILE).is_file());
    for index in 0..3 {
        let path = book_dir.join(layout::AUDIO_DIR).join(layout::audio_file_name(index));
        assert_eq!(fs::metadata(&path).unwrap().len(), AUDIO_BYTES as u64);
    }
    let info: AudioInfo =
        serde_json::from_slice(&fs::read(book_dir.join(layout::AUDIO_INFO_FILE)).unwrap()).unwrap();
    assert_eq!(info.audio_track_count, 3);
    assert_eq!(h.validator.validate_book_integrity("b1"), ValidationResult::Valid);

    let updates = progress.updates();
    let stages: Vec<DownloadStage> = updates.iter().map(|u| u.stage).collect();
    assert_eq!(stages.first(), Some(&DownloadStage::Preparing));
    assert!(stages.contains(&DownloadStage::FetchingMetadata));
    assert!(stages.contains(&DownloadStage::DownloadingCover));
    assert!(stages.contains(&DownloadStage::DownloadingAudio));
    assert!(stages.contains(&DownloadStage::Finalizing));
    let last = updates.last().unwrap();
    assert_eq!(last.stage, DownloadStage::Complete);
    assert_eq!(last.progress, 1.0);
    assert!(updates.windows(2).all(|w| w[0].progress <= w[1].progress));

    let urls = h.transport.requested_urls.lock().unwrap().clone();
    assert_eq!(
        urls,
        vec![
            "http://books.test/api/items/L1/file/0",
            "http://books.test/api/items/L1/file/1",
            "http://books.test/api/items/L1/file/2",
        ]
    );
    assert!(!h.orchestrator.active_downloads().contains("b1"));
}

#[tokio::test]
async fn test_book_without_cover_skips_cover_stage() {
    let dir = tempdir().unwrap();
    let h = harness(
        dir.path(),
        FakeApi::with_book(book("b2", "L2", false)),
        FakeTransport::with_session(session("L2", 1)),
    );
    let progress = ProgressLog::default();

    h.orchestrator
        .download_book(&book("b2", "L2", false), progress.callback())
        .await
        .unwrap();

    assert_eq!(h.transport.cover_calls.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("b2").join(layout::COVER_FILE).exists());
    assert!(
        !progress
            .updates()
            .iter()
            .any(|u| u.stage == DownloadStage::DownloadingCover)
    );
}

#[tokio::test]
async fn test_missing_content_url_fails_and_healing_removes_partial_book() {
    let dir = tempdir().unwrap();
    let mut broken = session("L1", 3);
    broken.audio_tracks[1].content_url = None;
    let h = harness(
        dir.path(),
        FakeApi::with_book(book("b1", "L1", false)),
        FakeTransport::with_session(broken),
    );
    let progress = ProgressLog::default();

    let err = h
        .orchestrator
        .download_book(&book("b1", "L1", false), progress.callback())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MissingContentUrl { track: 1 }), "{err:?}");

    let audio_dir = dir.path().join("b1").join(layout::AUDIO_DIR);
    assert!(audio_dir.join(layout::audio_file_name(0)).is_file());
    assert!(!audio_dir.join(layout::audio_file_name(1)).exists());
    assert!(!audio_dir.join(layout::audio_file_name(2)).exists());
    assert_eq!(progress.updates().last().unwrap().stage, DownloadStage::Failed);

    let observer = Arc::new(CountingObserver::default());
    let healing = HealingService::new(
        h.storage.clone(),
        h.validator.clone(),
        h.orchestrator.active_downloads(),
        observer.clone(),
        HealingSettings::default(),
    );
    let report = healing.heal_now().await;

    assert_eq!(report.removed, vec!["b1".to_string()]);
    assert!(!dir.path().join("b1").exists());
    assert_eq!(*observer.removed.lock().unwrap(), vec!["b1".to_string()]);
}

#[tokio::test]
async fn test_transient_cover_failures_recover() {
    let dir = tempdir().unwrap();
    let h = harness(
        dir.path(),
        FakeApi::with_book(book("b1", "L1", true)),
        FakeTransport::with_session(session("L1", 2))
            .fail_cover([AppError::HttpError(503), AppError::HttpError(503)]),
    );

    h.orchestrator
        .download_book(&book("b1", "L1", true), ProgressLog::default().callback())
        .await
        .unwrap();

    assert_eq!(h.transport.cover_calls.load(Ordering::SeqCst), 3);
    assert!(dir.path().join("b1").join(layout::COVER_FILE).is_file());
}

#[tokio::test]
async fn test_exhausted_cover_retries_fail_download() {
    let dir = tempdir().unwrap();
    let h = harness(
        dir.path(),
        FakeApi::with_book(book("b1", "L1", true)),
        FakeTransport::with_session(session("L1", 2)).fail_cover([
            AppError::HttpError(503),
            AppError::HttpError(503),
            AppError::HttpError(503),
        ]),
    );

    let err = h
        .orchestrator
        .download_book(&book("b1", "L1", true), ProgressLog::default().callback())
        .await
        .unwrap_err();

    match err {
        AppError::CoverDownloadFailed(inner) => {
            assert!(matches!(*inner, AppError::HttpError(503)))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.transport.cover_calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.transport.file_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_cover_image_is_not_retried() {
    let dir = tempdir().unwrap();
    let h = harness(
        dir.path(),
        FakeApi::with_book(book("b1", "L1", true)),
        FakeTransport::with_session(session("L1", 1)).fail_cover([AppError::InvalidImageData]),
    );

    let err = h
        .orchestrator
        .download_book(&book("b1", "L1", true), ProgressLog::default().callback())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::CoverDownloadFailed(_)));
    assert_eq!(h.transport.cover_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_track_failure_is_retried() {
    let dir = tempdir().unwrap();
    let h = harness(
        dir.path(),
        FakeApi::with_book(book("b1", "L1", false)),
        FakeTransport::with_session(session("L1", 2)).fail_files([AppError::FileTooSmall(200)]),
    );

    h.orchestrator
        .download_book(&book("b1", "L1", false), ProgressLog::default().callback())
        .await
        .unwrap();

    assert_eq!(h.transport.file_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_undersized_audio_fails_verification() {
    let dir = tempdir().unwrap();
    let transport = FakeTransport::with_session(session("L1", 1));
    *transport.audio_size.lock().unwrap() = 2048;
    let h = harness(dir.path(), FakeApi::with_book(book("b1", "L1", false)), transport);
    let progress = ProgressLog::default();

    let err = h
        .orchestrator
        .download_book(&book("b1", "L1", false), progress.callback())
        .await
        .unwrap_err();

    match err {
        AppError::VerificationFailed(reason) => assert_eq!(reason, "Audio track 0 is corrupted"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(progress.updates().last().unwrap().stage, DownloadStage::Failed);
}

#[tokio::test]
async fn test_book_without_chapters_has_no_library_item() {
    let dir = tempdir().unwrap();
    let mut details = book("b1", "L1", false);
    details.chapters.clear();
    let h = harness(
        dir.path(),
        FakeApi::with_book(details.clone()),
        FakeTransport::with_session(session("L1", 1)),
    );

    let err = h
        .orchestrator
        .download_book(&details, ProgressLog::default().callback())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::MissingLibraryItemId));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_stops_download_without_partial_files() {
    let dir = tempdir().unwrap();
    let transport = FakeTransport::with_session(session("L1", 2));
    transport.hang_files.store(true, Ordering::SeqCst);
    let h = harness(dir.path(), FakeApi::with_book(book("b1", "L1", false)), transport);
    let progress = ProgressLog::default();

    let orchestrator = h.orchestrator.clone();
    let callback = progress.callback();
    let task = tokio::spawn(async move {
        orchestrator
            .download_book(&book("b1", "L1", false), callback)
            .await
    });

    h.transport.file_started.notified().await;
    assert!(h.orchestrator.cancel_download("b1"));

    let result = task.await.unwrap();
    assert!(matches!(result, Err(AppError::Cancelled)));
    assert_eq!(progress.updates().last().unwrap().stage, DownloadStage::Failed);
    let audio_dir = dir.path().join("b1").join(layout::AUDIO_DIR);
    assert_eq!(fs::read_dir(&audio_dir).unwrap().count(), 0);
    assert!(!h.orchestrator.active_downloads().contains("b1"));
    assert!(!h.orchestrator.cancel_download("b1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_download_of_same_book_is_rejected() {
    let dir = tempdir().unwrap();
    let transport = FakeTransport::with_session(session("L1", 1));
    transport.hang_files.store(true, Ordering::SeqCst);
    let h = harness(dir.path(), FakeApi::with_book(book("b1", "L1", false)), transport);

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move {
        orchestrator
            .download_book(&book("b1", "L1", false), ProgressLog::default().callback())
            .await
    });
    h.transport.file_started.notified().await;

    let second = h
        .orchestrator
        .download_book(&book("b1", "L1", false), ProgressLog::default().callback())
        .await;
    assert!(matches!(second, Err(AppError::AlreadyDownloading(id)) if id == "b1"));

    h.orchestrator.cancel_download("b1");
    assert!(matches!(first.await.unwrap(), Err(AppError::Cancelled)));
}

fn audio_file_count(book_dir: &std::path::Path) -> usize {
    fs::read_dir(book_dir.join(layout::AUDIO_DIR)).unwrap().count()
}

#[tokio::test]
async fn test_redownload_replaces_previous_files() {
    let dir = tempdir().unwrap();
    let h = harness(
        dir.path(),
        FakeApi::with_book(book("b1", "L1", false)),
        FakeTransport::with_session(session("L1", 2)),
    );
    write_book_fixture(h.storage.as_ref(), &book("b1", "L1", true), 3, 3);
    let book_dir = dir.path().join("b1");
    assert!(book_dir.join(layout::COVER_FILE).is_file());

    h.orchestrator
        .download_book(&book("b1", "L1", false), ProgressLog::default().callback())
        .await
        .unwrap();

    assert_eq!(audio_file_count(&book_dir), 2);
    assert!(!book_dir.join(layout::COVER_FILE).exists());
    let info: AudioInfo =
        serde_json::from_slice(&fs::read(book_dir.join(layout::AUDIO_INFO_FILE)).unwrap()).unwrap();
    assert_eq!(info.audio_track_count, 2);
    assert_eq!(h.validator.validate_book_integrity("b1"), ValidationResult::Valid);
}

#[tokio::test]
async fn test_failed_redownload_does_not_leave_stale_valid_book() {
    let dir = tempdir().unwrap();
    let mut broken = session("L1", 2);
    broken.audio_tracks[1].content_url = None;
    let h = harness(
        dir.path(),
        FakeApi::with_book(book("b1", "L1", false)),
        FakeTransport::with_session(broken),
    );
    write_book_fixture(h.storage.as_ref(), &book("b1", "L1", false), 2, 2);
    assert_eq!(h.validator.validate_book_integrity("b1"), ValidationResult::Valid);

    let err = h
        .orchestrator
        .download_book(&book("b1", "L1", false), ProgressLog::default().callback())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MissingContentUrl { track: 1 }), "{err:?}");
    assert!(!dir.path().join("b1").join(layout::AUDIO_INFO_FILE).exists());
    assert!(!h.validator.validate_book_integrity("b1").is_valid());

    let observer = Arc::new(CountingObserver::default());
    let healing = HealingService::new(
        h.storage.clone(),
        h.validator.clone(),
        h.orchestrator.active_downloads(),
        observer.clone(),
        HealingSettings::default(),
    );
    assert_eq!(healing.heal_now().await.removed, vec!["b1".to_string()]);
    assert!(!dir.path().join("b1").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_download_keeps_lease_until_write_completes() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(SlowAudioStorage::new(dir.path(), Duration::from_millis(500)));
    let h = custom_harness(
        dir.path(),
        storage.clone(),
        FakeApi::with_book(book("b1", "L1", false)),
        FakeTransport::with_session(session("L1", 2)),
        fast_retry(),
    );

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move {
        orchestrator
            .download_book(&book("b1", "L1", false), ProgressLog::default().callback())
            .await
    });
    storage.write_started.notified().await;
    assert!(h.orchestrator.cancel_download("b1"));

    assert!(h.orchestrator.active_downloads().contains("b1"));
    let second = h
        .orchestrator
        .download_book(&book("b1", "L1", false), ProgressLog::default().callback())
        .await;
    assert!(matches!(second, Err(AppError::AlreadyDownloading(_))));

    let healing = HealingService::new(
        h.storage.clone(),
        h.validator.clone(),
        h.orchestrator.active_downloads(),
        Arc::new(CountingObserver::default()),
        HealingSettings::default(),
    );
    let report = healing.heal_now().await;
    assert_eq!(report.skipped_in_flight, vec!["b1".to_string()]);
    assert!(report.removed.is_empty());

    assert!(matches!(first.await.unwrap(), Err(AppError::Cancelled)));
    assert_eq!(storage.writes_finished.load(Ordering::SeqCst), 1);
    assert!(!h.orchestrator.active_downloads().contains("b1"));
}

#[tokio::test]
async fn test_fixed_delay_policy_drives_track_retries() {
    let dir = tempdir().unwrap();
    let h = custom_harness(
        dir.path(),
        Arc::new(shelf_dl::downloader::FileStorage::new(dir.path())),
        FakeApi::with_book(book("b1", "L1", false)),
        FakeTransport::with_session(session("L1", 2))
            .fail_files([AppError::HttpError(502), AppError::FileTooSmall(10)]),
        Arc::new(FixedDelayPolicy::new(3, vec![Duration::from_millis(1)])),
    );

    h.orchestrator
        .download_book(&book("b1", "L1", false), ProgressLog::default().callback())
        .await
        .unwrap();

    assert_eq!(h.transport.file_calls.load(Ordering::SeqCst), 4);
    assert_eq!(h.validator.validate_book_integrity("b1"), ValidationResult::Valid);
}
